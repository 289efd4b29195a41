use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{max_tokens, parse_input, split_list, AgentBehavior, AgentOutput, InvocationContext};
use crate::ai::CompletionClient;
use crate::error::InvocationCause;
use crate::models::{AgentRecord, AgentType};

#[derive(Debug, Deserialize)]
struct ResumeAnalysisInput {
    text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResumeFindings {
    pub skills: Vec<String>,
    pub experience_years: Option<f64>,
    pub seniority: Option<String>,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub summary: String,
}

pub struct ResumeAnalysisAgent {
    client: Arc<dyn CompletionClient>,
}

impl ResumeAnalysisAgent {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentBehavior for ResumeAnalysisAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ResumeAnalysis
    }

    async fn run(
        &self,
        record: &AgentRecord,
        input: &serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<AgentOutput, InvocationCause> {
        let input: ResumeAnalysisInput = parse_input(input)?;
        if input.text.trim().is_empty() {
            return Err(InvocationCause::RejectedInput("resume text is empty".to_string()));
        }

        let prompt = format!(
            "Analyze this resume for a recruiter.\n\n\
            Return EXACTLY in this format:\n\
            SKILLS: skill1, skill2, skill3\n\
            EXPERIENCE_YEARS: <number>\n\
            SENIORITY: <junior|mid|senior|staff|principal>\n\
            STRENGTHS: item1, item2\n\
            GAPS: item1, item2\n\
            SUMMARY:\n\
            <one short paragraph>\n\n\
            Resume:\n{}",
            input.text
        );

        let response = self
            .client
            .complete(&record.api_binding, &prompt, max_tokens(record, 2048))
            .await?;

        let findings = parse_findings(&response);
        if findings.skills.is_empty() && findings.summary.is_empty() {
            return Err(InvocationCause::RejectedInput(
                "provider response did not follow the findings format".to_string(),
            ));
        }
        Ok(AgentOutput::ResumeAnalysis(findings))
    }
}

fn parse_findings(response: &str) -> ResumeFindings {
    let mut findings = ResumeFindings::default();
    let mut summary = String::new();
    let mut in_summary = false;

    for line in response.lines() {
        let trimmed = line.trim();

        if in_summary {
            if !summary.is_empty() {
                summary.push('\n');
            }
            summary.push_str(line);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("SKILLS:") {
            findings.skills = split_list(rest);
        } else if let Some(rest) = trimmed.strip_prefix("EXPERIENCE_YEARS:") {
            findings.experience_years = rest.trim().parse::<f64>().ok();
        } else if let Some(rest) = trimmed.strip_prefix("SENIORITY:") {
            let level = rest.trim().to_lowercase();
            if !level.is_empty() {
                findings.seniority = Some(level);
            }
        } else if let Some(rest) = trimmed.strip_prefix("STRENGTHS:") {
            findings.strengths = split_list(rest);
        } else if let Some(rest) = trimmed.strip_prefix("GAPS:") {
            findings.gaps = split_list(rest);
        } else if let Some(rest) = trimmed.strip_prefix("SUMMARY:") {
            in_summary = true;
            summary.push_str(rest.trim());
        }
    }

    findings.summary = summary.trim().to_string();
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{record, FakeClient};

    const RESPONSE: &str = "SKILLS: Rust, PostgreSQL, Kubernetes\n\
        EXPERIENCE_YEARS: 7.5\n\
        SENIORITY: Senior\n\
        STRENGTHS: systems design\n\
        GAPS: frontend\n\
        SUMMARY:\n\
        Backend engineer with strong infrastructure focus.\n\
        Led two platform migrations.";

    #[test]
    fn test_parse_findings() {
        let findings = parse_findings(RESPONSE);
        assert_eq!(findings.skills, vec!["Rust", "PostgreSQL", "Kubernetes"]);
        assert_eq!(findings.experience_years, Some(7.5));
        assert_eq!(findings.seniority.as_deref(), Some("senior"));
        assert_eq!(findings.gaps, vec!["frontend"]);
        assert!(findings.summary.starts_with("Backend engineer"));
        assert!(findings.summary.ends_with("platform migrations."));
    }

    #[tokio::test]
    async fn test_run_returns_findings() {
        let client = Arc::new(FakeClient::replying(RESPONSE));
        let agent = ResumeAnalysisAgent::new(client.clone());
        let output = agent
            .run(
                &record("resume-v1", AgentType::ResumeAnalysis),
                &serde_json::json!({"text": "Seven years building Rust services"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap();

        match output {
            AgentOutput::ResumeAnalysis(findings) => assert_eq!(findings.skills.len(), 3),
            other => panic!("unexpected output: {:?}", other),
        }
        assert!(client.prompts.lock().unwrap()[0].contains("Seven years building Rust services"));
    }

    #[tokio::test]
    async fn test_run_rejects_wrong_shape_without_calling_provider() {
        let client = Arc::new(FakeClient::replying(RESPONSE));
        let agent = ResumeAnalysisAgent::new(client.clone());
        let ctx = InvocationContext::default();
        let record = record("resume-v1", AgentType::ResumeAnalysis);

        let err = agent
            .run(&record, &serde_json::json!({"resume": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));

        let err = agent
            .run(&record, &serde_json::json!({"text": "   "}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_rejects_unstructured_response() {
        let agent = ResumeAnalysisAgent::new(Arc::new(FakeClient::replying("I cannot help with that.")));
        let err = agent
            .run(
                &record("resume-v1", AgentType::ResumeAnalysis),
                &serde_json::json!({"text": "resume"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
    }
}
