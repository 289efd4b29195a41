use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{max_tokens, parse_input, AgentBehavior, AgentOutput, InvocationContext};
use crate::ai::CompletionClient;
use crate::error::InvocationCause;
use crate::models::{AgentRecord, AgentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    CoverLetter,
    OutreachMessage,
    ResumeSummary,
}

#[derive(Debug, Deserialize)]
struct ContentGenerationInput {
    kind: ContentKind,
    job_title: String,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    resume_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedContent {
    pub kind: ContentKind,
    pub body: String,
}

pub struct ContentGenerationAgent {
    client: Arc<dyn CompletionClient>,
}

impl ContentGenerationAgent {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentBehavior for ContentGenerationAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ContentGeneration
    }

    async fn run(
        &self,
        record: &AgentRecord,
        input: &serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<AgentOutput, InvocationCause> {
        let input: ContentGenerationInput = parse_input(input)?;
        if input.job_title.trim().is_empty() {
            return Err(InvocationCause::RejectedInput("job title is empty".to_string()));
        }

        let prompt = build_prompt(&input, record.config_str("tone").unwrap_or("professional"));
        let body = self
            .client
            .complete(&record.api_binding, &prompt, max_tokens(record, 1024))
            .await?;

        Ok(AgentOutput::ContentGeneration(GeneratedContent {
            kind: input.kind,
            body: body.trim().to_string(),
        }))
    }
}

fn build_prompt(input: &ContentGenerationInput, tone: &str) -> String {
    let company = input.company.as_deref().unwrap_or("the employer");
    let task = match input.kind {
        ContentKind::CoverLetter => format!(
            "Write a concise cover letter for the {} role at {}.",
            input.job_title, company
        ),
        ContentKind::OutreachMessage => format!(
            "Write a short first-contact message to {} about the {} role at {}. Keep it under 120 words.",
            input.recipient.as_deref().unwrap_or("the recruiter"),
            input.job_title,
            company
        ),
        ContentKind::ResumeSummary => format!(
            "Write a three-sentence professional summary aimed at the {} role at {}.",
            input.job_title, company
        ),
    };

    let mut prompt = format!(
        "{}\nTone: {}.\nStay truthful: only use facts present in the resume.\n",
        task, tone
    );
    if let Some(resume) = &input.resume_text {
        prompt.push_str(&format!("\nResume:\n{}\n", resume));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{record, FakeClient};

    #[tokio::test]
    async fn test_generates_outreach_message() {
        let client = Arc::new(FakeClient::replying("  Hi Dana, I noticed your search...  \n"));
        let agent = ContentGenerationAgent::new(client.clone());
        let output = agent
            .run(
                &record("writer", AgentType::ContentGeneration),
                &serde_json::json!({
                    "kind": "outreach_message",
                    "job_title": "Platform Engineer",
                    "company": "Acme",
                    "recipient": "Dana"
                }),
                &InvocationContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            output,
            AgentOutput::ContentGeneration(GeneratedContent {
                kind: ContentKind::OutreachMessage,
                body: "Hi Dana, I noticed your search...".to_string(),
            })
        );
        let prompt = &client.prompts.lock().unwrap()[0];
        assert!(prompt.contains("Dana"));
        assert!(prompt.contains("Platform Engineer role at Acme"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_kind() {
        let agent = ContentGenerationAgent::new(Arc::new(FakeClient::replying("x")));
        let err = agent
            .run(
                &record("writer", AgentType::ContentGeneration),
                &serde_json::json!({"kind": "haiku", "job_title": "Engineer"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
    }

    #[test]
    fn test_prompt_uses_configured_tone_and_resume() {
        let input = ContentGenerationInput {
            kind: ContentKind::CoverLetter,
            job_title: "Data Engineer".to_string(),
            company: None,
            recipient: None,
            resume_text: Some("Built pipelines".to_string()),
        };
        let prompt = build_prompt(&input, "warm");
        assert!(prompt.contains("Tone: warm."));
        assert!(prompt.contains("the employer"));
        assert!(prompt.contains("Built pipelines"));
    }
}
