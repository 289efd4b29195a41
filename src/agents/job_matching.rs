use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{parse_input, AgentBehavior, AgentOutput, InvocationContext};
use crate::error::InvocationCause;
use crate::models::{AgentRecord, AgentType};

// Similarity above which a job term counts as present in the resume.
const TERM_MATCH_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCandidate {
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobMatchingInput {
    resume_text: String,
    jobs: Vec<JobCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMatch {
    pub job: JobCandidate,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Scores jobs against a resume locally, without an external call.
pub struct JobMatchingAgent;

#[async_trait]
impl AgentBehavior for JobMatchingAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::JobMatching
    }

    async fn run(
        &self,
        record: &AgentRecord,
        input: &serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<AgentOutput, InvocationCause> {
        let input: JobMatchingInput = parse_input(input)?;
        let resume_terms = terms(&input.resume_text);
        if resume_terms.is_empty() {
            return Err(InvocationCause::RejectedInput(
                "resume text has no usable terms".to_string(),
            ));
        }

        let min_score = record
            .config
            .get("min_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let mut matches: Vec<JobMatch> = input
            .jobs
            .into_iter()
            .map(|job| score_job(job, &resume_terms))
            .filter(|m| m.score >= min_score)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.job.title.cmp(&b.job.title))
        });

        Ok(AgentOutput::JobMatching(matches))
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

fn score_job(job: JobCandidate, resume_terms: &BTreeSet<String>) -> JobMatch {
    let text = format!(
        "{} {}",
        job.title,
        job.description.as_deref().unwrap_or("")
    );
    let job_terms = terms(&text);
    if job_terms.is_empty() {
        return JobMatch {
            job,
            score: 0.0,
            matched_terms: Vec::new(),
        };
    }

    let mut total = 0.0;
    let mut matched_terms = Vec::new();
    for term in &job_terms {
        let best = resume_terms
            .iter()
            .map(|r| strsim::jaro_winkler(term, r))
            .fold(0.0, f64::max);
        if best >= TERM_MATCH_THRESHOLD {
            matched_terms.push(term.clone());
        }
        total += best;
    }

    let score = (total / job_terms.len() as f64 * 1000.0).round() / 10.0;
    JobMatch {
        job,
        score,
        matched_terms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::record;

    fn candidate(title: &str, description: &str) -> serde_json::Value {
        serde_json::json!({"title": title, "description": description})
    }

    #[tokio::test]
    async fn test_ranks_closer_job_first() {
        let input = serde_json::json!({
            "resume_text": "Senior Rust engineer. Tokio, PostgreSQL, Kubernetes.",
            "jobs": [
                candidate("Pastry Chef", "croissants and laminated dough"),
                candidate("Rust Engineer", "tokio postgresql kubernetes"),
            ]
        });

        let output = JobMatchingAgent
            .run(&record("matcher", AgentType::JobMatching), &input, &InvocationContext::default())
            .await
            .unwrap();

        let AgentOutput::JobMatching(matches) = output else {
            panic!("expected job matches");
        };
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].job.title, "Rust Engineer");
        assert!(matches[0].score > matches[1].score);
        assert!(matches[0].matched_terms.contains(&"rust".to_string()));
    }

    #[tokio::test]
    async fn test_min_score_filters_weak_matches() {
        let mut agent_record = record("matcher", AgentType::JobMatching);
        agent_record
            .config
            .insert("min_score".to_string(), serde_json::json!(95.0));

        let input = serde_json::json!({
            "resume_text": "rust tokio",
            "jobs": [candidate("Rust", "tokio"), candidate("Gardener", "hedges")]
        });
        let output = JobMatchingAgent
            .run(&agent_record, &input, &InvocationContext::default())
            .await
            .unwrap();

        let AgentOutput::JobMatching(matches) = output else {
            panic!("expected job matches");
        };
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].job.title, "Rust");
    }

    #[tokio::test]
    async fn test_rejects_missing_jobs_field() {
        let err = JobMatchingAgent
            .run(
                &record("matcher", AgentType::JobMatching),
                &serde_json::json!({"resume_text": "rust"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
    }
}
