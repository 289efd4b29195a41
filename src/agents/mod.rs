//! Per-type agent behavior.
//!
//! Each [`AgentType`] has exactly one [`AgentBehavior`] implementation. The
//! dispatcher picks the implementation by the record's type and hands it
//! the raw JSON payload; the behavior owns the shape of its own input.

mod content_generation;
mod job_discovery;
mod job_matching;
mod resume_analysis;

pub use content_generation::{ContentGenerationAgent, GeneratedContent};
pub use job_discovery::JobDiscoveryAgent;
pub use job_matching::{JobCandidate, JobMatch, JobMatchingAgent};
pub use resume_analysis::{ResumeAnalysisAgent, ResumeFindings};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::ai::CompletionClient;
use crate::error::InvocationCause;
use crate::models::{AgentRecord, AgentType, DiscoveredJob};

/// Who asked for an invocation, and when.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub user_id: Option<i64>,
    pub schedule_id: Option<i64>,
    pub requested_at: DateTime<Utc>,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self {
            user_id: None,
            schedule_id: None,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum AgentOutput {
    ResumeAnalysis(ResumeFindings),
    JobMatching(Vec<JobMatch>),
    ContentGeneration(GeneratedContent),
    JobDiscovery(Vec<DiscoveredJob>),
}

impl AgentOutput {
    pub fn agent_type(&self) -> AgentType {
        match self {
            AgentOutput::ResumeAnalysis(_) => AgentType::ResumeAnalysis,
            AgentOutput::JobMatching(_) => AgentType::JobMatching,
            AgentOutput::ContentGeneration(_) => AgentType::ContentGeneration,
            AgentOutput::JobDiscovery(_) => AgentType::JobDiscovery,
        }
    }
}

#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn agent_type(&self) -> AgentType;

    async fn run(
        &self,
        record: &AgentRecord,
        input: &serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<AgentOutput, InvocationCause>;
}

/// One behavior per agent type, all sharing the same external client.
pub fn default_behaviors(client: Arc<dyn CompletionClient>) -> Vec<Arc<dyn AgentBehavior>> {
    vec![
        Arc::new(ResumeAnalysisAgent::new(client.clone())),
        Arc::new(JobMatchingAgent),
        Arc::new(ContentGenerationAgent::new(client.clone())),
        Arc::new(JobDiscoveryAgent::new(client)),
    ]
}

pub(crate) fn parse_input<T: DeserializeOwned>(input: &serde_json::Value) -> Result<T, InvocationCause> {
    T::deserialize(input).map_err(|e| InvocationCause::RejectedInput(e.to_string()))
}

pub(crate) fn max_tokens(record: &AgentRecord, default: u32) -> u32 {
    record
        .config
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default)
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_behaviors_cover_every_type() {
        let client: Arc<dyn CompletionClient> = Arc::new(testing::FakeClient::replying("ok"));
        let behaviors = default_behaviors(client);
        for agent_type in AgentType::ALL {
            assert_eq!(
                behaviors.iter().filter(|b| b.agent_type() == agent_type).count(),
                1,
                "{} should have exactly one behavior",
                agent_type
            );
        }
    }

    #[test]
    fn test_output_serializes_with_type_tag() {
        let output = AgentOutput::JobMatching(vec![]);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["type"], "job_matching");
        assert_eq!(output.agent_type(), AgentType::JobMatching);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" rust, sql ,, go "), vec!["rust", "sql", "go"]);
        assert!(split_list("").is_empty());
    }
}
