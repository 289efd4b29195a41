use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::{max_tokens, parse_input, AgentBehavior, AgentOutput, InvocationContext};
use crate::ai::CompletionClient;
use crate::error::InvocationCause;
use crate::models::{AgentRecord, AgentType, DiscoveredJob};

const DEFAULT_API_SOURCE: &str = "ai_discovery";
const DEFAULT_MAX_RESULTS: usize = 25;

#[derive(Debug, Deserialize)]
struct JobDiscoveryInput {
    search_type: String,
    keywords: Vec<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    resume_text: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct JobDiscoveryAgent {
    client: Arc<dyn CompletionClient>,
}

impl JobDiscoveryAgent {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentBehavior for JobDiscoveryAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::JobDiscovery
    }

    async fn run(
        &self,
        record: &AgentRecord,
        input: &serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<AgentOutput, InvocationCause> {
        let input: JobDiscoveryInput = parse_input(input)?;
        let keywords: Vec<&str> = input
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(InvocationCause::RejectedInput(
                "job discovery needs at least one keyword".to_string(),
            ));
        }

        let max_results = input
            .max_results
            .or_else(|| {
                record
                    .config
                    .get("max_results")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
            })
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let mut prompt = format!(
            "Find up to {} current job openings for this {} search.\n\
            Keywords: {}\n\
            Location: {}\n\n\
            Return one job per line, EXACTLY in this format and nothing else:\n\
            JOB: <title> | <company> | <location> | <url>\n\
            Use - for any unknown field.\n",
            max_results,
            input.search_type,
            keywords.join(", "),
            input.location.as_deref().unwrap_or("any"),
        );
        if let Some(resume) = &input.resume_text {
            prompt.push_str(&format!("\nPrefer roles that fit this resume:\n{}\n", resume));
        }

        let response = self
            .client
            .complete(&record.api_binding, &prompt, max_tokens(record, 4096))
            .await?;

        let api_source = record.config_str("api_source").unwrap_or(DEFAULT_API_SOURCE);
        let jobs = parse_jobs(&response, api_source, ctx, max_results);
        Ok(AgentOutput::JobDiscovery(jobs))
    }
}

fn field(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-")
        .map(String::from)
}

fn parse_jobs(
    response: &str,
    api_source: &str,
    ctx: &InvocationContext,
    max_results: usize,
) -> Vec<DiscoveredJob> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for line in response.lines() {
        if jobs.len() >= max_results {
            break;
        }
        let Some(rest) = line.trim().strip_prefix("JOB:") else {
            continue;
        };
        let mut parts = rest.split('|');
        let Some(title) = field(parts.next()) else {
            continue;
        };

        let job = DiscoveredJob {
            title,
            company: field(parts.next()),
            location: field(parts.next()),
            url: field(parts.next()),
            api_source: api_source.to_string(),
            found_at: ctx.requested_at,
        };
        if seen.insert(job.dedup_key()) {
            jobs.push(job);
        }
    }

    jobs
}
