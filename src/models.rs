use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ScoutError;

// --- Agents ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    ResumeAnalysis,
    JobMatching,
    ContentGeneration,
    JobDiscovery,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::ResumeAnalysis,
        AgentType::JobMatching,
        AgentType::ContentGeneration,
        AgentType::JobDiscovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ResumeAnalysis => "resume_analysis",
            AgentType::JobMatching => "job_matching",
            AgentType::ContentGeneration => "content_generation",
            AgentType::JobDiscovery => "job_discovery",
        }
    }
}

impl FromStr for AgentType {
    type Err = ScoutError;

    // Accepts "job_discovery", "job-discovery" and "JobDiscovery".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "resumeanalysis" => Ok(AgentType::ResumeAnalysis),
            "jobmatching" => Ok(AgentType::JobMatching),
            "contentgeneration" => Ok(AgentType::ContentGeneration),
            "jobdiscovery" => Ok(AgentType::JobDiscovery),
            _ => Err(ScoutError::UnsupportedAgentType(s.to_string())),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how an agent reaches its external provider.
///
/// `credential_ref` names the environment variable holding the secret. The
/// secret itself is only read at call time.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiBinding {
    pub endpoint: String,
    pub credential_ref: Option<String>,
    pub model_name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for ApiBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiBinding")
            .field("endpoint", &self.endpoint)
            .field(
                "credential_ref",
                &self.credential_ref.as_ref().map(|_| "<redacted>"),
            )
            .field("model_name", &self.model_name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Performance {
    pub average_response_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub total_runs: u64,
    pub success_count: u64,
}

impl Performance {
    /// Fold one invocation into the cumulative averages.
    pub fn record(&mut self, elapsed_ms: u64, succeeded: bool) {
        self.total_runs += 1;
        if succeeded {
            self.success_count += 1;
        }
        let n = self.total_runs as f64;
        self.average_response_time_ms += (elapsed_ms as f64 - self.average_response_time_ms) / n;
        self.success_rate = self.success_count as f64 / n;
        self.error_rate = 1.0 - self.success_rate;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    pub api_binding: ApiBinding,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub performance: Performance,
    pub version: String,
}

impl AgentRecord {
    pub fn new(name: &str, agent_type: AgentType, api_binding: ApiBinding) -> Self {
        Self {
            name: name.to_string(),
            agent_type,
            config: serde_json::Map::new(),
            api_binding,
            is_active: true,
            last_run_at: None,
            performance: Performance::default(),
            version: "1".to_string(),
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

// --- Schedules ---

pub const WEEKLY: &str = "weekly";
pub const DEFAULT_AGENT: &str = "job-discovery";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub frequency: String, // canonical: "weekly"
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduleSpec {
    pub fn weekly() -> Self {
        Self {
            frequency: WEEKLY.to_string(),
            next_run_at: None,
        }
    }

    /// Interval between runs, if the frequency is one we know how to space out.
    pub fn period(&self) -> Option<Duration> {
        match self.frequency.trim().to_lowercase().as_str() {
            "daily" => Some(Duration::days(1)),
            "weekly" => Some(Duration::weeks(1)),
            "monthly" => Some(Duration::days(30)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredJob {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub api_source: String, // "ai_discovery", legacy: "adzuna"
    pub found_at: DateTime<Utc>,
}

impl DiscoveredJob {
    /// Identity used to avoid appending the same job twice.
    pub fn dedup_key(&self) -> String {
        match &self.url {
            Some(url) if !url.trim().is_empty() => url.trim().to_lowercase(),
            _ => format!(
                "{}|||{}",
                self.title.trim().to_lowercase(),
                self.company.as_deref().unwrap_or("").trim().to_lowercase()
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchScheduleEntry {
    pub id: i64,
    pub user_id: i64,
    pub resume_id: Option<i64>,
    pub agent_name: String,
    pub search_type: String,
    pub search_approach: Option<String>,
    pub quality_level: Option<String>,
    pub criteria: SearchCriteria,
    pub schedule: ScheduleSpec,
    pub jobs_found: Vec<DiscoveredJob>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SearchScheduleEntry {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.schedule.next_run_at {
            Some(next) => next <= now,
            None => true,
        }
    }
}

/// Fields supplied when a user creates a recurring search.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub user_id: i64,
    pub resume_id: Option<i64>,
    pub agent_name: String,
    pub search_type: String,
    pub search_approach: Option<String>,
    pub quality_level: Option<String>,
    pub criteria: SearchCriteria,
    pub schedule: ScheduleSpec,
}

impl NewSchedule {
    /// Shape the new entry as it would be stored, for validation before insert.
    pub fn preview(&self) -> SearchScheduleEntry {
        SearchScheduleEntry {
            id: 0,
            user_id: self.user_id,
            resume_id: self.resume_id,
            agent_name: self.agent_name.clone(),
            search_type: self.search_type.clone(),
            search_approach: self.search_approach.clone(),
            quality_level: self.quality_level.clone(),
            criteria: self.criteria.clone(),
            schedule: self.schedule.clone(),
            jobs_found: Vec::new(),
            last_run_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

/// Partial update applied by `Database::update_schedule`.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub append_jobs: Vec<DiscoveredJob>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the stored error.
    pub last_error: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// --- Recruiters ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recruiter {
    #[serde(default)]
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin_url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub rating: Option<f64>,
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Recruiter {
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    NotContacted,
    Contacted,
    Responded,
    Declined,
}

impl OutreachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachStatus::NotContacted => "not_contacted",
            OutreachStatus::Contacted => "contacted",
            OutreachStatus::Responded => "responded",
            OutreachStatus::Declined => "declined",
        }
    }
}

impl FromStr for OutreachStatus {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "not_contacted" => Ok(OutreachStatus::NotContacted),
            "contacted" => Ok(OutreachStatus::Contacted),
            "responded" => Ok(OutreachStatus::Responded),
            "declined" => Ok(OutreachStatus::Declined),
            other => Err(ScoutError::ValidationError(format!(
                "unknown outreach status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachRecord {
    pub user_id: i64,
    pub recruiter_id: i64,
    pub status: OutreachStatus,
    pub last_contact_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecruiterMatch {
    pub recruiter: Recruiter,
    pub outreach: Option<OutreachRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub results: Vec<RecruiterMatch>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_parsing() {
        assert_eq!("job_discovery".parse::<AgentType>().unwrap(), AgentType::JobDiscovery);
        assert_eq!("ResumeAnalysis".parse::<AgentType>().unwrap(), AgentType::ResumeAnalysis);
        assert_eq!("content-generation".parse::<AgentType>().unwrap(), AgentType::ContentGeneration);

        let err = "sentiment".parse::<AgentType>().unwrap_err();
        assert!(matches!(err, ScoutError::UnsupportedAgentType(ref t) if t == "sentiment"));
    }

    #[test]
    fn test_performance_cumulative_average() {
        let mut perf = Performance::default();
        perf.record(100, true);
        perf.record(300, false);
        perf.record(200, true);

        assert_eq!(perf.total_runs, 3);
        assert_eq!(perf.success_count, 2);
        assert!((perf.average_response_time_ms - 200.0).abs() < 1e-9);
        assert!((perf.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((perf.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_api_binding_debug_redacts_credential() {
        let binding = ApiBinding {
            endpoint: "https://api.example.com/v1/chat/completions".to_string(),
            credential_ref: Some("SCOUT_SECRET_KEY".to_string()),
            model_name: "gpt-4o".to_string(),
            parameters: serde_json::Map::new(),
        };
        let debug = format!("{:?}", binding);
        assert!(!debug.contains("SCOUT_SECRET_KEY"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_dedup_key_prefers_url() {
        let now = Utc::now();
        let with_url = DiscoveredJob {
            title: "Engineer".to_string(),
            company: Some("Acme".to_string()),
            location: None,
            url: Some("https://Jobs.example.com/1".to_string()),
            api_source: "ai_discovery".to_string(),
            found_at: now,
        };
        assert_eq!(with_url.dedup_key(), "https://jobs.example.com/1");

        let without_url = DiscoveredJob { url: None, ..with_url };
        assert_eq!(without_url.dedup_key(), "engineer|||acme");
    }

    #[test]
    fn test_recruiter_full_name_handles_missing_parts() {
        let r = Recruiter {
            last_name: Some("Smith".to_string()),
            ..Default::default()
        };
        assert_eq!(r.full_name(), "Smith");
    }

    #[test]
    fn test_schedule_period() {
        assert_eq!(ScheduleSpec::weekly().period(), Some(Duration::weeks(1)));
        let odd = ScheduleSpec {
            frequency: "hourly".to_string(),
            next_run_at: None,
        };
        assert_eq!(odd.period(), None);
    }
}
