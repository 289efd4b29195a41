//! Separates current recurring searches from legacy ones and purges the latter.
//!
//! Every legacy check goes through [`ScheduleReconciler::classify`]; the
//! scheduler, schedule creation and the purge all share it.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{Database, ScheduleFilter};
use crate::error::{Result, ScoutError};
use crate::models::SearchScheduleEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    Legacy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub legacy_found: usize,
    pub deleted: usize,
    pub remaining: usize,
}

pub struct ScheduleReconciler {
    deny: Option<Regex>,
    allowed_frequencies: Vec<String>,
}

impl ScheduleReconciler {
    pub fn new(deprecated_tokens: &[String], allowed_frequencies: &[String]) -> Result<Self> {
        let escaped: Vec<String> = deprecated_tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();

        let deny = if escaped.is_empty() {
            None
        } else {
            let pattern = escaped.join("|");
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ScoutError::ValidationError(format!("bad deprecated token list: {}", e)))?;
            Some(regex)
        };

        Ok(Self {
            deny,
            allowed_frequencies: allowed_frequencies
                .iter()
                .map(|f| f.trim().to_lowercase())
                .collect(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.deprecated_tokens, &config.allowed_frequencies)
    }

    fn denied(&self, value: &str) -> bool {
        self.deny.as_ref().is_some_and(|re| re.is_match(value))
    }

    /// Human-readable reasons an entry is legacy. Empty means valid.
    pub fn legacy_reasons(&self, entry: &SearchScheduleEntry) -> Vec<String> {
        let mut reasons = Vec::new();

        let frequency = entry.schedule.frequency.trim().to_lowercase();
        if !self.allowed_frequencies.contains(&frequency) {
            reasons.push(format!("frequency '{}'", entry.schedule.frequency));
        }

        let fields = [
            ("search_type", Some(entry.search_type.as_str())),
            ("search_approach", entry.search_approach.as_deref()),
            ("quality_level", entry.quality_level.as_deref()),
            ("frequency", Some(entry.schedule.frequency.as_str())),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                if self.denied(value) {
                    reasons.push(format!("{} '{}'", field, value));
                }
            }
        }

        if let Some(job) = entry.jobs_found.iter().find(|j| self.denied(&j.api_source)) {
            reasons.push(format!("job source '{}'", job.api_source));
        }

        reasons
    }

    pub fn classify(&self, entry: &SearchScheduleEntry) -> Classification {
        if self.legacy_reasons(entry).is_empty() {
            Classification::Valid
        } else {
            Classification::Legacy
        }
    }

    /// Refuse an entry that would be created in a legacy state.
    pub fn ensure_valid(&self, entry: &SearchScheduleEntry) -> Result<()> {
        let reasons = self.legacy_reasons(entry);
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ScoutError::InvalidScheduleState(format!(
                "legacy search configuration: {}",
                reasons.join(", ")
            )))
        }
    }

    async fn scan(&self, db: &Database) -> Result<(usize, Vec<i64>)> {
        let entries = db.find_schedules(&ScheduleFilter::all()).await?;
        let legacy: Vec<i64> = entries
            .iter()
            .filter(|e| self.classify(e) == Classification::Legacy)
            .map(|e| e.id)
            .collect();
        Ok((entries.len(), legacy))
    }

    /// Count legacy entries without touching anything.
    pub async fn plan(&self, db: &Database) -> Result<ReconcileReport> {
        let (scanned, legacy) = self.scan(db).await?;
        Ok(ReconcileReport {
            scanned,
            legacy_found: legacy.len(),
            deleted: 0,
            remaining: scanned,
        })
    }

    /// Delete every legacy entry. Deletion is permanent.
    pub async fn reconcile(&self, db: &Database) -> Result<ReconcileReport> {
        let (scanned, legacy) = self.scan(db).await?;
        info!(scanned, legacy_found = legacy.len(), "Schedule scan complete");

        if legacy.is_empty() {
            return Ok(ReconcileReport {
                scanned,
                legacy_found: 0,
                deleted: 0,
                remaining: scanned,
            });
        }

        warn!(
            ids = ?legacy,
            "Deleting {} legacy schedule entries; this cannot be undone",
            legacy.len()
        );
        let deleted = db
            .delete_schedules_where(&legacy, |entry| self.classify(entry) == Classification::Legacy)
            .await?;
        if deleted < legacy.len() {
            warn!(
                skipped = legacy.len() - deleted,
                "Some entries changed or vanished before deletion and were left alone"
            );
        }

        let remaining = db.count_schedules(&ScheduleFilter::all()).await? as usize;
        info!(deleted, remaining, "Legacy schedule cleanup finished");

        Ok(ReconcileReport {
            scanned,
            legacy_found: legacy.len(),
            deleted,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveredJob, NewSchedule, SchedulePatch, ScheduleSpec, SearchCriteria};
    use chrono::Utc;

    fn reconciler() -> ScheduleReconciler {
        ScheduleReconciler::new(&["adzuna".to_string()], &["weekly".to_string()]).unwrap()
    }

    fn search(user_id: i64, frequency: &str, approach: &str) -> NewSchedule {
        NewSchedule {
            user_id,
            resume_id: None,
            agent_name: "job-discovery".to_string(),
            search_type: "weekly_ai_discovery".to_string(),
            search_approach: Some(approach.to_string()),
            quality_level: Some("premium".to_string()),
            criteria: SearchCriteria {
                keywords: vec!["rust".to_string()],
                location: None,
            },
            schedule: ScheduleSpec {
                frequency: frequency.to_string(),
                next_run_at: None,
            },
        }
    }

    async fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().await.unwrap();
        db
    }

    #[test]
    fn test_classify_checks_every_field() {
        let r = reconciler();
        assert_eq!(r.classify(&search(1, "weekly", "ai_first").preview()), Classification::Valid);
        assert_eq!(r.classify(&search(1, "daily", "ai_first").preview()), Classification::Legacy);
        assert_eq!(r.classify(&search(1, "Weekly", "Adzuna_API").preview()), Classification::Legacy);

        let mut quality = search(1, "weekly", "ai_first").preview();
        quality.quality_level = Some("ADZUNA-basic".to_string());
        assert_eq!(r.classify(&quality), Classification::Legacy);

        let mut job_source = search(1, "weekly", "ai_first").preview();
        job_source.jobs_found.push(DiscoveredJob {
            title: "Engineer".to_string(),
            company: None,
            location: None,
            url: None,
            api_source: "adzuna".to_string(),
            found_at: Utc::now(),
        });
        assert_eq!(r.classify(&job_source), Classification::Legacy);
    }

    #[test]
    fn test_tokens_are_matched_literally() {
        let r = ScheduleReconciler::new(&["a.c".to_string()], &["weekly".to_string()]).unwrap();
        assert_eq!(r.classify(&search(1, "weekly", "abc").preview()), Classification::Valid);
        assert_eq!(r.classify(&search(1, "weekly", "x_a.c").preview()), Classification::Legacy);
    }

    #[test]
    fn test_ensure_valid_names_reasons() {
        let err = reconciler()
            .ensure_valid(&search(1, "daily", "adzuna").preview())
            .unwrap_err();
        match err {
            ScoutError::InvalidScheduleState(msg) => {
                assert!(msg.contains("frequency 'daily'"));
                assert!(msg.contains("search_approach 'adzuna'"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconcile_removes_legacy_and_is_idempotent() {
        let db = test_db().await;
        db.insert_schedule(&search(1, "daily", "adzuna")).await.unwrap();
        let keep = db.insert_schedule(&search(1, "weekly", "ai_first")).await.unwrap();

        let r = reconciler();
        let planned = r.plan(&db).await.unwrap();
        assert_eq!(planned.legacy_found, 1);
        assert_eq!(planned.deleted, 0);
        assert_eq!(db.count_schedules(&ScheduleFilter::all()).await.unwrap(), 2);

        let report = r.reconcile(&db).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                scanned: 2,
                legacy_found: 1,
                deleted: 1,
                remaining: 1,
            }
        );
        let left = db.find_schedules(&ScheduleFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, keep);

        let again = r.reconcile(&db).await.unwrap();
        assert_eq!(again.legacy_found, 0);
        assert_eq!(again.deleted, 0);
        assert_eq!(again.remaining, 1);
    }

    #[tokio::test]
    async fn test_reconcile_drops_external_api_daily_search() {
        let db = test_db().await;
        let mut old = search(1, "daily", "standard");
        old.search_type = "adzuna_api".to_string();
        old.search_approach = None;
        old.quality_level = None;
        let mut current = search(1, "weekly", "ai_first");
        current.search_approach = None;
        current.quality_level = None;
        db.insert_schedule(&old).await.unwrap();
        let keep = db.insert_schedule(&current).await.unwrap();

        let report = reconciler().reconcile(&db).await.unwrap();
        assert_eq!((report.scanned, report.legacy_found, report.deleted), (2, 1, 1));
        let left = db.find_schedules(&ScheduleFilter::all()).await.unwrap();
        assert_eq!(left.iter().map(|e| e.id).collect::<Vec<_>>(), vec![keep]);
    }

    #[tokio::test]
    async fn test_reconcile_mixed_population() {
        let db = test_db().await;
        let valid = 5;
        let legacy = 3;
        for user in 0..valid {
            db.insert_schedule(&search(user + 1, "weekly", "ai_first")).await.unwrap();
        }
        for user in 0..legacy {
            db.insert_schedule(&search(user + 1, "daily", "standard")).await.unwrap();
        }
        // A weekly search that only carries legacy job history
        let tainted = db.insert_schedule(&search(9, "weekly", "ai_first")).await.unwrap();
        db.update_schedule(
            tainted,
            &SchedulePatch {
                append_jobs: vec![DiscoveredJob {
                    title: "Old".to_string(),
                    company: None,
                    location: None,
                    url: Some("https://adzuna.example/1".to_string()),
                    api_source: "adzuna".to_string(),
                    found_at: Utc::now(),
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let r = reconciler();
        let report = r.reconcile(&db).await.unwrap();
        assert_eq!(report.scanned, 9);
        assert_eq!(report.deleted, 4);
        assert_eq!(report.remaining, valid as usize);

        let left = db.find_schedules(&ScheduleFilter::all()).await.unwrap();
        assert!(left.iter().all(|e| r.classify(e) == Classification::Valid));
    }

    #[test]
    fn test_empty_token_list_only_checks_frequency() {
        let r = ScheduleReconciler::new(&[], &["weekly".to_string()]).unwrap();
        assert_eq!(r.classify(&search(1, "weekly", "adzuna").preview()), Classification::Valid);
        assert_eq!(r.classify(&search(1, "daily", "adzuna").preview()), Classification::Legacy);
    }
}
