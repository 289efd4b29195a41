//! Periodic execution of recurring searches.
//!
//! Each tick enumerates due entries, skips legacy ones, and dispatches the
//! rest concurrently under a fixed number of worker permits. A failing
//! entry is recorded on that entry and never stops its siblings.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentOutput, InvocationContext, JobCandidate, JobMatch};
use crate::db::{Database, ScheduleFilter};
use crate::dispatcher::AgentDispatcher;
use crate::error::{Result, ScoutError};
use crate::models::{
    AgentType, DiscoveredJob, NewSchedule, SchedulePatch, SearchScheduleEntry,
};
use crate::reconciler::{Classification, ScheduleReconciler};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub due: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_legacy: usize,
    pub not_started: usize,
    pub jobs_appended: usize,
}

/// The part of the scheduler a spawned task needs.
#[derive(Clone)]
struct EntryRunner {
    db: Arc<Database>,
    dispatcher: Arc<AgentDispatcher>,
}

impl EntryRunner {
    async fn run(&self, entry: SearchScheduleEntry) -> Result<usize> {
        let started = Utc::now();
        let resume_text = match entry.resume_id {
            Some(id) => self.db.get_resume(id).await?.map(|r| r.content),
            None => None,
        };

        let ctx = InvocationContext {
            user_id: Some(entry.user_id),
            schedule_id: Some(entry.id),
            requested_at: started,
        };
        let outcome = self.discover(&entry, resume_text.as_deref(), &ctx).await;

        match outcome {
            Ok(jobs) => {
                let found = jobs.len();
                let appended = self
                    .db
                    .update_schedule(
                        entry.id,
                        &SchedulePatch {
                            append_jobs: jobs,
                            last_run_at: Some(started),
                            next_run_at: entry.schedule.period().map(|p| started + p),
                            last_error: Some(None),
                        },
                    )
                    .await?;
                info!(entry = entry.id, found, appended, "Schedule entry ran");
                Ok(appended)
            }
            Err(e) => {
                warn!(entry = entry.id, agent = %entry.agent_name, "Schedule entry failed: {}", e);
                self.db
                    .update_schedule(
                        entry.id,
                        &SchedulePatch {
                            last_error: Some(Some(e.to_string())),
                            ..Default::default()
                        },
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Discovery, then optional ranking by the agent named in `match_with`.
    async fn discover(
        &self,
        entry: &SearchScheduleEntry,
        resume_text: Option<&str>,
        ctx: &InvocationContext,
    ) -> Result<Vec<DiscoveredJob>> {
        let input = serde_json::json!({
            "search_type": entry.search_type,
            "keywords": entry.criteria.keywords,
            "location": entry.criteria.location,
            "resume_text": resume_text,
        });

        let jobs = match self.dispatcher.invoke(&entry.agent_name, &input, ctx).await? {
            AgentOutput::JobDiscovery(jobs) => jobs,
            other => {
                return Err(ScoutError::ValidationError(format!(
                    "agent '{}' produced {} output, not discovered jobs",
                    entry.agent_name,
                    other.agent_type()
                )));
            }
        };

        let registry = self.dispatcher.registry();
        let matcher = registry
            .resolve(&entry.agent_name, false)
            .await?
            .config_str("match_with")
            .map(String::from);

        match (matcher, resume_text) {
            (Some(matcher), Some(resume)) if !jobs.is_empty() => {
                Ok(self.rank(&matcher, resume, jobs, ctx).await)
            }
            _ => Ok(jobs),
        }
    }

    async fn rank(
        &self,
        matcher: &str,
        resume_text: &str,
        jobs: Vec<DiscoveredJob>,
        ctx: &InvocationContext,
    ) -> Vec<DiscoveredJob> {
        let candidates: Vec<JobCandidate> = jobs
            .iter()
            .map(|j| JobCandidate {
                title: j.title.clone(),
                company: j.company.clone(),
                description: j.location.clone(),
                url: j.url.clone(),
            })
            .collect();
        let input = serde_json::json!({ "resume_text": resume_text, "jobs": candidates });

        match self.dispatcher.invoke(matcher, &input, ctx).await {
            Ok(AgentOutput::JobMatching(matches)) => {
                debug!(matcher, kept = matches.len(), of = jobs.len(), "Ranked discovered jobs");
                reorder(jobs, &matches)
            }
            Ok(other) => {
                warn!(matcher, output = %other.agent_type(), "Ranking agent is not a job matcher, keeping discovery order");
                jobs
            }
            Err(e) => {
                warn!(matcher, "Ranking failed, keeping discovery order: {}", e);
                jobs
            }
        }
    }

}

/// Order `jobs` by the matcher's ranking. Jobs the matcher filtered out are dropped.
fn reorder(jobs: Vec<DiscoveredJob>, matches: &[JobMatch]) -> Vec<DiscoveredJob> {
    let mut pool: Vec<Option<DiscoveredJob>> = jobs.into_iter().map(Some).collect();
    let mut ranked = Vec::with_capacity(matches.len());
    for m in matches {
        let slot = pool.iter_mut().find(|slot| match slot {
            Some(j) => j.title == m.job.title && j.company == m.job.company && j.url == m.job.url,
            None => false,
        });
        if let Some(job) = slot.and_then(Option::take) {
            ranked.push(job);
        }
    }
    ranked
}

pub struct Scheduler {
    runner: EntryRunner,
    reconciler: Arc<ScheduleReconciler>,
    worker_limit: usize,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Arc<AgentDispatcher>,
        reconciler: Arc<ScheduleReconciler>,
        worker_limit: usize,
    ) -> Self {
        Self {
            runner: EntryRunner { db, dispatcher },
            reconciler,
            worker_limit: worker_limit.max(1),
        }
    }

    fn db(&self) -> &Database {
        &self.runner.db
    }

    /// Create a recurring search after checking it is current and runnable.
    pub async fn create_schedule(&self, new: &NewSchedule) -> Result<i64> {
        if new.user_id <= 0 {
            return Err(ScoutError::ValidationError("user_id must be positive".to_string()));
        }
        if new.criteria.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ScoutError::ValidationError(
                "a search needs at least one keyword".to_string(),
            ));
        }
        self.reconciler.ensure_valid(&new.preview())?;

        let agent = self.runner.dispatcher.registry().resolve(&new.agent_name, false).await?;
        if agent.agent_type != AgentType::JobDiscovery {
            return Err(ScoutError::ValidationError(format!(
                "agent '{}' is a {} agent; schedules need a job_discovery agent",
                agent.name, agent.agent_type
            )));
        }
        if let Some(resume_id) = new.resume_id {
            if self.db().get_resume(resume_id).await?.is_none() {
                return Err(ScoutError::not_found("resume", resume_id));
            }
        }

        let id = self.db().insert_schedule(new).await?;
        info!(entry = id, user = new.user_id, agent = %new.agent_name, "Created schedule entry");
        Ok(id)
    }

    /// Unregister an agent and delete its stored record, unless a current
    /// schedule entry still uses it.
    pub async fn remove_agent(&self, name: &str) -> Result<()> {
        let filter = ScheduleFilter {
            agent_name: Some(name.to_string()),
            ..Default::default()
        };
        let valid: Vec<SearchScheduleEntry> = self
            .db()
            .find_schedules(&filter)
            .await?
            .into_iter()
            .filter(|e| self.reconciler.classify(e) == Classification::Valid)
            .collect();

        self.runner.dispatcher.registry().unregister(name, &valid).await?;
        info!(agent = name, "Removed agent");
        Ok(())
    }

    /// Run every due, current entry once.
    pub async fn run_due(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let now = Utc::now();
        let entries = self.db().find_schedules(&ScheduleFilter::all()).await?;
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        for entry in entries.into_iter().filter(|e| e.is_due(now)) {
            summary.due += 1;

            if self.reconciler.classify(&entry) == Classification::Legacy {
                warn!(
                    entry = entry.id,
                    reasons = ?self.reconciler.legacy_reasons(&entry),
                    "Skipping legacy schedule entry"
                );
                summary.skipped_legacy += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.not_started += 1;
                continue;
            };

            let runner = self.runner.clone();
            let id = entry.id;
            tasks.spawn(async move {
                let _permit = permit;
                (id, runner.run(entry).await)
            });
            summary.dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(appended))) => {
                    summary.succeeded += 1;
                    summary.jobs_appended += appended;
                }
                Ok((id, Err(e))) => {
                    debug!(entry = id, "Counted failed entry: {}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("Schedule task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        if cancel.is_cancelled() && summary.not_started > 0 {
            info!(not_started = summary.not_started, "Cancelled before all entries were started");
        }
        Ok(summary)
    }

    /// Tick every `interval` until cancelled.
    pub async fn run_forever(&self, interval: Duration, cancel: CancellationToken) -> Result<()> {
        let plan = self.reconciler.plan(self.db()).await?;
        if plan.legacy_found > 0 {
            warn!(
                legacy = plan.legacy_found,
                "Legacy schedule entries present; they will be skipped until `scout reconcile` removes them"
            );
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_due(&cancel).await {
                        Ok(summary) => info!(
                            due = summary.due,
                            succeeded = summary.succeeded,
                            failed = summary.failed,
                            skipped_legacy = summary.skipped_legacy,
                            jobs = summary.jobs_appended,
                            "Scheduler tick finished"
                        ),
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}
