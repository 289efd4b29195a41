use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::agents::{AgentBehavior, AgentOutput, InvocationContext};
use crate::config::Config;
use crate::error::{InvocationCause, Result, ScoutError};
use crate::models::AgentType;
use crate::registry::AgentRegistry;

/// Timeout and retry settings for one invocation.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.agent_timeout,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
        }
    }

    /// Exponential backoff with up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.backoff_base.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        base + jitter
    }
}

pub struct AgentDispatcher {
    registry: Arc<AgentRegistry>,
    behaviors: HashMap<AgentType, Arc<dyn AgentBehavior>>,
    policy: DispatchPolicy,
}

impl AgentDispatcher {
    pub fn new(registry: Arc<AgentRegistry>, policy: DispatchPolicy) -> Self {
        Self {
            registry,
            behaviors: HashMap::new(),
            policy,
        }
    }

    pub fn with_behaviors(mut self, behaviors: Vec<Arc<dyn AgentBehavior>>) -> Self {
        for behavior in behaviors {
            self.behaviors.insert(behavior.agent_type(), behavior);
        }
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run the named agent on `input`.
    ///
    /// Lookup failures (unknown, inactive, no behavior for the type) return
    /// before anything is recorded. Otherwise exactly one outcome is folded
    /// into the agent's performance, however many attempts it took.
    pub async fn invoke(
        &self,
        name: &str,
        input: &serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<AgentOutput> {
        let record = self.registry.resolve(name, true).await?;
        let behavior = self
            .behaviors
            .get(&record.agent_type)
            .cloned()
            .ok_or_else(|| ScoutError::UnsupportedAgentType(record.agent_type.to_string()))?;

        let invoked_at = Utc::now();
        let started = Instant::now();
        let mut attempt = 0;

        let outcome = loop {
            let result = match tokio::time::timeout(
                self.policy.timeout,
                behavior.run(&record, input, ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(InvocationCause::Timeout),
            };

            match result {
                Ok(output) => break Ok(output),
                Err(cause) if cause.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    attempt += 1;
                    warn!(
                        agent = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Agent call failed ({}), retrying",
                        cause
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(cause) => break Err(cause),
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                let perf = self.registry.record_outcome(name, elapsed_ms, true).await?;
                self.registry.mark_run(name, invoked_at).await?;
                info!(
                    agent = name,
                    agent_type = %record.agent_type,
                    elapsed_ms,
                    success_rate = perf.success_rate,
                    "Agent invocation succeeded"
                );
                Ok(output)
            }
            Err(cause) => {
                let perf = self.registry.record_outcome(name, elapsed_ms, false).await?;
                warn!(
                    agent = name,
                    elapsed_ms,
                    attempts = attempt + 1,
                    error_rate = perf.error_rate,
                    "Agent invocation failed: {}",
                    cause
                );
                debug!(agent = name, user = ?ctx.user_id, schedule = ?ctx.schedule_id, "Surfacing failure to caller");
                Err(ScoutError::AgentInvocationFailed {
                    agent_name: name.to_string(),
                    cause,
                })
            }
        }
    }
}
