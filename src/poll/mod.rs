//! Bounded readiness polling
//!
//! Waits for the infrastructure pipeline to report a ready stack, under a
//! budget of attempts, an optional overall deadline, and a backoff-capable
//! interval. Exhausting the budget is not a failure: provisioning is owned by
//! a separate pipeline and may legitimately still be converging, so the
//! caller continues in degraded mode on [`PollOutcome::TimedOut`].

use std::time::Duration;
use tokio::time::Instant;

use crate::clients::{InfraStatusClient, InfrastructureStatus};

/// Polling budget and pacing
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between attempts; the first attempt runs immediately
    pub interval: Duration,
    /// Maximum number of status queries
    pub max_attempts: u32,
    /// Interval multiplier applied after each sleep; 1.0 keeps a fixed cadence
    pub backoff: f64,
    /// Ceiling for the backed-off interval
    pub max_interval: Duration,
    /// Overall wall-clock bound, checked before each sleep
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_attempts: 20,
            backoff: 1.0,
            max_interval: Duration::from_secs(120),
            deadline: None,
        }
    }
}

impl PollPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff).min(self.max_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    /// The provider reported the stack as failed; polling stops early rather
    /// than burning the remaining budget
    ProvisioningFailed { attempts: u32 },
}

/// Poll the stack status until ready or the budget runs out.
///
/// Status query errors consume an attempt with a warning; they are never
/// fatal here. The loop never sleeps after the final attempt.
pub async fn wait_for_ready(
    client: &dyn InfraStatusClient,
    provisioning_name: &str,
    policy: &PollPolicy,
) -> PollOutcome {
    let start = Instant::now();
    let mut interval = policy.interval;

    for attempt in 1..=policy.max_attempts {
        match client.status(provisioning_name).await {
            Ok(InfrastructureStatus::Ready) => {
                tracing::info!(
                    "Infrastructure {} ready after {} attempt(s)",
                    provisioning_name,
                    attempt
                );
                return PollOutcome::Ready { attempts: attempt };
            }
            Ok(InfrastructureStatus::Failed) => {
                tracing::warn!(
                    "Infrastructure {} reported failed provisioning on attempt {}",
                    provisioning_name,
                    attempt
                );
                return PollOutcome::ProvisioningFailed { attempts: attempt };
            }
            Ok(status) => {
                tracing::debug!(
                    "Infrastructure {} not ready ({:?}), attempt {}/{}",
                    provisioning_name,
                    status,
                    attempt,
                    policy.max_attempts
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Status query for {} failed on attempt {}/{}: {}",
                    provisioning_name,
                    attempt,
                    policy.max_attempts,
                    e
                );
            }
        }

        if attempt == policy.max_attempts {
            break;
        }

        if let Some(deadline) = policy.deadline {
            if start.elapsed() + interval >= deadline {
                tracing::warn!(
                    "Poll deadline {:?} would be exceeded, stopping after {} attempt(s)",
                    deadline,
                    attempt
                );
                return PollOutcome::TimedOut { attempts: attempt };
            }
        }

        tokio::time::sleep(interval).await;
        interval = policy.next_interval(interval);
    }

    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MockInfraStatusClient;

    fn fixed(interval_secs: u64, max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(interval_secs),
            max_attempts,
            ..PollPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_attempt_budget_when_never_ready() {
        let client = MockInfraStatusClient::never_ready();
        let policy = fixed(30, 5);

        let start = Instant::now();
        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 5 });
        assert_eq!(client.queries(), 5);
        // Four sleeps between five attempts, none after the last.
        assert_eq!(start.elapsed().as_secs(), 4 * 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_ends_polling() {
        let client = MockInfraStatusClient::never_ready()
            .then(InfrastructureStatus::Provisioning)
            .then(InfrastructureStatus::Unknown)
            .then(InfrastructureStatus::Ready);
        let policy = fixed(10, 10);

        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::Ready { attempts: 3 });
        assert_eq!(client.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_stops_early() {
        let client = MockInfraStatusClient::never_ready()
            .then(InfrastructureStatus::Provisioning)
            .then(InfrastructureStatus::Failed);
        let policy = fixed(10, 10);

        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::ProvisioningFailed { attempts: 2 });
        assert_eq!(client.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_consumes_attempt() {
        let client = MockInfraStatusClient::never_ready()
            .then_error("gateway timeout")
            .then(InfrastructureStatus::Ready);
        let policy = fixed(10, 3);

        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::Ready { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_growth_capped_at_max_interval() {
        let client = MockInfraStatusClient::never_ready();
        let policy = PollPolicy {
            interval: Duration::from_secs(10),
            max_attempts: 4,
            backoff: 2.0,
            max_interval: Duration::from_secs(15),
            deadline: None,
        };

        let start = Instant::now();
        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 4 });
        // Sleeps of 10s, then 15s capped, then 15s capped.
        assert_eq!(start.elapsed().as_secs(), 10 + 15 + 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_loop_early() {
        let client = MockInfraStatusClient::never_ready();
        let policy = PollPolicy {
            interval: Duration::from_secs(10),
            max_attempts: 100,
            backoff: 1.0,
            max_interval: Duration::from_secs(10),
            deadline: Some(Duration::from_secs(25)),
        };

        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(client.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempt_budget() {
        let client = MockInfraStatusClient::never_ready();
        let policy = fixed(10, 0);

        let outcome = wait_for_ready(&client, "app-212-stack", &policy).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 0 });
        assert_eq!(client.queries(), 0);
    }
}
