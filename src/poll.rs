use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::time::{MissedTickBehavior, interval, sleep};

use crate::remote::NodeApi;
use crate::state::{RegistrationStatus, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
}

/// What happened to one field during a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Applied,
    /// The endpoint gave no answer; state untouched.
    Unavailable,
    /// The endpoint answered with something unusable; state untouched.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub info: FieldOutcome,
    pub balance: FieldOutcome,
}

/// Retry behavior for the startup credential handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(2),
        }
    }
}

/// Registers the wallet credentials with the node, retrying up to
/// `policy.max_attempts` times. Never fails: exhaustion puts the console in
/// degraded mode.
///
/// `on_attempt(attempt, max)` is called before each attempt.
pub async fn register<A: NodeApi>(
    api: &A,
    state: &SharedState,
    policy: RetryPolicy,
    mut on_attempt: impl FnMut(u32, u32),
) -> RegistrationStatus {
    state.set_registration(RegistrationStatus::Pending);

    for attempt in 1..=policy.max_attempts {
        on_attempt(attempt, policy.max_attempts);
        if api.register_credentials().await.is_some() {
            tracing::info!(attempt, "credentials registered with node");
            state.set_registration(RegistrationStatus::Registered);
            return RegistrationStatus::Registered;
        }
        tracing::debug!(attempt, max = policy.max_attempts, "registration attempt failed");
        if attempt < policy.max_attempts {
            sleep(policy.delay).await;
        }
    }

    tracing::error!(
        attempts = policy.max_attempts,
        "credential registration failed; running in awaiting-registration mode"
    );
    state.set_registration(RegistrationStatus::AwaitingRegistration);
    RegistrationStatus::AwaitingRegistration
}

/// Periodically fetches node info and balance and feeds them into the
/// shared state. The only writer of remote-derived data.
pub struct PollLoop<A> {
    api: Arc<A>,
    state: SharedState,
    status_module: String,
    phase: PollPhase,
}

impl<A: NodeApi> PollLoop<A> {
    pub fn new(api: Arc<A>, state: SharedState, status_module: impl Into<String>) -> Self {
        Self {
            api,
            state,
            status_module: status_module.into(),
            phase: PollPhase::Idle,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// One fetch-and-reconcile pass. Info and balance are independent: a
    /// failure in one leaves the other's update intact, and neither is ever
    /// applied partially.
    pub async fn cycle(&mut self) -> CycleReport {
        self.phase = PollPhase::Polling;

        let info = match self.api.fetch_info().await {
            Some(info) if info.status.trim().is_empty() => {
                FieldOutcome::Rejected("empty status".to_string())
            }
            Some(info) => {
                self.state
                    .apply_info(&self.status_module, &info.status, Instant::now());
                FieldOutcome::Applied
            }
            None => FieldOutcome::Unavailable,
        };

        let balance = match self.api.fetch_balance().await {
            Some(raw) => match raw.to_update() {
                Ok(update) => {
                    if let Some(reported) = &raw.balance {
                        tracing::debug!(reported = %reported, "node-reported balance");
                    }
                    self.state.apply_balance(&update);
                    FieldOutcome::Applied
                }
                Err(e) => FieldOutcome::Rejected(e.to_string()),
            },
            None => FieldOutcome::Unavailable,
        };

        if info == FieldOutcome::Applied || balance == FieldOutcome::Applied {
            self.state.mark_polled(Local::now());
        }
        for (field, outcome) in [("info", &info), ("balance", &balance)] {
            if let FieldOutcome::Rejected(reason) = outcome {
                tracing::warn!(field, reason = %reason, "discarding malformed node response");
            }
        }

        self.phase = PollPhase::Idle;
        CycleReport { info, balance }
    }

    /// Polls forever on `every`. Slow cycles delay the next tick instead of
    /// stacking up.
    pub async fn run(mut self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = self.cycle().await;
            debug_assert_eq!(self.phase(), PollPhase::Idle);
            tracing::debug!(info = ?report.info, balance = ?report.balance, "poll cycle finished");
        }
    }
}
