use std::time::{Duration, Instant};

use super::amount::Tokens;

/// Timer-based promotion rule for a module whose transient status is not
/// always followed by an explicit update from the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub transient: String,
    pub target: String,
    pub delay: Duration,
}

/// A promotion scheduled for a module, fired by [`super::StateReconciler::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub fire_at: Instant,
    /// Status the module held when the promotion was scheduled.
    pub source: String,
    pub target: String,
}

/// Status and reward tracking for one monitored module of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleState {
    name: String,
    pub status: String,
    pub reward: Tokens,
    pub pending: Option<PendingTransition>,
    pub(super) rule: Option<TransitionRule>,
}

impl ModuleState {
    pub fn new(name: impl Into<String>, rule: Option<TransitionRule>) -> Self {
        Self {
            name: name.into(),
            status: String::new(),
            reward: Tokens::ZERO,
            pending: None,
            rule,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records an observed status, cancelling or scheduling the promotion as
    /// needed. Last write wins.
    pub(super) fn observe(&mut self, status: &str, now: Instant) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.source != status)
        {
            tracing::debug!(module = %self.name, status, "pending transition cancelled");
            self.pending = None;
        }

        self.status = status.to_string();

        let Some(rule) = &self.rule else { return };
        if rule.transient != status {
            return;
        }
        let already_scheduled = self
            .pending
            .as_ref()
            .is_some_and(|p| p.source == rule.transient && p.target == rule.target);
        if !already_scheduled {
            self.pending = Some(PendingTransition {
                fire_at: now + rule.delay,
                source: rule.transient.clone(),
                target: rule.target.clone(),
            });
            tracing::debug!(
                module = %self.name,
                from = %rule.transient,
                to = %rule.target,
                delay_ms = rule.delay.as_millis() as u64,
                "transition scheduled"
            );
        }
    }

    /// Fires the pending transition if it is due. Returns the fired
    /// transition, if any.
    pub(super) fn fire_due(&mut self, now: Instant) -> Option<PendingTransition> {
        if self.pending.as_ref().is_none_or(|p| p.fire_at > now) {
            return None;
        }
        let fired = self.pending.take()?;
        self.status = fired.target.clone();
        Some(fired)
    }
}
