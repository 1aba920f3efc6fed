use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};

use super::amount::Tokens;
use super::module::{ModuleState, PendingTransition, TransitionRule};

/// Static description of a module the console tracks from startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    /// Key of this module's entry in the balance endpoint's `earned` map.
    pub reward_source: String,
    /// Status applied when the session starts.
    pub initial_status: Option<String>,
    pub rule: Option<TransitionRule>,
}

/// Progress of the startup credential handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Pending,
    Registered,
    /// Handshake attempts exhausted; running degraded.
    AwaitingRegistration,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "registering"),
            RegistrationStatus::Registered => write!(f, "registered"),
            RegistrationStatus::AwaitingRegistration => write!(f, "awaiting registration"),
        }
    }
}

/// Balance totals derived from the module rewards and the withdrawn amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateBalance {
    pub total_rewards: Tokens,
    pub withdrawn: Tokens,
    /// `total_rewards - withdrawn`; not clamped at zero.
    pub balance: Tokens,
}

/// A fully parsed balance payload, applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub withdrawn: Tokens,
    pub earned: Vec<(String, Tokens)>,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub modules: Vec<ModuleState>,
    pub balance: AggregateBalance,
    pub registration: RegistrationStatus,
    pub last_poll: Option<DateTime<Local>>,
}

/// A promotion fired by [`StateReconciler::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTransition {
    pub module: String,
    pub from: String,
    pub to: String,
}

/// Aggregate state for every monitored module.
///
/// Time is always passed in by the caller, so promotion scheduling and
/// firing can be driven deterministically.
#[derive(Debug, Clone)]
pub struct StateReconciler {
    modules: Vec<ModuleState>,
    // reward source -> module name
    sources: HashMap<String, String>,
    withdrawn: Tokens,
    registration: RegistrationStatus,
    last_poll: Option<DateTime<Local>>,
}

impl StateReconciler {
    pub fn new(specs: &[ModuleSpec]) -> Self {
        let modules = specs
            .iter()
            .map(|spec| ModuleState::new(spec.name.clone(), spec.rule.clone()))
            .collect();
        let sources = specs
            .iter()
            .map(|spec| (spec.reward_source.clone(), spec.name.clone()))
            .collect();
        Self {
            modules,
            sources,
            withdrawn: Tokens::ZERO,
            registration: RegistrationStatus::Pending,
            last_poll: None,
        }
    }

    /// Applies each spec's initial status, scheduling promotions where a
    /// rule matches.
    pub fn seed(&mut self, specs: &[ModuleSpec], now: Instant) {
        for spec in specs {
            if let Some(status) = &spec.initial_status {
                self.apply_info(&spec.name, status, now);
            }
        }
    }

    fn module_mut(&mut self, name: &str) -> &mut ModuleState {
        let idx = match self.modules.iter().position(|m| m.name() == name) {
            Some(idx) => idx,
            None => {
                tracing::info!(module = name, "tracking new module");
                self.modules.push(ModuleState::new(name, None));
                self.modules.len() - 1
            }
        };
        &mut self.modules[idx]
    }

    pub fn apply_info(&mut self, module: &str, status: &str, now: Instant) {
        self.module_mut(module).observe(status, now);
    }

    pub fn apply_rewards(&mut self, module: &str, amount: Tokens) {
        let m = self.module_mut(module);
        if amount < m.reward {
            tracing::debug!(
                module,
                previous = %m.reward,
                current = %amount,
                "reward corrected downwards"
            );
        }
        m.reward = amount;
    }

    pub fn apply_withdrawn(&mut self, amount: Tokens) {
        self.withdrawn = amount;
    }

    /// Applies every reward source and the withdrawn amount of one payload.
    /// Sources without a configured module become modules of their own.
    pub fn apply_balance(&mut self, update: &BalanceUpdate) {
        for (source, amount) in &update.earned {
            let module = self
                .sources
                .get(source)
                .cloned()
                .unwrap_or_else(|| source.clone());
            self.apply_rewards(&module, *amount);
        }
        self.apply_withdrawn(update.withdrawn);
    }

    /// Fires every pending transition whose deadline is at or before `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<FiredTransition> {
        self.modules
            .iter_mut()
            .filter_map(|m| {
                m.fire_due(now).map(|PendingTransition { source, target, .. }| FiredTransition {
                    module: m.name().to_string(),
                    from: source,
                    to: target,
                })
            })
            .collect()
    }

    pub fn set_registration(&mut self, status: RegistrationStatus) {
        self.registration = status;
    }

    pub fn mark_polled(&mut self, at: DateTime<Local>) {
        self.last_poll = Some(at);
    }

    pub fn aggregate(&self) -> AggregateBalance {
        let total_rewards: Tokens = self.modules.iter().map(|m| m.reward).sum();
        AggregateBalance {
            total_rewards,
            withdrawn: self.withdrawn,
            balance: total_rewards - self.withdrawn,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            modules: self.modules.clone(),
            balance: self.aggregate(),
            registration: self.registration,
            last_poll: self.last_poll,
        }
    }
}

/// Thread-safe handle to the [`StateReconciler`].
///
/// Every method takes the lock for exactly one reconciler call; no lock is
/// ever held across an `.await`.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<StateReconciler>>,
}

impl SharedState {
    pub fn new(reconciler: StateReconciler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reconciler)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateReconciler> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed(&self, specs: &[ModuleSpec], now: Instant) {
        self.lock().seed(specs, now);
    }

    pub fn apply_info(&self, module: &str, status: &str, now: Instant) {
        self.lock().apply_info(module, status, now);
    }

    pub fn apply_balance(&self, update: &BalanceUpdate) {
        self.lock().apply_balance(update);
    }

    pub fn tick(&self, now: Instant) -> Vec<FiredTransition> {
        self.lock().tick(now)
    }

    pub fn set_registration(&self, status: RegistrationStatus) {
        self.lock().set_registration(status);
    }

    pub fn mark_polled(&self, at: DateTime<Local>) {
        self.lock().mark_polled(at);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TOKEN: i128 = 1_000_000_000_000_000_000;

    fn tokens(raw: &str) -> Tokens {
        Tokens::parse_base_units(raw).unwrap()
    }

    fn spec(name: &str, source: &str, rule: Option<TransitionRule>) -> ModuleSpec {
        ModuleSpec {
            name: name.into(),
            reward_source: source.into(),
            initial_status: None,
            rule,
        }
    }

    fn standby_rule() -> TransitionRule {
        TransitionRule {
            transient: "Initiating".into(),
            target: "Standby".into(),
            delay: Duration::from_secs(10),
        }
    }

    fn status_of(state: &StateReconciler, module: &str) -> String {
        state
            .snapshot()
            .modules
            .into_iter()
            .find(|m| m.name() == module)
            .map(|m| m.status)
            .unwrap()
    }

    #[test]
    fn storage_promotes_to_standby_after_delay() {
        let t0 = Instant::now();
        let mut state = StateReconciler::new(&[spec("Storage", "storage", Some(standby_rule()))]);

        state.apply_info("Storage", "Initiating", t0);

        assert!(state.tick(t0 + Duration::from_secs(5)).is_empty());
        assert_eq!(status_of(&state, "Storage"), "Initiating");

        let fired = state.tick(t0 + Duration::from_secs(11));
        assert_eq!(
            fired,
            vec![FiredTransition {
                module: "Storage".into(),
                from: "Initiating".into(),
                to: "Standby".into(),
            }]
        );
        assert_eq!(status_of(&state, "Storage"), "Standby");
    }

    #[test]
    fn last_transient_update_wins_before_tick() {
        let t0 = Instant::now();
        let mut state = StateReconciler::new(&[spec("AI", "ai", Some(standby_rule()))]);

        state.apply_info("AI", "Initiating", t0);
        state.apply_info("AI", "Running", t0 + Duration::from_secs(1));
        state.apply_info("AI", "Initiating", t0 + Duration::from_secs(2));

        // rescheduled from the last transient update
        assert!(state.tick(t0 + Duration::from_secs(11)).is_empty());
        assert_eq!(status_of(&state, "AI"), "Initiating");
        state.tick(t0 + Duration::from_secs(12));
        assert_eq!(status_of(&state, "AI"), "Standby");
    }

    #[test]
    fn superseding_update_prevents_promotion() {
        let t0 = Instant::now();
        let mut state = StateReconciler::new(&[spec("AI", "ai", Some(standby_rule()))]);

        state.apply_info("AI", "Initiating", t0);
        state.apply_info("AI", "Busy", t0 + Duration::from_secs(3));
        assert!(state.tick(t0 + Duration::from_secs(30)).is_empty());
        assert_eq!(status_of(&state, "AI"), "Busy");
    }

    #[test]
    fn seed_schedules_initial_promotions() {
        let t0 = Instant::now();
        let mut specs = vec![
            spec("Storage", "storage", Some(standby_rule())),
            spec("Delivery", "delivery", None),
        ];
        specs[0].initial_status = Some("Initiating".into());
        specs[1].initial_status = Some("Standby".into());

        let mut state = StateReconciler::new(&specs);
        state.seed(&specs, t0);

        let snap = state.snapshot();
        assert_eq!(snap.modules[0].status, "Initiating");
        assert!(snap.modules[0].pending.is_some());
        assert_eq!(snap.modules[1].status, "Standby");
        assert!(snap.modules[1].pending.is_none());
    }

    #[test]
    fn balance_scenario_from_earned_sources() {
        let mut state = StateReconciler::new(&[]);
        state.apply_balance(&BalanceUpdate {
            withdrawn: tokens("1000000000000000000"),
            earned: vec![
                ("a".into(), tokens("2000000000000000000")),
                ("b".into(), tokens("500000000000000000")),
            ],
        });

        let agg = state.aggregate();
        assert_eq!(agg.total_rewards, Tokens::from_base_units(5 * TOKEN / 2));
        assert_eq!(agg.withdrawn, Tokens::from_base_units(TOKEN));
        assert_eq!(agg.balance, Tokens::from_base_units(3 * TOKEN / 2));
        assert_eq!(agg.balance.to_string(), "1.50000000");
    }

    #[test]
    fn reward_sources_map_onto_configured_modules() {
        let mut state = StateReconciler::new(&[spec("Transcoding", "transcode", None)]);
        state.apply_balance(&BalanceUpdate {
            withdrawn: Tokens::ZERO,
            earned: vec![("transcode".into(), Tokens::from_base_units(TOKEN))],
        });

        let snap = state.snapshot();
        assert_eq!(snap.modules.len(), 1);
        assert_eq!(snap.modules[0].name(), "Transcoding");
        assert_eq!(snap.modules[0].reward, Tokens::from_base_units(TOKEN));
    }

    #[test]
    fn balance_is_rewards_minus_withdrawn_for_any_interleaving() {
        let mut state = StateReconciler::new(&[
            spec("Storage", "storage", None),
            spec("AI", "ai", None),
        ]);
        let t0 = Instant::now();

        let steps: Vec<Box<dyn Fn(&mut StateReconciler)>> = vec![
            Box::new(|s: &mut StateReconciler| {
                s.apply_rewards("Storage", Tokens::from_base_units(3 * TOKEN))
            }),
            Box::new(|s: &mut StateReconciler| {
                s.apply_withdrawn(Tokens::from_base_units(5 * TOKEN))
            }),
            Box::new(move |s: &mut StateReconciler| s.apply_info("AI", "Standby", t0)),
            Box::new(|s: &mut StateReconciler| {
                s.apply_rewards("AI", Tokens::from_base_units(TOKEN / 3))
            }),
            // a decrease is reflected as-is
            Box::new(|s: &mut StateReconciler| {
                s.apply_rewards("Storage", Tokens::from_base_units(TOKEN))
            }),
            Box::new(|s: &mut StateReconciler| {
                s.apply_rewards("Delivery", Tokens::from_base_units(7))
            }),
        ];

        let mut withdrawn = Tokens::ZERO;
        for step in &steps {
            step(&mut state);
            let snap = state.snapshot();
            withdrawn = snap.balance.withdrawn;
            let sum: Tokens = snap.modules.iter().map(|m| m.reward).sum();
            assert_eq!(snap.balance.total_rewards, sum);
            assert_eq!(snap.balance.balance, sum - withdrawn);
        }
        // withdrawn exceeds rewards: surfaced as a negative balance
        assert!(state.aggregate().balance.is_negative());
        assert_eq!(withdrawn, Tokens::from_base_units(5 * TOKEN));
    }

    #[test]
    fn unknown_module_is_created_on_first_update() {
        let mut state = StateReconciler::new(&[]);
        state.apply_info("Relay", "Standby", Instant::now());
        let snap = state.snapshot();
        assert_eq!(snap.modules.len(), 1);
        assert_eq!(snap.modules[0].name(), "Relay");
    }

    #[test]
    fn shared_state_serializes_writers() {
        let shared = SharedState::new(StateReconciler::new(&[spec("AI", "ai", None)]));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared.apply_balance(&BalanceUpdate {
                        withdrawn: Tokens::from_base_units(i),
                        earned: vec![("ai".into(), Tokens::from_base_units(i * 10))],
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = shared.snapshot();
        // whichever writer went last, both fields come from the same payload
        assert_eq!(
            snap.balance.total_rewards.base_units(),
            snap.balance.withdrawn.base_units() * 10
        );
    }

    #[test]
    fn registration_status_is_part_of_snapshot() {
        let shared = SharedState::new(StateReconciler::new(&[]));
        assert_eq!(shared.snapshot().registration, RegistrationStatus::Pending);
        shared.set_registration(RegistrationStatus::AwaitingRegistration);
        assert_eq!(
            shared.snapshot().registration.to_string(),
            "awaiting registration"
        );
    }
}
