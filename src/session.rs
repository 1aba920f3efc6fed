use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::BufReader;
use tokio::time::{MissedTickBehavior, interval};

use crate::commands::read_commands;
use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::poll::{PollLoop, RetryPolicy, register};
use crate::remote::NodeApi;
use crate::shutdown::{ShutdownGate, ShutdownTrigger, SignalListener, wait_for_exit};
use crate::state::{SharedState, StateReconciler};
use crate::supervisor::{ProcessSupervisor, WorkerLaunch};
use crate::ui::{Dashboard, DiskUsage, RegistrationProgress};

const DISK_REFRESH_TICKS: u32 = 10;

/// Which terminal-facing parts of the session are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub dashboard: bool,
    pub interactive: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            dashboard: true,
            interactive: true,
        }
    }
}

/// One console run: spawn the worker, register, then poll until shutdown.
pub struct Session<A> {
    config: ConsoleConfig,
    launch: WorkerLaunch,
    api: Arc<A>,
    options: SessionOptions,
    supervisor: Arc<ProcessSupervisor>,
    gate: Arc<ShutdownGate>,
    state: SharedState,
}

impl<A: NodeApi + 'static> Session<A> {
    pub fn new(
        config: ConsoleConfig,
        launch: WorkerLaunch,
        api: Arc<A>,
        options: SessionOptions,
    ) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new());
        let gate = Arc::new(ShutdownGate::new(supervisor.clone(), config.worker.kill_names()));
        let state = SharedState::new(StateReconciler::new(&config.module_specs()));
        Self {
            config,
            launch,
            api,
            options,
            supervisor,
            gate,
            state,
        }
    }

    #[cfg(test)]
    pub fn gate(&self) -> Arc<ShutdownGate> {
        self.gate.clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    #[cfg(test)]
    pub fn supervisor(&self) -> Arc<ProcessSupervisor> {
        self.supervisor.clone()
    }

    /// Runs until the shutdown gate fires. Only a failure to spawn the
    /// worker returns an error, and in that case nothing else is started.
    /// A shutdown requested before the worker starts ends the run cleanly.
    pub async fn run(self) -> Result<ShutdownTrigger, ConsoleError> {
        if self.config.poll_may_overrun() {
            tracing::info!(
                poll_interval_ms = self.config.poll_interval_ms,
                request_timeout_ms = self.config.request_timeout_ms,
                "poll interval does not cover two request timeouts; slow cycles skip ticks"
            );
        }

        let mut exit_rx = self.gate.subscribe();
        let signals = match SignalListener::install() {
            Ok(listener) => Some(tokio::spawn(listener.forward(self.gate.clone()))),
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                None
            }
        };

        if let Err(e) = self.supervisor.start(&self.launch) {
            if let Some(signals) = signals {
                signals.abort();
            }
            if self.gate.is_shutting_down() {
                let trigger = wait_for_exit(&mut exit_rx).await;
                tracing::info!(%trigger, "shutdown requested before the worker started");
                return Ok(trigger);
            }
            return Err(e);
        }

        let specs = self.config.module_specs();
        self.state.seed(&specs, Instant::now());

        let commands = self.options.interactive.then(|| {
            tokio::spawn(read_commands(
                BufReader::new(tokio::io::stdin()),
                self.gate.clone(),
            ))
        });

        let transitions = run_transitions(self.state.clone(), self.config.tick_interval());
        let dashboard = run_dashboard(
            self.state.clone(),
            self.config.tick_interval(),
            self.options.dashboard,
            self.config.token_symbol.clone(),
            self.launch.working_dir.clone(),
            self.config.worker.disk_capacity_mb,
        );

        let policy = RetryPolicy {
            max_attempts: self.config.registration_attempts,
            delay: self.config.registration_delay(),
        };
        let poll = PollLoop::new(
            self.api.clone(),
            self.state.clone(),
            self.config.status_module.clone(),
        );
        let poll_interval = self.config.poll_interval();
        let api = self.api.clone();
        let state = self.state.clone();
        let show_progress = self.options.dashboard;
        let work = async move {
            let progress = RegistrationProgress::start(show_progress);
            let status =
                register(api.as_ref(), &state, policy, |n, max| progress.attempt(n, max)).await;
            progress.finish(status);
            poll.run(poll_interval).await;
        };

        let trigger = tokio::select! {
            trigger = wait_for_exit(&mut exit_rx) => trigger,
            _ = work => unreachable!("poll loop never returns"),
            _ = transitions => unreachable!("transition ticker never returns"),
            _ = dashboard => unreachable!("dashboard never returns"),
        };

        for task in signals.into_iter().chain(commands) {
            task.abort();
        }
        tracing::info!(%trigger, "console stopped");
        Ok(trigger)
    }
}

/// Fires due status promotions on its own clock, independent of polling.
async fn run_transitions(state: SharedState, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for fired in state.tick(Instant::now()) {
            tracing::info!(
                module = %fired.module,
                from = %fired.from,
                to = %fired.to,
                "status promoted"
            );
        }
    }
}

/// Redraws every tick; the data directory is re-measured every
/// `DISK_REFRESH_TICKS` ticks off the runtime threads.
async fn run_dashboard(
    state: SharedState,
    every: Duration,
    enabled: bool,
    symbol: String,
    working_dir: PathBuf,
    capacity_mb: u64,
) {
    if !enabled {
        return std::future::pending().await;
    }
    let dashboard = Dashboard::new(symbol);
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut disk = None;
    let mut ticks: u32 = 0;
    loop {
        ticker.tick().await;
        if ticks % DISK_REFRESH_TICKS == 0 {
            let dir = working_dir.clone();
            let measured = tokio::task::spawn_blocking(move || DiskUsage::measure(&dir, capacity_mb));
            match measured.await {
                Ok(Ok(usage)) => disk = Some(usage),
                Ok(Err(e)) => tracing::debug!(error = %e, "disk usage unavailable"),
                Err(e) => tracing::debug!(error = %e, "disk usage task failed"),
            }
        }
        ticks = ticks.wrapping_add(1);
        dashboard.draw(&state.snapshot(), disk.as_ref());
    }
}
