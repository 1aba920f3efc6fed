use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::supervisor::{KillReport, ProcessSupervisor};

/// What asked the console to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    UserStop,
    UserQuit,
    Signal(&'static str),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::UserStop => write!(f, "user stop"),
            ShutdownTrigger::UserQuit => write!(f, "user quit"),
            ShutdownTrigger::Signal(name) => write!(f, "signal {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call ran the cleanup.
    Performed(KillReport),
    /// An earlier call already did.
    AlreadyShuttingDown,
}

/// The single shutdown path: kill the worker processes, then publish the
/// exit request. Runs at most once no matter how many triggers fire.
pub struct ShutdownGate {
    fired: AtomicBool,
    supervisor: Arc<ProcessSupervisor>,
    kill_names: Vec<String>,
    exit_tx: watch::Sender<Option<ShutdownTrigger>>,
}

impl ShutdownGate {
    pub fn new(supervisor: Arc<ProcessSupervisor>, kill_names: Vec<String>) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            fired: AtomicBool::new(false),
            supervisor,
            kill_names,
            exit_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownTrigger>> {
        self.exit_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Synchronous so it can be called from a signal task, the command
    /// reader or any other thread.
    pub fn trigger(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%trigger, "shutdown already in progress");
            return ShutdownOutcome::AlreadyShuttingDown;
        }

        match self.supervisor.process() {
            Some(worker) => tracing::info!(
                %trigger,
                pid = ?worker.pid,
                working_dir = %worker.working_dir.display(),
                "shutting down"
            ),
            None => tracing::info!(
                %trigger,
                lifecycle = %self.supervisor.lifecycle(),
                "shutting down; no worker is running"
            ),
        }
        let report = self.supervisor.terminate_all(&self.kill_names);
        self.exit_tx.send_replace(Some(trigger));
        ShutdownOutcome::Performed(report)
    }
}

/// Resolves once the gate has published an exit request.
pub async fn wait_for_exit(rx: &mut watch::Receiver<Option<ShutdownTrigger>>) -> ShutdownTrigger {
    loop {
        if let Some(trigger) = *rx.borrow_and_update() {
            return trigger;
        }
        if rx.changed().await.is_err() {
            // sender dropped without a request; nothing will ever arrive
            std::future::pending::<()>().await;
        }
    }
}

/// OS signal handlers, registered when constructed so that a signal
/// arriving before anything awaits is still routed through the gate.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl SignalListener {
    /// Registers SIGINT, SIGTERM and SIGHUP on Unix, Ctrl-C on Windows.
    /// Must be called from within a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(windows)]
        {
            Ok(Self {
                ctrl_c: tokio::signal::windows::ctrl_c()?,
            })
        }
    }

    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
                _ = self.hangup.recv() => "SIGHUP",
            }
        }

        #[cfg(windows)]
        {
            self.ctrl_c.recv().await;
            "ctrl-c"
        }
    }

    /// Waits for the first signal and routes it through the gate.
    pub async fn forward(mut self, gate: Arc<ShutdownGate>) {
        let name = self.recv().await;
        gate.trigger(ShutdownTrigger::Signal(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gate() -> ShutdownGate {
        ShutdownGate::new(
            Arc::new(ProcessSupervisor::new()),
            vec!["no-such-worker-binary-7f3a".to_string()],
        )
    }

    #[test]
    fn second_trigger_is_a_no_op() {
        let gate = gate();
        let rx = gate.subscribe();

        let first = gate.trigger(ShutdownTrigger::Signal("SIGTERM"));
        assert!(matches!(first, ShutdownOutcome::Performed(_)));
        assert!(gate.is_shutting_down());

        let second = gate.trigger(ShutdownTrigger::UserStop);
        assert_eq!(second, ShutdownOutcome::AlreadyShuttingDown);

        // the first trigger is the one reported
        assert_eq!(*rx.borrow(), Some(ShutdownTrigger::Signal("SIGTERM")));
    }

    #[test]
    fn concurrent_triggers_run_cleanup_once() {
        let gate = Arc::new(gate());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    let trigger = if i % 2 == 0 {
                        ShutdownTrigger::UserQuit
                    } else {
                        ShutdownTrigger::Signal("SIGINT")
                    };
                    gate.trigger(trigger)
                })
            })
            .collect();

        let performed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, ShutdownOutcome::Performed(_)))
            .count();
        assert_eq!(performed, 1);
    }

    #[tokio::test]
    async fn wait_for_exit_sees_trigger_from_another_task() {
        let gate = Arc::new(gate());
        let mut rx = gate.subscribe();

        let remote = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.trigger(ShutdownTrigger::UserStop);
        });

        let trigger = tokio::time::timeout(Duration::from_secs(2), wait_for_exit(&mut rx))
            .await
            .unwrap();
        assert_eq!(trigger, ShutdownTrigger::UserStop);
    }

    #[tokio::test]
    async fn wait_for_exit_returns_immediately_if_already_fired() {
        let gate = gate();
        gate.trigger(ShutdownTrigger::UserQuit);
        let mut rx = gate.subscribe();
        assert_eq!(wait_for_exit(&mut rx).await, ShutdownTrigger::UserQuit);
    }

    #[tokio::test]
    async fn signal_listener_installs_without_firing() {
        let gate = Arc::new(gate());
        let listener = SignalListener::install().unwrap();

        let forwarded = tokio::time::timeout(
            Duration::from_millis(50),
            listener.forward(gate.clone()),
        )
        .await;
        assert!(forwarded.is_err());
        assert!(!gate.is_shutting_down());
    }

    #[test]
    fn trigger_display() {
        assert_eq!(ShutdownTrigger::UserStop.to_string(), "user stop");
        assert_eq!(ShutdownTrigger::Signal("SIGTERM").to_string(), "signal SIGTERM");
    }
}
