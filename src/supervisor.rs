//! Lifecycle of the single worker process.
//!
//! The worker is started once per session and killed on shutdown. Because
//! the worker may re-exec itself or start helpers it does not report, the
//! shutdown sweep matches processes by binary name rather than walking a
//! PID tree. A helper that renames itself is not found by the sweep.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sysinfo::{Pid, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::WorkerConfig;
use crate::error::ConsoleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Terminating,
    Terminated,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::NotStarted => write!(f, "not started"),
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Terminating => write!(f, "terminating"),
            Lifecycle::Terminated => write!(f, "terminated"),
        }
    }
}

/// Everything needed to spawn the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerLaunch {
    /// `<executable> -wd <working_dir> -dc <disk_capacity_mb> -ha <server_url>`
    pub fn from_config(worker: &WorkerConfig, server_url: &str) -> Self {
        let args = vec![
            OsString::from("-wd"),
            worker.working_dir.clone().into_os_string(),
            OsString::from("-dc"),
            OsString::from(worker.disk_capacity_mb.to_string()),
            OsString::from("-ha"),
            OsString::from(server_url),
        ];
        Self {
            executable: worker.executable.clone(),
            working_dir: worker.working_dir.clone(),
            args,
        }
    }
}

/// The spawned worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub pid: Option<u32>,
    pub working_dir: PathBuf,
}

/// Outcome of one [`ProcessSupervisor::terminate_all`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    /// Whether a kill was issued to the tracked child.
    pub child_signalled: bool,
    /// Processes in the sweep whose name matched.
    pub matched: usize,
    pub killed: usize,
    /// PIDs the kill signal could not be delivered to.
    pub failed: Vec<u32>,
}

#[derive(Debug)]
struct Inner {
    lifecycle: Lifecycle,
    child: Option<Child>,
    process: Option<SupervisedProcess>,
}

/// Owns exactly one worker child process.
#[derive(Debug)]
pub struct ProcessSupervisor {
    inner: Mutex<Inner>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::NotStarted,
                child: None,
                process: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn process(&self) -> Option<SupervisedProcess> {
        self.lock().process.clone()
    }

    /// Creates the working directory and spawns the worker with stdin
    /// detached. Stdout and stderr are forwarded to the `worker` log target.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, launch: &WorkerLaunch) -> Result<SupervisedProcess, ConsoleError> {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::NotStarted {
            return Err(ConsoleError::Config(format!(
                "worker already {}; only one worker per console",
                inner.lifecycle
            )));
        }

        std::fs::create_dir_all(&launch.working_dir)?;

        let mut child = Command::new(&launch.executable)
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConsoleError::Spawn {
                executable: launch.executable.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, true);
        }

        let process = SupervisedProcess {
            pid: child.id(),
            working_dir: launch.working_dir.clone(),
        };
        tracing::info!(
            pid = ?process.pid,
            executable = %launch.executable.display(),
            working_dir = %launch.working_dir.display(),
            "worker started"
        );

        inner.child = Some(child);
        inner.process = Some(process.clone());
        inner.lifecycle = Lifecycle::Running;
        Ok(process)
    }

    /// Kills the tracked child and every other process whose binary name is
    /// in `names`. Best effort and safe to call repeatedly. A supervisor that
    /// was never started refuses to start afterwards.
    pub fn terminate_all(&self, names: &[String]) -> KillReport {
        let mut report = KillReport::default();
        {
            let mut inner = self.lock();
            inner.lifecycle = Lifecycle::Terminating;
            if let Some(mut child) = inner.child.take() {
                match child.start_kill() {
                    Ok(()) => report.child_signalled = true,
                    Err(e) => tracing::debug!(error = %e, "worker already exited"),
                }
            }
        }

        sweep(names, &mut report);

        self.lock().lifecycle = Lifecycle::Terminated;
        tracing::info!(
            child = report.child_signalled,
            matched = report.matched,
            killed = report.killed,
            failed = report.failed.len(),
            "worker processes terminated"
        );
        report
    }
}

fn forward_output<R>(stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                tracing::warn!(target: "worker", "{line}");
            } else {
                tracing::debug!(target: "worker", "{line}");
            }
        }
    });
}

/// Whether a process is one of the worker binaries.
///
/// Compares the kernel process name and the file name of `argv[0]`; the
/// latter catches names the kernel truncated.
pub fn matches_worker(name: &str, cmd: &[String], targets: &[String]) -> bool {
    let argv0 = cmd
        .first()
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|f| f.to_str());
    targets
        .iter()
        .any(|t| name == t.as_str() || argv0 == Some(t.as_str()))
}

fn sweep(names: &[String], report: &mut KillReport) {
    if names.is_empty() {
        return;
    }

    let mut system = System::new();
    system.refresh_processes();
    let own_pid = sysinfo::get_current_pid().ok();

    for (pid, process) in system.processes() {
        if Some(*pid) == own_pid || !matches_worker(process.name(), process.cmd(), names) {
            continue;
        }
        report.matched += 1;
        if kill(*pid, process) {
            report.killed += 1;
        } else {
            tracing::warn!(
                pid = pid.as_u32(),
                name = process.name(),
                "failed to kill worker process"
            );
            report.failed.push(pid.as_u32());
        }
    }
}

fn kill(pid: Pid, process: &sysinfo::Process) -> bool {
    match process.kill_with(Signal::Kill) {
        Some(sent) => sent,
        // forced kill is not a signal on this platform
        None => {
            tracing::debug!(pid = pid.as_u32(), "SIGKILL unsupported, using default kill");
            process.kill()
        }
    }
}
