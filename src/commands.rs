use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::shutdown::{ShutdownGate, ShutdownTrigger};

/// Interactive commands accepted on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "s" | "stop" | "p" | "pause" => Some(ConsoleCommand::Stop),
            "q" | "quit" | "exit" => Some(ConsoleCommand::Quit),
            _ => None,
        }
    }

    fn trigger(self) -> ShutdownTrigger {
        match self {
            ConsoleCommand::Stop => ShutdownTrigger::UserStop,
            ConsoleCommand::Quit => ShutdownTrigger::UserQuit,
        }
    }
}

/// Reads commands line by line until one of them shuts the console down.
/// EOF ends the reader but leaves the console running.
pub async fn read_commands<R>(input: R, gate: Arc<ShutdownGate>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let next = lines.next_line().await;
        if gate.is_shutting_down() {
            return;
        }
        match next {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                Some(cmd) => {
                    gate.trigger(cmd.trigger());
                    return;
                }
                None => tracing::warn!(
                    input = %line.trim(),
                    "unknown command; use `s` to stop or `q` to quit"
                ),
            },
            Ok(None) => {
                tracing::debug!("stdin closed; interactive commands disabled");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                return;
            }
        }
    }
}
