//! lpmake process supervision.
//!
//! Spawns the builder, streams stdout and stderr line by line, drives the
//! synthetic progress counter and kills the child when either cancellation
//! signal fires. lpmake reports no progress of its own, so a 100 ms tick
//! advances the counter by one up to [`PROGRESS_CAP`]; exit forces 100,
//! including exit after a kill.

use crate::command::BuilderCommand;
use crate::error::BuildError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Interval between synthetic progress increments.
pub const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// Highest value the tick alone may reach.
pub const PROGRESS_CAP: u32 = 90;

/// Output of a running builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    Line(String),
    Progress(u32),
}

/// Run `command` to completion.
///
/// Returns `Ok(())` on exit status zero. `cancel_rx` is the caller's token and
/// `stop_rx` the orchestrator's own stop signal; either one flipping to `true`
/// kills the child and yields [`BuildError::Cancelled`].
pub async fn run_builder<F>(
    command: &BuilderCommand,
    mut on_event: F,
    mut cancel_rx: watch::Receiver<bool>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), BuildError>
where
    F: FnMut(ExecutorEvent),
{
    let program = command.program.display().to_string();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BuildError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    log::info!(target: "parsed", "[Build] Spawned {} (pid {:?})", program, child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BuildError::Io("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BuildError::Io("Failed to capture stderr".to_string()))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_closed = false;
    let mut stderr_closed = false;

    // A dropped sender must not spin the select loop
    let mut cancel_open = true;
    let mut stop_open = true;

    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;
    let mut progress = 0u32;

    if *cancel_rx.borrow_and_update() || *stop_rx.borrow_and_update() {
        return kill_child(&mut child, &mut on_event).await;
    }

    loop {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_closed => match line {
                Ok(Some(line)) => emit_line(&mut on_event, line),
                Ok(None) => stdout_closed = true,
                Err(e) => {
                    log::warn!("[Build] stdout read error: {}", e);
                    stdout_closed = true;
                }
            },
            line = stderr_lines.next_line(), if !stderr_closed => match line {
                Ok(Some(line)) => emit_line(&mut on_event, line),
                Ok(None) => stderr_closed = true,
                Err(e) => {
                    log::warn!("[Build] stderr read error: {}", e);
                    stderr_closed = true;
                }
            },
            status = child.wait(), if stdout_closed && stderr_closed => {
                on_event(ExecutorEvent::Progress(100));
                let status = status.map_err(|e| BuildError::Io(e.to_string()))?;
                return match status.code() {
                    Some(0) => {
                        log::info!(target: "parsed", "[Build] lpmake completed successfully");
                        Ok(())
                    }
                    Some(code) => {
                        log::error!("[Build] lpmake exited with code {}", code);
                        Err(BuildError::ExitedWithCode(code))
                    }
                    None => {
                        log::error!("[Build] lpmake terminated by signal");
                        Err(BuildError::Terminated)
                    }
                };
            }
            _ = ticker.tick() => {
                if progress < PROGRESS_CAP {
                    progress += 1;
                    on_event(ExecutorEvent::Progress(progress));
                }
            }
            changed = cancel_rx.changed(), if cancel_open => {
                if changed.is_err() {
                    cancel_open = false;
                } else if *cancel_rx.borrow_and_update() {
                    log::warn!("[Build] Cancellation requested, killing lpmake");
                    return kill_child(&mut child, &mut on_event).await;
                }
            }
            changed = stop_rx.changed(), if stop_open => {
                if changed.is_err() {
                    stop_open = false;
                } else if *stop_rx.borrow_and_update() {
                    log::warn!("[Build] Stop requested, killing lpmake");
                    return kill_child(&mut child, &mut on_event).await;
                }
            }
        }
    }
}

fn emit_line<F: FnMut(ExecutorEvent)>(on_event: &mut F, line: String) {
    log::info!("[lpmake] {}", line);
    on_event(ExecutorEvent::Line(line));
}

async fn kill_child<F: FnMut(ExecutorEvent)>(
    child: &mut tokio::process::Child,
    on_event: &mut F,
) -> Result<(), BuildError> {
    // kill() also reaps the child
    if let Err(e) = child.kill().await {
        log::warn!("[Build] Failed to kill lpmake: {}", e);
    }
    on_event(ExecutorEvent::Progress(100));
    Err(BuildError::Cancelled)
}
