//! C2 — Process Launcher.
//!
//! A small facade over OS process spawn/signal/wait primitives. Grounded on
//! `acp/process.rs` (piped-stdio spawn with `kill_on_drop`,
//! SIGTERM-then-timeout-then-SIGKILL, capped stderr capture) and
//! `original_source/app/core/base/process_launcher.py` (argv/env/cwd
//! shape, per-process logging).

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt as _, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Bytes of stderr retained per child, so a misbehaving worker cannot
/// exhaust the supervisor's memory.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// A spawned child process and the background task draining its stderr.
pub struct LaunchedProcess {
    pub pid: u32,
    stderr_task: JoinHandle<String>,
}

impl LaunchedProcess {
    /// Collect the captured stderr tail. Consumes the background task.
    pub async fn stderr_tail(self) -> String {
        self.stderr_task.await.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub argv: Vec<String>,
    pub working_dir: Option<std::path::PathBuf>,
    pub env: Vec<(String, String)>,
}

/// OS-level process primitives, deliberately ignorant of exit codes beyond
/// "is this PID alive".
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Spawn a detached child, piping its stderr into a bounded background
    /// capture task for diagnostics. Does not wait for the child.
    pub fn spawn(&self, spec: &SpawnSpec, process_label: &str) -> Result<LaunchedProcess> {
        let Some((program, args)) = spec.argv.split_first() else {
            return Err(Error::SpawnFailure {
                process: process_label.to_string(),
                detail: "empty argv".to_string(),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        tracing::info!(process = process_label, argv = ?spec.argv, "launching process");

        let mut child = cmd.spawn().map_err(|e| Error::SpawnFailure {
            process: process_label.to_string(),
            detail: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| Error::SpawnFailure {
            process: process_label.to_string(),
            detail: "process exited immediately after spawn".to_string(),
        })?;

        let stderr = child.stderr.take();
        let label = process_label.to_string();
        let stderr_task = tokio::spawn(async move {
            // Detach the child itself onto a reaper so `child` doesn't need
            // to live inside this task; we only care about its stderr here.
            let reap_label = label.clone();
            tokio::spawn(async move {
                if let Err(error) = child.wait().await {
                    tracing::debug!(process = %reap_label, %error, "child wait() failed");
                }
            });

            let Some(stderr) = stderr else {
                return String::new();
            };
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::with_capacity(4096);
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let remaining = MAX_STDERR_BYTES.saturating_sub(buf.len());
                        if remaining > 0 {
                            buf.extend_from_slice(&chunk[..n.min(remaining)]);
                        }
                    }
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        Ok(LaunchedProcess { pid, stderr_task })
    }

    /// Send a termination request and poll liveness every 0.5s up to
    /// `timeout`. Returns whether the process exited within the deadline.
    pub async fn send_graceful_signal(&self, pid: u32, timeout: Duration) -> bool {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.is_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        !self.is_alive(pid)
    }

    /// Unconditional kill; waits briefly and reports whether it succeeded.
    pub async fn send_kill(&self, pid: u32) -> bool {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        !self.is_alive(pid)
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        crate::status::is_pid_alive(pid)
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawning_empty_argv_is_a_spawn_failure() {
        let launcher = ProcessLauncher::new();
        let spec = SpawnSpec::default();
        let result = launcher.spawn(&spec, "test");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn is_alive_is_false_for_a_pid_that_cannot_exist() {
        let launcher = ProcessLauncher::new();
        // PID 1 typically exists (init); an implausibly large PID does not.
        assert!(!launcher.is_alive(u32::MAX - 1));
    }

    #[tokio::test]
    async fn spawned_process_reports_a_pid_and_exits_cleanly() {
        let launcher = ProcessLauncher::new();
        let spec = SpawnSpec {
            argv: vec!["true".to_string()],
            ..Default::default()
        };
        let launched = launcher.spawn(&spec, "test-true").unwrap();
        assert!(launched.pid > 0);
        let _ = launched.stderr_tail().await;
    }
}
