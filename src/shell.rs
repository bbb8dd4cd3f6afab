//! Shell command execution for the agent loop.
//!
//! Commands come from the model, an untrusted actor. Nothing here filters
//! them: any hardening (sandboxing, allow-lists) wraps [`ShellRunner`].

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Upper bound on combined captured stdout and stderr.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Shell used when neither an override nor `$SHELL` is available.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Exit code reported when the process gives none of its own.
const FAILURE_EXIT_CODE: i32 = 1;

/// Outcome of one command. Always fully populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShellResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run a command string and report the outcome.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    /// Run `command`. Never fails; problems show up in the result.
    async fn run(&self, command: &str) -> ShellResult;
}

/// Runs commands as `<shell> -c <command>` on the local machine.
#[derive(Debug, Clone)]
pub struct SystemShell {
    shell: String,
    max_output: usize,
}

impl SystemShell {
    /// Build with the resolution order: override, `$SHELL`, fallback.
    pub fn new(shell_override: Option<&str>) -> Self {
        Self::with_env(shell_override, std::env::var("SHELL").ok())
    }

    fn with_env(shell_override: Option<&str>, env_shell: Option<String>) -> Self {
        let shell = resolve_shell(shell_override, env_shell);
        Self {
            shell,
            max_output: MAX_OUTPUT_BYTES,
        }
    }

    /// Change the output cap.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

fn resolve_shell(shell_override: Option<&str>, env_shell: Option<String>) -> String {
    shell_override
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| env_shell.filter(|s| !s.is_empty()))
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(&self, command: &str) -> ShellResult {
        debug!("running via {}: {}", self.shell, command);

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to launch {}: {}", self.shell, e);
                return ShellResult {
                    stdout: String::new(),
                    stderr: format!("failed to launch {}: {}", self.shell, e),
                    exit_code: FAILURE_EXIT_CODE,
                };
            }
        };

        let mut captured = Captured::default();
        let outcome = capture(&mut child, &mut captured, self.max_output).await;

        let exit_code = match outcome {
            Ok(CaptureEnd::Eof) => match child.wait().await {
                Ok(status) => status.code().unwrap_or(FAILURE_EXIT_CODE),
                Err(e) => {
                    captured.note(&format!("failed to wait for command: {}", e));
                    FAILURE_EXIT_CODE
                }
            },
            Ok(CaptureEnd::Overflow) => {
                warn!("command output exceeded {} bytes, killing it", self.max_output);
                let _ = child.kill().await;
                captured.note(&format!(
                    "output exceeded the {} byte limit; command was terminated",
                    self.max_output
                ));
                FAILURE_EXIT_CODE
            }
            Err(e) => {
                let _ = child.kill().await;
                captured.note(&format!("failed to read command output: {}", e));
                FAILURE_EXIT_CODE
            }
        };

        let result = captured.into_result(exit_code);
        debug!(
            "exit={} stdout={}B stderr={}B",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );
        result
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Captured {
    fn len(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }

    /// Append a diagnostic line to stderr.
    fn note(&mut self, message: &str) {
        if !self.stderr.is_empty() && !self.stderr.ends_with(b"\n") {
            self.stderr.push(b'\n');
        }
        self.stderr.extend_from_slice(message.as_bytes());
        self.stderr.push(b'\n');
    }

    fn into_result(self, exit_code: i32) -> ShellResult {
        ShellResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code,
        }
    }
}

enum CaptureEnd {
    Eof,
    Overflow,
}

/// Drain both pipes concurrently until EOF or the cap is crossed.
async fn capture(
    child: &mut Child,
    captured: &mut Captured,
    max_output: usize,
) -> std::io::Result<CaptureEnd> {
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(std::io::Error::other("command pipes not available"));
    };

    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            read = stdout.read(&mut out_buf), if !out_done => {
                let n = read?;
                if n == 0 {
                    out_done = true;
                } else {
                    captured.stdout.extend_from_slice(&out_buf[..n]);
                }
            }
            read = stderr.read(&mut err_buf), if !err_done => {
                let n = read?;
                if n == 0 {
                    err_done = true;
                } else {
                    captured.stderr.extend_from_slice(&err_buf[..n]);
                }
            }
        }

        if captured.len() > max_output {
            return Ok(CaptureEnd::Overflow);
        }
    }
    Ok(CaptureEnd::Eof)
}
