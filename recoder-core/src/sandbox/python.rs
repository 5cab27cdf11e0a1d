//! Python sandbox: one fresh `python3 -I` process per execution.

use super::capture::{self, Bounded};
use super::harness::{HarnessLimits, HarnessRequest, StdoutCapture, HARNESS};
use super::{ExecOutcome, ExecReport, ExecRequest, Executor, SandboxConfig};
use crate::error::{self, Error, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Extra room on the report line for the envelope and traceback
const REPORT_OVERHEAD_BYTES: usize = 16 * 1024;
/// How long to keep reading after the harness exited and its group was killed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs each request in its own interpreter process and scratch directory
#[derive(Debug, Clone, Default)]
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check that the interpreter starts, returning its version string
    pub async fn interpreter_version(&self) -> Result<String> {
        let output = Command::new(&self.config.interpreter)
            .args(["-I", "-c", "import sys; print(sys.version.split()[0])"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(10), output)
            .await
            .map_err(|_| Error::execution_timeout(Duration::from_secs(10)).with_operation("sandbox::interpreter_version"))?
            .map_err(|e| {
                Error::sandbox_unavailable(&self.config.interpreter, e.to_string())
                    .with_operation("sandbox::interpreter_version")
            })?;

        if !output.status.success() {
            return Err(Error::sandbox_unavailable(
                &self.config.interpreter,
                format!("version check exited with {}", output.status),
            )
            .with_operation("sandbox::interpreter_version"));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Largest report line the harness may print
    fn report_limit(&self) -> usize {
        self.config
            .output_limit_bytes
            .saturating_mul(4)
            .saturating_add(REPORT_OVERHEAD_BYTES)
    }

    fn payload(&self, request: &ExecRequest, nonce: &str) -> Result<Vec<u8>> {
        let payload = HarnessRequest {
            nonce,
            mode: request.mode,
            source: &request.source,
            limits: HarnessLimits {
                memory_bytes: self.config.memory_limit_mb.map(|mb| mb * 1024 * 1024),
                cpu_secs: self.config.cpu_limit_secs,
                output_limit: self.config.output_limit_bytes,
                report_limit: self.report_limit(),
                allow_network: self.config.allow_network,
                allow_filesystem: self.config.allow_filesystem,
            },
        };
        serde_json::to_vec(&payload)
            .map_err(|e| error::serialization_error(format!("encode harness request: {}", e)))
    }
}

impl Executor for PythonSandbox {
    #[instrument(skip_all, fields(mode = ?request.mode, source_len = request.source.len()))]
    async fn execute(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<ExecReport> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("execution").with_operation("sandbox::execute"));
        }

        let nonce = Uuid::new_v4().simple().to_string();
        let payload = self.payload(request, &nonce)?;
        let scratch = tempfile::Builder::new()
            .prefix("recoder-")
            .tempdir()
            .map_err(|e| error::io_error(format!("create scratch dir: {}", e)))?;

        let interpreter = &self.config.interpreter;
        let mut cmd = Command::new(interpreter);
        cmd.args(["-I", "-B", "-c", HARNESS])
            .current_dir(scratch.path())
            .env_clear()
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        // Own process group, so anything the code spawns dies with it.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(interpreter = %interpreter, "spawning sandbox interpreter");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            Error::sandbox_unavailable(interpreter, e.to_string()).with_operation("sandbox::execute")
        })?;
        let pgid = child.id();

        let (mut stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => return Err(error::io_error("sandbox pipes were not captured")),
        };

        let limit = self.config.output_limit_bytes;
        // The harness bounds the JSON; the tag and nonce come on top.
        let mut out = StdoutCapture::new(limit, self.report_limit().saturating_add(256));
        let mut err = Bounded::new(limit);

        let run = async {
            let exited = async {
                let feed = async {
                    stdin.write_all(&payload).await?;
                    stdin.shutdown().await?;
                    drop(stdin);
                    Ok::<_, std::io::Error>(())
                };
                let (fed, status) = tokio::join!(feed, child.wait());
                // A harness that died early closes stdin; the exit status says more.
                if let Err(e) = fed {
                    debug!(err = %e, "writing harness request failed");
                }
                status
            };
            let streams = async {
                let (o, e) = tokio::join!(capture::drain(stdout, &mut out), capture::drain(stderr, &mut err));
                o.and(e)
            };
            tokio::pin!(exited, streams);

            let mut drained = false;
            let status = loop {
                tokio::select! {
                    status = &mut exited => break status?,
                    res = &mut streams, if !drained => {
                        res?;
                        drained = true;
                    }
                }
            };

            // Leftover descendants may still hold the pipes open.
            kill_group(pgid);
            if !drained {
                match tokio::time::timeout(DRAIN_GRACE, &mut streams).await {
                    Ok(res) => res?,
                    Err(_) => warn!("sandbox pipes still open after exit, dropping the rest"),
                }
            }
            Ok::<_, std::io::Error>(status)
        };

        let finished = tokio::select! {
            res = tokio::time::timeout(self.config.timeout, run) => Some(res),
            _ = cancel.cancelled() => None,
        };

        let status = match finished {
            Some(Ok(res)) => res.map_err(|e| Error::from(e).with_operation("sandbox::execute"))?,
            Some(Err(_elapsed)) => {
                warn!(timeout_secs = self.config.timeout.as_secs(), "execution timed out, killing");
                kill_group(pgid);
                let _ = child.kill().await;
                return Err(Error::execution_timeout(self.config.timeout).with_operation("sandbox::execute"));
            }
            None => {
                debug!("execution cancelled, killing");
                kill_group(pgid);
                let _ = child.kill().await;
                return Err(Error::cancelled("execution").with_operation("sandbox::execute"));
            }
        };
        let duration = started.elapsed();

        let parsed = out.finish(&nonce);
        let stderr_truncated = err.truncated();
        if parsed.truncated > 0 || stderr_truncated > 0 {
            warn!(
                stdout_truncated = parsed.truncated,
                stderr_truncated,
                "sandbox output truncated"
            );
        }
        let mut stderr = err.to_string_lossy();

        let report = match parsed.report {
            Some(Ok(report)) if status.success() => {
                let outcome = match report.failure() {
                    None => ExecOutcome::Completed,
                    Some(failure) => ExecOutcome::Raised(failure),
                };
                let mut captured_out = parsed.stray;
                captured_out.push_str(&report.stdout);
                if !report.stderr.is_empty() {
                    stderr.push_str(&report.stderr);
                }
                ExecReport {
                    outcome,
                    stdout: captured_out,
                    stderr,
                    duration,
                }
            }
            Some(Err(e)) if status.success() => {
                return Err(error::harness_protocol(interpreter, format!("unreadable report: {}", e))
                    .with_operation("sandbox::execute"));
            }
            _ if !parsed.ready => {
                return Err(error::harness_protocol(
                    interpreter,
                    format!("harness did not start ({}): {}", status, error::preview(stderr.trim(), 500)),
                )
                .with_operation("sandbox::execute"));
            }
            // Ready, then either no report or a non-zero exit: the harness never finished cleanly.
            _ => ExecReport {
                outcome: ExecOutcome::Crashed {
                    status: status.to_string(),
                },
                stdout: parsed.stray,
                stderr,
                duration,
            },
        };

        debug!(
            success = report.is_success(),
            exit = %status,
            elapsed_ms = duration.as_millis() as u64,
            "sandbox execution finished"
        );
        Ok(report)
    }
}

/// SIGKILL every process left in the sandbox's group
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    // ESRCH just means the group is already gone.
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            debug!(pgid, err = %e, "killing sandbox process group failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}
