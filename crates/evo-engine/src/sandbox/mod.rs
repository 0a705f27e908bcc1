mod docker;
mod local;
mod persistent;

pub use docker::DockerSandbox;
pub use local::LocalSandbox;
pub use persistent::PersistentSandbox;

use crate::config::{Backend, RunConfig};
use anyhow::Result;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT_RC: i32 = -9;
pub const TIMEOUT_MARKER: &str = "TIMEOUT";
pub const SPAWN_MARKER: &str = "SPAWN_FAILED";

/// Outcome of exactly one sandboxed execution of one candidate.
#[derive(Clone, Debug)]
pub struct TrialResult {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub time_s: f64,
    /// Best-effort peak resident memory; 0.0 when the backend cannot measure.
    pub peak_mb: f64,
}

impl TrialResult {
    pub fn failure(rc: i32, stderr: String, time_s: f64) -> Self {
        TrialResult {
            rc,
            stdout: String::new(),
            stderr,
            time_s,
            peak_mb: 0.0,
        }
    }
}

/// One sandbox runner per engine invocation, selected by the configured
/// backend. `execute` never returns an error: every internal failure is
/// folded into a `TrialResult` with a non-zero rc and a stderr marker.
pub enum Runner {
    Local(LocalSandbox),
    Docker(DockerSandbox),
    Persistent(PersistentSandbox),
}

impl Runner {
    pub fn from_config(cfg: &RunConfig) -> Runner {
        match cfg.backend {
            Backend::Local => Runner::Local(LocalSandbox::new(
                cfg.workdir.clone(),
                cfg.input_dir.clone(),
                cfg.entry_command.clone(),
            )),
            Backend::Docker => Runner::Docker(DockerSandbox::new(cfg)),
            Backend::DockerPersistent => Runner::Persistent(PersistentSandbox::new(cfg)),
        }
    }

    /// Bring the backend up. Only the persistent container does real work
    /// here; failure is fatal for the whole invocation.
    pub fn start(&mut self) -> Result<()> {
        match self {
            Runner::Local(_) | Runner::Docker(_) => Ok(()),
            Runner::Persistent(sandbox) => sandbox.start(),
        }
    }

    pub fn execute(&mut self, timeout: Duration) -> TrialResult {
        match self {
            Runner::Local(sandbox) => sandbox.execute(timeout),
            Runner::Docker(sandbox) => sandbox.execute(timeout),
            Runner::Persistent(sandbox) => sandbox.execute(timeout),
        }
    }

    /// Idempotent teardown, safe to call on a runner that never started.
    pub fn stop(&mut self) {
        if let Runner::Persistent(sandbox) = self {
            sandbox.stop();
        }
    }
}

pub(crate) struct Captured {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Drain a spawned child's pipes on reader threads and wait for exit or the
/// deadline, whichever comes first. On deadline the child is killed and
/// reaped; captured output is discarded in favor of the timeout sentinel.
pub(crate) fn wait_captured(mut child: Child, timeout: Duration) -> Captured {
    let out_handle = child.stdout.take().map(spawn_reader);
    let err_handle = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
        }
    };

    match status {
        Some(status) => Captured {
            rc: exit_code(status),
            stdout: out_handle.and_then(|h| h.join().ok()).unwrap_or_default(),
            stderr: err_handle.and_then(|h| h.join().ok()).unwrap_or_default(),
            timed_out: false,
        },
        // Orphaned grandchildren may still hold the pipe write ends, so the
        // readers are not joined here; they exit once the pipes close.
        None => Captured {
            rc: TIMEOUT_RC,
            stdout: String::new(),
            stderr: TIMEOUT_MARKER.to_string(),
            timed_out: true,
        },
    }
}

pub(crate) fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    status.code().unwrap_or(-1)
}

pub(crate) fn piped(cmd: &mut Command) -> &mut Command {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
}

pub(crate) fn sh_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

pub(crate) fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| sh_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
