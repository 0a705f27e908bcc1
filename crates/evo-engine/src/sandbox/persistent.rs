use super::{piped, shell_join, wait_captured, TrialResult, SPAWN_MARKER};
use crate::config::{NetworkMode, RunConfig};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// One long-lived container for the whole engine invocation; each trial is a
/// `docker exec` into it, amortizing container startup across trials. The
/// bind mounts are fixed at `start()`. Teardown is guaranteed by `Drop`.
pub struct PersistentSandbox {
    workdir: PathBuf,
    input_dir: PathBuf,
    image: String,
    cpus: f64,
    mem_mb: u64,
    network: NetworkMode,
    entry_command: Vec<String>,
    name: String,
    started: bool,
}

impl PersistentSandbox {
    pub fn new(cfg: &RunConfig) -> Self {
        PersistentSandbox {
            workdir: cfg.workdir.clone(),
            input_dir: cfg.input_dir.clone(),
            image: cfg.image.clone(),
            cpus: cfg.cpus,
            mem_mb: cfg.mem_mb,
            network: cfg.network,
            entry_command: cfg.entry_command.clone(),
            name: format!(
                "evo_persist_{}_{}",
                std::process::id(),
                CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
            started: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        evo_core::ensure_dir(&self.workdir)?;

        let output = Command::new("docker")
            .args(["run", "-d", "--rm", "--name", &self.name])
            .args(["--cpus", &self.cpus.to_string()])
            .args(["-m", &format!("{}m", self.mem_mb)])
            .args(["--network", self.network.as_str()])
            .args(["-v", &format!("{}:/app", self.workdir.display())])
            .args(["-v", &format!("{}:/input:ro", self.input_dir.display())])
            .args(["-w", "/app"])
            .arg(&self.image)
            .args(["sh", "-lc", "sleep infinity"])
            .output()
            .map_err(|err| anyhow!("backend_unreachable: docker not runnable: {}", err))?;

        if !output.status.success() {
            return Err(anyhow!(
                "backend_unreachable: docker run failed (image={})\nSTDOUT:\n{}\nSTDERR:\n{}",
                self.image,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        self.started = true;
        Ok(())
    }

    pub fn execute(&mut self, timeout: Duration) -> TrialResult {
        let start = Instant::now();
        if !self.started {
            return TrialResult::failure(
                -1,
                format!("{}: sandbox not started", SPAWN_MARKER),
                0.0,
            );
        }

        let mut inner = self.entry_command.clone();
        inner.push("/input".to_string());
        let script = format!("cd /app && {}", shell_join(&inner));

        let mut cmd = Command::new("docker");
        cmd.args(["exec", "-i", &self.name, "sh", "-lc", &script]);
        piped(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return TrialResult::failure(
                    -1,
                    format!("{}: docker exec: {}", SPAWN_MARKER, err),
                    start.elapsed().as_secs_f64(),
                );
            }
        };

        let captured = wait_captured(child, timeout);

        TrialResult {
            rc: captured.rc,
            stdout: captured.stdout,
            stderr: captured.stderr,
            time_s: start.elapsed().as_secs_f64(),
            peak_mb: 0.0,
        }
    }

    /// Idempotent; also safe when `start()` never succeeded.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        let _ = Command::new("docker").args(["rm", "-f", &self.name]).output();
        self.started = false;
    }
}

impl Drop for PersistentSandbox {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use std::path::PathBuf;

    fn sandbox() -> PersistentSandbox {
        let cfg = RunConfig::new(
            PathBuf::from("/in"),
            PathBuf::from("/exp.txt"),
            PathBuf::from("/work"),
        );
        PersistentSandbox::new(&cfg)
    }

    #[test]
    fn stop_is_safe_without_start() {
        let mut sb = sandbox();
        sb.stop();
        sb.stop();
        assert!(!sb.started);
    }

    #[test]
    fn execute_before_start_is_a_failure_result() {
        let mut sb = sandbox();
        let res = sb.execute(Duration::from_secs(1));
        assert_ne!(res.rc, 0);
        assert!(res.stderr.contains("not started"));
    }

    #[test]
    fn container_names_are_unique_per_instance() {
        let a = sandbox();
        let b = sandbox();
        assert_ne!(a.name, b.name);
    }
}
