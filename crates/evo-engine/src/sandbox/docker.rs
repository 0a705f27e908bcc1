use super::{piped, wait_captured, TrialResult, SPAWN_MARKER};
use crate::config::{NetworkMode, RunConfig};
use chrono::Utc;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

/// One single-use container per invocation: slow to start, but nothing to
/// tear down afterwards. Memory is not measured here; `peak_mb` stays 0.0.
pub struct DockerSandbox {
    workdir: PathBuf,
    input_dir: PathBuf,
    image: String,
    cpus: f64,
    mem_mb: u64,
    network: NetworkMode,
    entry_command: Vec<String>,
}

impl DockerSandbox {
    pub fn new(cfg: &RunConfig) -> Self {
        DockerSandbox {
            workdir: cfg.workdir.clone(),
            input_dir: cfg.input_dir.clone(),
            image: cfg.image.clone(),
            cpus: cfg.cpus,
            mem_mb: cfg.mem_mb,
            network: cfg.network,
            entry_command: cfg.entry_command.clone(),
        }
    }

    pub fn execute(&mut self, timeout: Duration) -> TrialResult {
        let start = Instant::now();
        let name = format!("evo_once_{}", Utc::now().timestamp_millis());

        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--rm").args(["--name", &name]);
        cmd.args(["--network", self.network.as_str()]);
        cmd.arg("--cpus").arg(self.cpus.to_string());
        cmd.arg("-m").arg(format!("{}m", self.mem_mb));
        cmd.args(["-v", &format!("{}:/app", self.workdir.display())]);
        cmd.args(["-v", &format!("{}:/input:ro", self.input_dir.display())]);
        cmd.args(["-w", "/app"]);
        cmd.arg(&self.image);
        cmd.args(&self.entry_command);
        cmd.arg("/input");
        piped(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return TrialResult::failure(
                    -1,
                    format!("{}: docker: {}", SPAWN_MARKER, err),
                    start.elapsed().as_secs_f64(),
                );
            }
        };

        let captured = wait_captured(child, timeout);
        if captured.timed_out {
            // The docker client is dead; the container may still be running.
            let _ = Command::new("docker").args(["rm", "-f", &name]).output();
        }

        TrialResult {
            rc: captured.rc,
            stdout: captured.stdout,
            stderr: captured.stderr,
            time_s: start.elapsed().as_secs_f64(),
            peak_mb: 0.0,
        }
    }
}
