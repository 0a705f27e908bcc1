use super::{exit_code, piped, spawn_reader, TrialResult, SPAWN_MARKER, TIMEOUT_MARKER, TIMEOUT_RC};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
const MONITOR_JOIN_GRACE: Duration = Duration::from_millis(200);

/// Runs the candidate as a plain child process rooted at the workdir, with a
/// background thread sampling its resident memory while the wait loop blocks.
pub struct LocalSandbox {
    workdir: PathBuf,
    input_dir: PathBuf,
    entry_command: Vec<String>,
}

impl LocalSandbox {
    pub fn new(workdir: PathBuf, input_dir: PathBuf, entry_command: Vec<String>) -> Self {
        LocalSandbox {
            workdir,
            input_dir,
            entry_command,
        }
    }

    pub fn execute(&mut self, timeout: Duration) -> TrialResult {
        let start = Instant::now();

        if self.entry_command.is_empty() {
            return TrialResult::failure(-1, format!("{}: empty entry command", SPAWN_MARKER), 0.0);
        }
        let mut cmd = Command::new(&self.entry_command[0]);
        cmd.args(&self.entry_command[1..]);
        cmd.arg(&self.input_dir);
        cmd.current_dir(&self.workdir);
        piped(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return TrialResult::failure(
                    -1,
                    format!("{}: {}", SPAWN_MARKER, err),
                    start.elapsed().as_secs_f64(),
                );
            }
        };

        let monitor = MemoryMonitor::spawn(child.id());

        let out_handle = child.stdout.take().map(spawn_reader);
        let err_handle = child.stderr.take().map(spawn_reader);

        let deadline = start + timeout;
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

        // The monitor must be dead before the result is published.
        let peak_mb = monitor.stop();
        let time_s = start.elapsed().as_secs_f64();

        match status {
            Some(status) => TrialResult {
                rc: exit_code(status),
                stdout: out_handle.and_then(|h| h.join().ok()).unwrap_or_default(),
                stderr: err_handle.and_then(|h| h.join().ok()).unwrap_or_default(),
                time_s,
                peak_mb,
            },
            // The readers are deliberately not joined on timeout: orphaned
            // grandchildren may keep the pipes open past the deadline, and
            // the captured output is discarded anyway.
            None => TrialResult {
                rc: TIMEOUT_RC,
                stdout: String::new(),
                stderr: TIMEOUT_MARKER.to_string(),
                time_s,
                peak_mb,
            },
        }
    }
}

/// Cooperative polling sampler for the child's resident set size. Stops when
/// told, when the process disappears, or when its pipe end closes.
struct MemoryMonitor {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
    peak_kb: Arc<AtomicU64>,
}

impl MemoryMonitor {
    fn spawn(pid: u32) -> Self {
        let peak_kb = Arc::new(AtomicU64::new(0));
        let shared = Arc::clone(&peak_kb);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(SAMPLE_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            match read_rss_kb(pid) {
                Some(kb) => {
                    shared.fetch_max(kb, Ordering::Relaxed);
                }
                None => break,
            }
        });
        MemoryMonitor {
            stop_tx,
            handle,
            peak_kb,
        }
    }

    fn stop(self) -> f64 {
        let _ = self.stop_tx.send(());
        let deadline = Instant::now() + MONITOR_JOIN_GRACE;
        while !self.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if self.handle.is_finished() {
            let _ = self.handle.join();
        }
        self.peak_kb.load(Ordering::Relaxed) as f64 / 1024.0
    }
}

#[cfg(target_os = "linux")]
fn read_rss_kb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_rss_kb(_pid: u32) -> Option<u64> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;

    fn scratch_workdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "evo_local_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("workdir");
        dir
    }

    fn write_script(dir: &Path, body: &str) {
        fs::write(dir.join("main.py"), body).expect("script");
    }

    fn sh_sandbox(workdir: PathBuf, input: PathBuf) -> LocalSandbox {
        LocalSandbox::new(
            workdir,
            input,
            vec!["sh".to_string(), "main.py".to_string()],
        )
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let work = scratch_workdir("ok");
        write_script(&work, "echo hello\necho oops >&2\nexit 0\n");
        let mut sandbox = sh_sandbox(work.clone(), work.clone());
        let res = sandbox.execute(Duration::from_secs(10));
        assert_eq!(res.rc, 0);
        assert_eq!(res.stdout.trim(), "hello");
        assert_eq!(res.stderr.trim(), "oops");
        assert!(res.time_s > 0.0);
        let _ = fs::remove_dir_all(work);
    }

    #[test]
    fn input_dir_is_passed_as_final_argument() {
        let work = scratch_workdir("arg");
        let input = scratch_workdir("arg_input");
        write_script(&work, "echo \"$1\"\n");
        let mut sandbox = sh_sandbox(work.clone(), input.clone());
        let res = sandbox.execute(Duration::from_secs(10));
        assert_eq!(res.rc, 0);
        assert_eq!(res.stdout.trim(), input.to_string_lossy());
        let _ = fs::remove_dir_all(work);
        let _ = fs::remove_dir_all(input);
    }

    #[test]
    fn timeout_kills_and_reports_sentinel() {
        let work = scratch_workdir("timeout");
        write_script(&work, "sleep 5\necho too-late\n");
        let mut sandbox = sh_sandbox(work.clone(), work.clone());
        let started = Instant::now();
        let res = sandbox.execute(Duration::from_secs(1));
        assert_eq!(res.rc, TIMEOUT_RC);
        assert_eq!(res.stderr, TIMEOUT_MARKER);
        assert_eq!(res.stdout, "");
        assert!(started.elapsed() < Duration::from_secs(4));
        let _ = fs::remove_dir_all(work);
    }

    #[test]
    fn spawn_failure_is_a_result_not_an_error() {
        let work = scratch_workdir("nospawn");
        let mut sandbox = LocalSandbox::new(
            work.clone(),
            work.clone(),
            vec!["definitely-not-a-binary-evo".to_string()],
        );
        let res = sandbox.execute(Duration::from_secs(1));
        assert_ne!(res.rc, 0);
        assert!(res.stderr.contains(SPAWN_MARKER));
        let _ = fs::remove_dir_all(work);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn memory_monitor_sees_a_live_process() {
        let work = scratch_workdir("mem");
        write_script(&work, "sleep 1\n");
        let mut sandbox = sh_sandbox(work.clone(), work.clone());
        let res = sandbox.execute(Duration::from_secs(10));
        assert_eq!(res.rc, 0);
        assert!(res.peak_mb > 0.0, "expected a sampled rss, got {}", res.peak_mb);
        let _ = fs::remove_dir_all(work);
    }
}
