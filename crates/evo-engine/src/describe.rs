use crate::config::RunConfig;
use crate::evaluator::normalize_lines;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// A pre-flight summary of one configured invocation, for display before
/// any sandbox is started.
#[derive(Debug)]
pub struct RunSummary {
    pub backend: String,
    pub network: String,
    pub rounds: u32,
    pub repeats: u32,
    pub timeout_s: u64,
    pub cpus: f64,
    pub mem_mb: u64,
    pub image: String,
    pub workdir: PathBuf,
    pub input_dir: PathBuf,
    pub input_file_count: usize,
    pub expected_path: PathBuf,
    pub expected_line_count: usize,
    pub recipes: Vec<String>,
    pub entry_command: Vec<String>,
}

pub fn describe(cfg: &RunConfig) -> Result<RunSummary> {
    let input_file_count = WalkDir::new(&cfg.input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();

    let expected = fs::read_to_string(&cfg.expected_path).with_context(|| {
        format!(
            "expected transcript unreadable: {}",
            cfg.expected_path.display()
        )
    })?;

    Ok(RunSummary {
        backend: cfg.backend.as_str().to_string(),
        network: cfg.network.as_str().to_string(),
        rounds: cfg.rounds,
        repeats: cfg.repeats,
        timeout_s: cfg.timeout_s,
        cpus: cfg.cpus,
        mem_mb: cfg.mem_mb,
        image: cfg.image.clone(),
        workdir: cfg.workdir.clone(),
        input_dir: cfg.input_dir.clone(),
        input_file_count,
        expected_path: cfg.expected_path.clone(),
        expected_line_count: normalize_lines(&expected).len(),
        recipes: cfg.recipes.clone(),
        entry_command: cfg.entry_command.clone(),
    })
}
