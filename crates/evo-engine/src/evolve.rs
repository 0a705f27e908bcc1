use crate::config::RunConfig;
use crate::evaluator::{aggregate, evaluate_rel, Metrics};
use crate::mutate;
use crate::sandbox::{Runner, TrialResult};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct EvolveOutcome {
    pub best: Metrics,
    /// Where the winning candidate's source was persisted.
    pub best_path: PathBuf,
}

/// Drive one full engine invocation: baseline, `rounds` passes over the
/// recipe list, teardown. The best candidate is persisted after every
/// acceptance and again at the end; the persistent container (if any) is
/// released on every exit path.
pub fn evolve(seed_code: &str, cfg: &RunConfig) -> Result<EvolveOutcome> {
    evo_core::ensure_dir(&cfg.workdir)?;
    let expected = fs::read_to_string(&cfg.expected_path).with_context(|| {
        format!(
            "expected transcript unreadable: {}",
            cfg.expected_path.display()
        )
    })?;

    info!(
        workdir = %cfg.workdir.display(),
        input_dir = %cfg.input_dir.display(),
        backend = cfg.backend.as_str(),
        network = cfg.network.as_str(),
        "engine invocation starting"
    );

    let mut runner = Runner::from_config(cfg);
    runner.start()?;
    let search = run_search(&mut runner, seed_code, &expected, cfg);
    runner.stop();
    let (best_code, best) = search?;

    let best_path = cfg.workdir.join("main.py");
    evo_core::atomic_write_text(&best_path, &best_code)?;

    // Leaderboard append is best-effort: a logging failure must never mask
    // the search result.
    let entry = json!({
        "ts": Utc::now().to_rfc3339(),
        "config": cfg,
        "seed_sha256": evo_core::sha256_hex(seed_code.as_bytes()),
        "best_sha256": evo_core::sha256_hex(best_code.as_bytes()),
        "best": best,
    });
    let _ = evo_core::append_jsonl(&cfg.workdir.join("leaderboard.jsonl"), &entry);

    info!(score = best.score, correct = best.correct, "engine invocation finished");
    Ok(EvolveOutcome { best, best_path })
}

fn run_search(
    runner: &mut Runner,
    seed_code: &str,
    expected: &str,
    cfg: &RunConfig,
) -> Result<(String, Metrics)> {
    let mut best_code = seed_code.to_string();

    // Baseline: no denominators, so the seed's score is a pure correctness
    // check. Its measurements are frozen for the rest of the run.
    let baseline = trial_once(runner, cfg, expected, &best_code, None, None)?;
    info!(
        rc = baseline.rc,
        score = baseline.metrics.score,
        correct = baseline.metrics.correct,
        time_s = baseline.metrics.time_s,
        "baseline"
    );
    let base_time_s = Some(baseline.metrics.time_s);
    let base_peak_mb = if baseline.metrics.peak_mb > 0.0 {
        Some(baseline.metrics.peak_mb)
    } else {
        None
    };
    let mut best = baseline.metrics;

    for round in 1..=cfg.rounds {
        debug!(round, "round starting");
        for recipe in &cfg.recipes {
            let cand = mutate::mutate(&best_code, recipe);

            let mut reps: Vec<Metrics> = Vec::with_capacity(cfg.repeats.max(1) as usize);
            let mut last = None;
            for _ in 0..cfg.repeats.max(1) {
                let trial = trial_once(runner, cfg, expected, &cand, base_time_s, base_peak_mb)?;
                reps.push(trial.metrics);
                last = Some(trial);
            }
            let agg = aggregate(&reps);
            let last = last.context("repeats must run at least once")?;
            info!(
                round,
                recipe = recipe.as_str(),
                rc = last.rc,
                score = agg.score,
                correct = agg.correct,
                time_s = agg.time_s,
                "candidate evaluated"
            );

            if improves(&agg, &best) {
                best = agg;
                best_code = cand;
                evo_core::atomic_write_text(&cfg.workdir.join("main.py"), &best_code)?;
                evo_core::atomic_write_text(&cfg.workdir.join("best_stdout.txt"), &last.stdout)?;
                evo_core::atomic_write_text(&cfg.workdir.join("best_stderr.txt"), &last.stderr)?;
                info!(recipe = recipe.as_str(), score = best.score, "candidate promoted");
            }
        }
    }

    Ok((best_code, best))
}

/// Acceptance rule: correctness dominates score lexicographically, and ties
/// keep the incumbent. Any strictly greater aggregate promotes; there is
/// deliberately no minimum-improvement threshold.
fn improves(agg: &Metrics, best: &Metrics) -> bool {
    agg.correct > best.correct || (agg.correct == best.correct && agg.score > best.score)
}

struct Trial {
    metrics: Metrics,
    stdout: String,
    stderr: String,
    rc: i32,
}

/// Write the candidate, execute it once, score it, and log one metrics
/// record. A non-zero exit forces zero metrics without consulting the
/// evaluator: a crash is never accidentally correct.
fn trial_once(
    runner: &mut Runner,
    cfg: &RunConfig,
    expected: &str,
    code: &str,
    base_time_s: Option<f64>,
    base_peak_mb: Option<f64>,
) -> Result<Trial> {
    evo_core::atomic_write_text(&cfg.workdir.join("main.py"), code)?;

    let res: TrialResult = runner.execute(Duration::from_secs(cfg.timeout_s));

    let _ = evo_core::atomic_write_text(&cfg.workdir.join("last_stdout.txt"), &res.stdout);
    let _ = evo_core::atomic_write_text(&cfg.workdir.join("last_stderr.txt"), &res.stderr);

    let metrics = if res.rc == 0 {
        evaluate_rel(
            &res.stdout,
            expected,
            res.time_s,
            res.peak_mb,
            base_time_s,
            base_peak_mb,
        )
    } else {
        Metrics::failed(res.time_s, res.peak_mb)
    };

    let record = json!({"metrics": metrics, "rc": res.rc});
    let _ = evo_core::append_jsonl(&cfg.workdir.join("metrics.jsonl"), &record);

    Ok(Trial {
        metrics,
        stdout: res.stdout,
        stderr: res.stderr,
        rc: res.rc,
    })
}
