use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-trial scores derived from one `TrialResult`. Never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub correct: f64,
    pub time_s: f64,
    pub peak_mb: f64,
    pub score: f64,
}

impl Metrics {
    /// The score a crashing or timed-out trial gets, with no output
    /// comparison at all: a crash is never accidentally correct.
    pub fn failed(time_s: f64, peak_mb: f64) -> Self {
        Metrics {
            correct: 0.0,
            time_s,
            peak_mb,
            score: 0.0,
        }
    }
}

/// Normalize a transcript for comparison: unify line endings, strip trailing
/// whitespace per line, drop empty lines.
pub fn normalize_lines(s: &str) -> Vec<String> {
    s.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Exact normalized line-sequence equality. 1.0 or 0.0, no partial credit.
pub fn correctness(stdout: &str, expected: &str) -> f64 {
    if normalize_lines(stdout) == normalize_lines(expected) {
        1.0
    } else {
        0.0
    }
}

/// Order-insensitive variant: compares the sets of trimmed non-empty lines.
pub fn lines_set_match(got: &str, expected: &str) -> f64 {
    let norm = |s: &str| -> BTreeSet<String> {
        s.lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    };
    if norm(got) == norm(expected) {
        1.0
    } else {
        0.0
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Score one trial relative to the frozen baseline. Correctness dominates:
/// an incorrect trial scores 0.0 regardless of performance. A correct trial
/// lands in [0.5, 1.0], with 0.5 meaning "no improvement over baseline":
/// the blend weighs time gain 60% and memory gain 40%, each clamped to
/// [0, 1]. A missing or zero baseline contributes a zero gain, which is the
/// normal case for memory under the container backends.
pub fn evaluate_rel(
    stdout: &str,
    expected: &str,
    time_s: f64,
    peak_mb: f64,
    base_time_s: Option<f64>,
    base_peak_mb: Option<f64>,
) -> Metrics {
    let correct = correctness(stdout, expected);
    if correct < 1.0 {
        return Metrics {
            correct,
            time_s,
            peak_mb,
            score: 0.0,
        };
    }

    let time_gain = match base_time_s {
        Some(base) if base > 0.0 => clamp01((base - time_s) / base),
        _ => 0.0,
    };
    let mem_gain = match base_peak_mb {
        Some(base) if base > 0.0 => clamp01((base - peak_mb) / base),
        _ => 0.0,
    };

    let blend = 0.6 * time_gain + 0.4 * mem_gain;
    Metrics {
        correct,
        time_s,
        peak_mb,
        score: correct * (0.5 + 0.5 * blend),
    }
}

/// Conservative aggregation over the repeats of one candidate: correctness
/// is the minimum, time and score are medians, peak memory is the median of
/// the positive samples (unmeasured backends report zero).
pub fn aggregate(metrics: &[Metrics]) -> Metrics {
    if metrics.is_empty() {
        return Metrics {
            correct: 0.0,
            time_s: 9e9,
            peak_mb: 0.0,
            score: 0.0,
        };
    }

    let correct = metrics
        .iter()
        .map(|m| m.correct)
        .fold(f64::INFINITY, f64::min);
    let time_s = median(metrics.iter().map(|m| m.time_s).collect());
    let score = median(metrics.iter().map(|m| m.score).collect());
    let positive_peaks: Vec<f64> = metrics
        .iter()
        .map(|m| m.peak_mb)
        .filter(|p| *p > 0.0)
        .collect();
    let peak_mb = if positive_peaks.is_empty() {
        metrics[metrics.len() - 1].peak_mb
    } else {
        median(positive_peaks)
    };

    Metrics {
        correct,
        time_s,
        peak_mb,
        score,
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED: &str = "a.csv,120\nb.csv,45\n";

    #[test]
    fn normalize_drops_empty_lines_and_trailing_whitespace() {
        let lines = normalize_lines("a.csv,120  \r\n\r\nb.csv,45\r");
        assert_eq!(lines, vec!["a.csv,120", "b.csv,45"]);
    }

    #[test]
    fn correctness_is_exact_sequence_equality() {
        assert_eq!(correctness("a.csv,120\nb.csv,45", EXPECTED), 1.0);
        assert_eq!(correctness("b.csv,45\na.csv,120", EXPECTED), 0.0);
        assert_eq!(correctness("a.csv,120", EXPECTED), 0.0);
    }

    #[test]
    fn lines_set_match_ignores_order() {
        assert_eq!(lines_set_match("b.csv,45\na.csv,120", EXPECTED), 1.0);
        assert_eq!(lines_set_match("a.csv,120", EXPECTED), 0.0);
    }

    #[test]
    fn incorrect_output_scores_zero_for_any_time_memory_pair() {
        // Grid of time/memory pairs, including extremes.
        for time_s in [0.0, 0.001, 1.0, 50.0, 9e9] {
            for peak_mb in [0.0, 0.5, 128.0, 4096.0] {
                let m = evaluate_rel("wrong", EXPECTED, time_s, peak_mb, Some(1.0), Some(256.0));
                assert_eq!(m.correct, 0.0);
                assert_eq!(m.score, 0.0, "time={} peak={}", time_s, peak_mb);
            }
        }
    }

    #[test]
    fn time_gain_saturates_at_both_clamp_ends() {
        // time 0 against a positive baseline: full time gain.
        let best = evaluate_rel(EXPECTED, EXPECTED, 0.0, 0.0, Some(2.0), None);
        assert!((best.score - (0.5 + 0.5 * 0.6)).abs() < 1e-9);
        // time at 2x the baseline and beyond: clamped to zero gain.
        for factor in [2.0, 3.0, 10.0] {
            let worst = evaluate_rel(EXPECTED, EXPECTED, 2.0 * factor, 0.0, Some(2.0), None);
            assert!((worst.score - 0.5).abs() < 1e-9, "factor={}", factor);
        }
    }

    #[test]
    fn baseline_trial_scores_pure_correctness() {
        let m = evaluate_rel(EXPECTED, EXPECTED, 1.23, 45.0, None, None);
        assert_eq!(m.correct, 1.0);
        assert!((m.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn memory_gain_contributes_forty_percent() {
        let m = evaluate_rel(EXPECTED, EXPECTED, 1.0, 0.0, Some(1.0), Some(100.0));
        // No time gain, full memory gain.
        assert!((m.score - (0.5 + 0.5 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn aggregating_one_element_is_identity() {
        let m = Metrics {
            correct: 1.0,
            time_s: 0.7,
            peak_mb: 12.0,
            score: 0.8,
        };
        let agg = aggregate(&[m]);
        assert_eq!(agg, m);
    }

    #[test]
    fn aggregate_takes_median_score_and_min_correct() {
        let mk = |correct: f64, score: f64| Metrics {
            correct,
            time_s: 1.0,
            peak_mb: 0.0,
            score,
        };
        let agg = aggregate(&[mk(1.0, 0.5), mk(0.0, 0.9), mk(1.0, 0.5)]);
        assert_eq!(agg.score, 0.5);
        assert_eq!(agg.correct, 0.0);
    }

    #[test]
    fn aggregate_peak_prefers_positive_samples() {
        let mk = |peak_mb: f64| Metrics {
            correct: 1.0,
            time_s: 1.0,
            peak_mb,
            score: 0.5,
        };
        let agg = aggregate(&[mk(0.0), mk(30.0), mk(10.0)]);
        assert_eq!(agg.peak_mb, 20.0);
        let all_zero = aggregate(&[mk(0.0), mk(0.0)]);
        assert_eq!(all_zero.peak_mb, 0.0);
    }

    #[test]
    fn aggregate_empty_is_the_poison_value() {
        let agg = aggregate(&[]);
        assert_eq!(agg.correct, 0.0);
        assert_eq!(agg.score, 0.0);
        assert_eq!(agg.time_s, 9e9);
    }
}
