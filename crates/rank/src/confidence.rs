//! Confidence scoring (spec.md §4.F): a margin-based factor times a
//! support-diversity factor.

/// Reference cap for the diversity factor: a candidate backed by all
/// four signal families (transition, frequency, task, recovery) gets
/// full diversity credit.
const MAX_SUPPORT_SOURCES: f64 = 4.0;

/// `clamp((score - runner_up) / max(score, eps), 0, 1) * diversity`.
pub fn compute_confidence(score: f64, runner_up: f64, support_count: usize) -> f64 {
    const EPS: f64 = 1e-9;
    let margin = ((score - runner_up) / score.max(EPS)).clamp(0.0, 1.0);
    let diversity = (support_count as f64 / MAX_SUPPORT_SOURCES).clamp(0.0, 1.0);
    (margin * diversity).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_margin_and_full_support_yields_high_confidence() {
        let c = compute_confidence(1.0, 0.1, 4);
        assert!(c > 0.8);
    }

    #[test]
    fn zero_margin_yields_zero_confidence() {
        let c = compute_confidence(0.5, 0.5, 4);
        assert_eq!(c, 0.0);
    }

    #[test]
    fn single_source_reduces_confidence_relative_to_full_support() {
        let low = compute_confidence(1.0, 0.1, 1);
        let high = compute_confidence(1.0, 0.1, 4);
        assert!(low < high);
    }

    #[test]
    fn negative_score_does_not_panic_or_exceed_bounds() {
        let c = compute_confidence(-1.0, -2.0, 2);
        assert!((0.0..=1.0).contains(&c));
    }
}
