//! Budget driven pacing ratio.
//!
//! The collector starts its next cycle once the heap reaches
//! `live + live * ratio / 100`. Setting that equal to the budget target and
//! solving for the ratio gives `ratio = (target - live) / live * 100`.

/// Lower clamp for computed ratios, unless the ceiling ratio is lower still.
/// Anything smaller spends too much time collecting.
pub const MIN_RATIO: i32 = 50;
/// Hard memory ceiling, in percent of the total, used once the budget is already exceeded.
/// Kept below 100 to leave headroom before an external OOM killer steps in.
pub const MAX_RAM_USAGE_PERCENTAGE: f64 = 95.0;
/// Ratio value that disables pacing; the collector then runs only at the memory ceiling.
pub const RATIO_OFF: i32 = -1;
/// Ratio used when no policy sets one.
pub const DEFAULT_RATIO: i32 = 100;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reason {
    Computed,
    ClampedLow,
    ClampedHigh,
    Unchanged,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PacingDecision {
    pub ratio: i32,
    pub reason: Reason,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct EvaluationInput {
    /// Budget in percent of `total_memory`, (0, 100].
    pub budget_percent: f64,
    pub total_memory: u64,
    pub live_memory: u64,
    /// Ratio currently applied to the collector.
    pub previous_ratio: i32,
    /// Upper clamp. `f64::INFINITY` when the policy sets none.
    pub ceiling_ratio: f64,
    /// Static ratio consulted when the budget cannot be met.
    pub fallback_ratio: i32,
}

/// Ratio that makes the collector trigger at `percent` of `total`, unclamped.
pub fn ratio_for(percent: f64, total: u64, live: f64) -> f64 {
    let live = live.max(1.0);
    let target = percent * total as f64 / 100.0;
    (target - live) / live * 100.0
}

fn clamp(ratio: f64, ceiling_ratio: f64) -> f64 {
    ratio.max(MIN_RATIO as f64).min(ceiling_ratio)
}

fn truncate(ratio: f64) -> i32 {
    // `as` saturates and truncates toward zero.
    ratio as i32
}

pub fn compute(
    budget_percent: f64,
    total_memory: u64,
    live_memory: u64,
    ceiling_ratio: f64,
    fallback_ratio: i32,
) -> i32 {
    decide(&EvaluationInput {
        budget_percent,
        total_memory,
        live_memory,
        previous_ratio: RATIO_OFF,
        ceiling_ratio,
        fallback_ratio,
    })
    .ratio
}

pub fn decide(input: &EvaluationInput) -> PacingDecision {
    let live = input.live_memory as f64;
    let raw = ratio_for(input.budget_percent, input.total_memory, live);
    let ceiling = input.ceiling_ratio;

    let (ratio, reason) = if raw > 0.0 {
        // An explicit ceiling under the floor wins over the floor.
        let clamped = clamp(raw, ceiling);
        let reason = if raw > ceiling || clamped < MIN_RATIO as f64 {
            Reason::ClampedHigh
        } else if raw < MIN_RATIO as f64 {
            Reason::ClampedLow
        } else {
            Reason::Computed
        };
        (clamped, reason)
    } else {
        // The budget is already exceeded and no ratio can reach it. Pick the
        // smaller of the static ratio and the ratio hitting the hard ceiling,
        // but never go under the floor: collection keeps running either way.
        let max_ratio = ceiling.min(ratio_for(
            MAX_RAM_USAGE_PERCENTAGE,
            input.total_memory,
            live,
        ));
        let candidate = (input.fallback_ratio as f64).min(max_ratio);
        if candidate <= MIN_RATIO as f64 {
            (MIN_RATIO as f64, Reason::ClampedLow)
        } else if candidate == ceiling {
            (candidate, Reason::ClampedHigh)
        } else {
            (candidate, Reason::Computed)
        }
    };

    let ratio = truncate(ratio);
    let reason = if ratio == input.previous_ratio {
        Reason::Unchanged
    } else {
        reason
    };
    PacingDecision { ratio, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Case {
        budget: f64,
        total: u64,
        live: u64,
        expected: i32,
    }

    #[test]
    fn worked_examples() {
        let cases = [
            Case {
                budget: 40.0,
                total: 10000,
                live: 6000,
                expected: 58.max(MIN_RATIO),
            },
            Case {
                budget: 40.0,
                total: 10000,
                live: 9000,
                expected: MIN_RATIO,
            },
            Case {
                budget: 80.0,
                total: 10000,
                live: 1000,
                expected: 700,
            },
            Case {
                budget: 80.0,
                total: 10000,
                live: 3000,
                expected: 166,
            },
        ];
        for (i, case) in cases.iter().enumerate() {
            let result = compute(
                case.budget,
                case.total,
                case.live,
                f64::INFINITY,
                DEFAULT_RATIO,
            );
            assert_eq!(result, case.expected, "case #{}", i + 1);
        }
    }

    #[test]
    fn ceiling_clamps_high() {
        assert_eq!(compute(80.0, 10000, 1000, 300.0, DEFAULT_RATIO), 300);
        let decision = decide(&EvaluationInput {
            budget_percent: 80.0,
            total_memory: 10000,
            live_memory: 1000,
            previous_ratio: 100,
            ceiling_ratio: 300.0,
            fallback_ratio: DEFAULT_RATIO,
        });
        assert_eq!(decision.reason, Reason::ClampedHigh);
    }

    #[test]
    fn ceiling_under_the_floor_wins() {
        assert_eq!(compute(80.0, 10000, 1000, 20.0, DEFAULT_RATIO), 20);
        let decision = decide(&EvaluationInput {
            budget_percent: 40.0,
            total_memory: 10000,
            live_memory: 3900,
            previous_ratio: RATIO_OFF,
            ceiling_ratio: 20.0,
            fallback_ratio: DEFAULT_RATIO,
        });
        assert_eq!(
            decision,
            PacingDecision {
                ratio: 20,
                reason: Reason::ClampedHigh
            }
        );
        // Once the budget is exceeded the floor applies again.
        assert_eq!(compute(40.0, 10000, 9000, 20.0, DEFAULT_RATIO), MIN_RATIO);
    }

    #[test]
    fn bounded_and_monotonic_below_target() {
        let total = 1 << 30;
        for &budget in &[10.0, 33.3, 50.0, 75.0, 100.0] {
            let target = (budget / 100.0 * total as f64) as u64;
            let mut last = i32::MAX;
            let mut live = 4 << 20;
            while live < target {
                let ratio = compute(budget, total, live, 2000.0, DEFAULT_RATIO);
                assert!((MIN_RATIO..=2000).contains(&ratio), "{} at {}", ratio, live);
                assert!(ratio <= last, "ratio grew from {} to {}", last, ratio);
                last = ratio;
                live += target / 37 + 1;
            }
        }
    }

    #[test]
    fn exceeded_budget_still_collects() {
        for &live in &[4000u64, 9000, 9500, 10000, 50000, u64::MAX / 2] {
            let ratio = compute(40.0, 10000, live, f64::INFINITY, DEFAULT_RATIO);
            assert!(ratio >= MIN_RATIO, "{} for live {}", ratio, live);
        }
        // Plenty of headroom to the hard ceiling: the static ratio wins.
        assert_eq!(compute(10.0, 100_000, 20_000, f64::INFINITY, 120), 120);
        // A fallback ratio under the floor is lifted to it.
        assert_eq!(compute(10.0, 100_000, 20_000, f64::INFINITY, 10), MIN_RATIO);
    }

    #[test]
    fn zero_live_is_finite() {
        let ratio = compute(50.0, 1 << 20, 0, f64::INFINITY, DEFAULT_RATIO);
        assert!(ratio > MIN_RATIO);
        assert_eq!(compute(50.0, 1 << 20, 0, 500.0, DEFAULT_RATIO), 500);
    }

    #[test]
    fn unchanged_reason() {
        let input = EvaluationInput {
            budget_percent: 80.0,
            total_memory: 10000,
            live_memory: 3000,
            previous_ratio: 166,
            ceiling_ratio: f64::INFINITY,
            fallback_ratio: DEFAULT_RATIO,
        };
        assert_eq!(
            decide(&input),
            PacingDecision {
                ratio: 166,
                reason: Reason::Unchanged
            }
        );
        let decision = decide(&EvaluationInput {
            previous_ratio: 100,
            ..input
        });
        assert_eq!(decision.reason, Reason::Computed);
    }
}
