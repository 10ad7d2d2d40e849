use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Pacing policy. Replaced as a whole on every update, never mutated in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Target pacing ratio.
    ///
    /// - `0`: unset. The default ratio is used, or the ratio is derived from the budget.
    /// - positive: fixed ratio, and the upper bound for budget driven pacing.
    /// - negative: pacing off, collect only when the memory ceiling is reached.
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub gc_percent: i32,
    /// Maximum memory usage in percent of the total memory limit, range (0, 100].
    /// `0` disables the budget.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub max_ram_percentage: f64,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

impl Policy {
    pub const fn ratio(gc_percent: i32) -> Self {
        Self {
            gc_percent,
            max_ram_percentage: 0.0,
        }
    }

    pub const fn budget(max_ram_percentage: f64) -> Self {
        Self {
            gc_percent: 0,
            max_ram_percentage,
        }
    }

    pub fn check_valid(&self) -> Result<(), PolicyError> {
        // `contains` is false for NaN as well.
        if !(0.0..=100.0).contains(&self.max_ram_percentage) {
            return Err(PolicyError::MaxRamPercentage(self.max_ram_percentage));
        }
        Ok(())
    }

    pub fn budget_percent(&self) -> Option<f64> {
        if self.max_ram_percentage > 0.0 {
            Some(self.max_ram_percentage)
        } else {
            None
        }
    }

    pub fn target_ratio(&self) -> Option<i32> {
        if self.gc_percent != 0 {
            Some(self.gc_percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(max_ram_percentage: f64, expect_valid: bool) {
        let policy = Policy::budget(max_ram_percentage);
        assert_eq!(
            policy.check_valid().is_ok(),
            expect_valid,
            "{} for max_ram_percentage should be {}",
            max_ram_percentage,
            if expect_valid { "valid" } else { "invalid" }
        );
    }

    #[test]
    fn max_ram_percentage_range() {
        check(0.0, true);
        check(90.0, true);
        check(100.0, true);
        check(101.0, false);
        check(-1.0, false);
        check(f64::NAN, false);
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let policy: Policy = serde_json::from_str(r#"{"max_ram_percentage": 70.5}"#).unwrap();
        assert_eq!(policy, Policy::budget(70.5));
        assert_eq!(policy.budget_percent(), Some(70.5));
        assert_eq!(policy.target_ratio(), None);

        let policy: Policy = serde_json::from_str(r#"{"gc_percent": 200}"#).unwrap();
        assert_eq!(policy, Policy::ratio(200));
        assert_eq!(serde_json::to_string(&policy).unwrap(), r#"{"gc_percent":200}"#);
    }
}
