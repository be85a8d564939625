//! ReviewCycle and the Convergence Evaluator's pure decision function.

use serde::{Deserialize, Serialize};

const CONVERGENCE_THRESHOLD: i64 = 1;
const CONSECUTIVE_ZERO_CYCLES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycle {
    pub outcome_id: String,
    pub cycle_number: u32,
    pub open_issues: i64,
    pub created_at: i64,
}

impl ReviewCycle {
    pub fn new(outcome_id: impl Into<String>, cycle_number: u32, open_issues: i64, now_ms: i64) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            cycle_number,
            open_issues,
            created_at: now_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    NotConverging,
    Converging,
    /// Recommended, not forced; the caller still has to confirm the
    /// outcome's remaining tasks are all `completed` before acting on this.
    Achieved,
}

/// Sliding window over the most recent `window` cycles (default 3, passed
/// by the caller since the Evaluator has no persistent config of its own).
/// `cycles` is assumed already sorted ascending by `cycle_number`.
pub fn evaluate(cycles: &[ReviewCycle], window: usize) -> ConvergenceStatus {
    if cycles.is_empty() {
        return ConvergenceStatus::NotConverging;
    }
    let recent = &cycles[cycles.len().saturating_sub(window)..];

    let non_increasing = recent.windows(2).all(|pair| pair[1].open_issues <= pair[0].open_issues);
    let last = recent.last().expect("recent is non-empty");

    if !non_increasing || last.open_issues > CONVERGENCE_THRESHOLD {
        return ConvergenceStatus::NotConverging;
    }

    let zero_run = recent.iter().rev().take(CONSECUTIVE_ZERO_CYCLES).all(|c| c.open_issues == 0);
    if zero_run && recent.len() >= CONSECUTIVE_ZERO_CYCLES {
        ConvergenceStatus::Achieved
    } else {
        ConvergenceStatus::Converging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(n: u32, open_issues: i64) -> ReviewCycle {
        ReviewCycle::new("out_1", n, open_issues, 1000 + n as i64)
    }

    #[test]
    fn empty_is_not_converging() {
        assert_eq!(evaluate(&[], 3), ConvergenceStatus::NotConverging);
    }

    #[test]
    fn increasing_open_issues_is_not_converging() {
        let cycles = vec![cycle(1, 1), cycle(2, 3), cycle(3, 2)];
        assert_eq!(evaluate(&cycles, 3), ConvergenceStatus::NotConverging);
    }

    #[test]
    fn non_increasing_within_threshold_is_converging() {
        let cycles = vec![cycle(1, 4), cycle(2, 2), cycle(3, 1)];
        assert_eq!(evaluate(&cycles, 3), ConvergenceStatus::Converging);
    }

    #[test]
    fn two_consecutive_zero_cycles_is_achieved() {
        let cycles = vec![cycle(1, 3), cycle(2, 0), cycle(3, 0)];
        assert_eq!(evaluate(&cycles, 3), ConvergenceStatus::Achieved);
    }

    #[test]
    fn single_zero_cycle_is_only_converging() {
        let cycles = vec![cycle(1, 2), cycle(2, 1), cycle(3, 0)];
        assert_eq!(evaluate(&cycles, 3), ConvergenceStatus::Converging);
    }

    #[test]
    fn window_only_considers_most_recent_n() {
        let cycles = vec![cycle(1, 0), cycle(2, 5), cycle(3, 0), cycle(4, 0)];
        assert_eq!(evaluate(&cycles, 2), ConvergenceStatus::Achieved);
    }
}
