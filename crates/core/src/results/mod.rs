use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PlayerScoreState;

/// Final letter-style rating of a performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    Poor,
    Okay,
    Good,
    Excellent,
    Perfect,
}

impl Grade {
    /// Buckets an accuracy percentage.
    pub fn from_accuracy(accuracy_percent: f64) -> Self {
        if accuracy_percent >= 95.0 {
            Grade::Perfect
        } else if accuracy_percent >= 85.0 {
            Grade::Excellent
        } else if accuracy_percent >= 70.0 {
            Grade::Good
        } else if accuracy_percent >= 50.0 {
            Grade::Okay
        } else {
            Grade::Poor
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Data shown on the results screen once a performance ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub score: u64,
    pub max_combo: u32,
    pub notes_hit: u32,
    pub notes_missed: u32,
    pub total_notes: u32,
    pub accuracy_percent: f64,
    pub grade: Grade,
}

impl PerformanceSummary {
    pub fn from_state(state: &PlayerScoreState, total_notes: usize) -> Self {
        let total_notes = u32::try_from(total_notes).unwrap_or(u32::MAX);
        let accuracy_percent = if total_notes == 0 {
            0.0
        } else {
            f64::from(state.notes_hit()) / f64::from(total_notes) * 100.0
        };

        Self {
            score: state.score(),
            max_combo: state.max_combo(),
            notes_hit: state.notes_hit(),
            notes_missed: state.notes_missed(),
            total_notes,
            accuracy_percent,
            grade: Grade::from_accuracy(accuracy_percent),
        }
    }
}
