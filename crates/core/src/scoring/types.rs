use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{KaraokeError, NoteId, Result};

/// The three canonical difficulty tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Tolerant, ±2 semitones.
    Easy,
    /// Moderate, ±1 semitone.
    Medium,
    /// Strict, ±0.5 semitones.
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn profile(self) -> DifficultyProfile {
        match self {
            Difficulty::Easy => DifficultyProfile {
                pitch_tolerance_semitones: 2.0,
                timing_tolerance_ms: 200,
                score_multiplier: 1.0,
                combo_multiplier: 1.0,
            },
            Difficulty::Medium => DifficultyProfile {
                pitch_tolerance_semitones: 1.0,
                timing_tolerance_ms: 150,
                score_multiplier: 1.25,
                combo_multiplier: 1.5,
            },
            Difficulty::Hard => DifficultyProfile {
                pitch_tolerance_semitones: 0.5,
                timing_tolerance_ms: 100,
                score_multiplier: 1.5,
                combo_multiplier: 2.0,
            },
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(name)
    }
}

impl FromStr for Difficulty {
    type Err = KaraokeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "easy" | "tolerant" => Ok(Difficulty::Easy),
            "medium" | "moderate" => Ok(Difficulty::Medium),
            "hard" | "strict" => Ok(Difficulty::Hard),
            other => Err(KaraokeError::InvalidInput(format!(
                "unknown difficulty `{other}`"
            ))),
        }
    }
}

/// Matching and reward parameters, fixed for a whole performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyProfile {
    pub pitch_tolerance_semitones: f64,
    /// Grace after a note starts before off-pitch singing counts against it.
    pub timing_tolerance_ms: u64,
    pub score_multiplier: f64,
    pub combo_multiplier: f64,
}

impl Default for DifficultyProfile {
    fn default() -> Self {
        Difficulty::Medium.profile()
    }
}

impl From<Difficulty> for DifficultyProfile {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.profile()
    }
}

impl DifficultyProfile {
    pub fn validate(&self) -> Result<()> {
        if !(self.pitch_tolerance_semitones > 0.0 && self.pitch_tolerance_semitones.is_finite()) {
            return Err(KaraokeError::config(
                "pitch tolerance must be a positive number of semitones",
            ));
        }
        if !(self.score_multiplier >= 1.0 && self.score_multiplier.is_finite()) {
            return Err(KaraokeError::config("score multiplier must be at least 1"));
        }
        if !(self.combo_multiplier >= 1.0 && self.combo_multiplier.is_finite()) {
            return Err(KaraokeError::config("combo multiplier must be at least 1"));
        }
        Ok(())
    }
}

/// Rating of a successful note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitRating {
    Okay,
    Good,
    Perfect,
}

impl HitRating {
    /// Buckets `accuracy = 1 - diff / (tolerance + 1)`. Anything at or
    /// below 0.5 earns no rating.
    pub fn from_accuracy(accuracy: f64) -> Option<Self> {
        if accuracy > 0.9 {
            Some(HitRating::Perfect)
        } else if accuracy > 0.7 {
            Some(HitRating::Good)
        } else if accuracy > 0.5 {
            Some(HitRating::Okay)
        } else {
            None
        }
    }
}

/// Every rating a judgment can carry, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Miss,
    Okay,
    Good,
    Perfect,
}

impl From<HitRating> for Rating {
    fn from(rating: HitRating) -> Self {
        match rating {
            HitRating::Okay => Rating::Okay,
            HitRating::Good => Rating::Good,
            HitRating::Perfect => Rating::Perfect,
        }
    }
}

/// How a single voiced tick compares against one note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchVerdict {
    OutOfTolerance,
    /// Within tolerance; `None` when accuracy is too low to score.
    InTolerance(Option<HitRating>),
}

impl PitchVerdict {
    pub fn evaluate(pitch_diff: f64, tolerance: f64) -> Self {
        if pitch_diff > tolerance {
            return PitchVerdict::OutOfTolerance;
        }
        let accuracy = Self::accuracy(pitch_diff, tolerance);
        PitchVerdict::InTolerance(HitRating::from_accuracy(accuracy))
    }

    /// `1 - diff / (tolerance + 1)`; only meaningful for in-tolerance input.
    pub fn accuracy(pitch_diff: f64, tolerance: f64) -> f64 {
        1.0 - pitch_diff / (tolerance + 1.0)
    }
}

/// Per-note judgment event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Judgment {
    Hit {
        note_id: NoteId,
        rating: HitRating,
        points: u64,
        /// Combo including this hit.
        combo: u32,
        at_ms: u64,
    },
    Miss {
        note_id: NoteId,
        at_ms: u64,
    },
}

impl Judgment {
    pub fn note_id(&self) -> NoteId {
        match self {
            Judgment::Hit { note_id, .. } | Judgment::Miss { note_id, .. } => *note_id,
        }
    }

    pub fn rating(&self) -> Rating {
        match self {
            Judgment::Hit { rating, .. } => Rating::from(*rating),
            Judgment::Miss { .. } => Rating::Miss,
        }
    }

    pub fn points(&self) -> u64 {
        match self {
            Judgment::Hit { points, .. } => *points,
            Judgment::Miss { .. } => 0,
        }
    }

    pub fn at_ms(&self) -> u64 {
        match self {
            Judgment::Hit { at_ms, .. } | Judgment::Miss { at_ms, .. } => *at_ms,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Judgment::Miss { .. })
    }
}

/// Running score of one player. Only the scoring engine mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScoreState {
    score: u64,
    combo: u32,
    max_combo: u32,
    notes_hit: u32,
    notes_missed: u32,
}

impl PlayerScoreState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn combo(&self) -> u32 {
        self.combo
    }

    pub fn max_combo(&self) -> u32 {
        self.max_combo
    }

    pub fn notes_hit(&self) -> u32 {
        self.notes_hit
    }

    pub fn notes_missed(&self) -> u32 {
        self.notes_missed
    }

    pub(crate) fn record_hit(&mut self, points: u64) {
        self.combo = self.combo.saturating_add(1);
        self.max_combo = self.max_combo.max(self.combo);
        self.notes_hit = self.notes_hit.saturating_add(1);
        self.score = self.score.saturating_add(points);
    }

    pub(crate) fn record_miss(&mut self) {
        self.combo = 0;
        self.notes_missed = self.notes_missed.saturating_add(1);
    }
}
