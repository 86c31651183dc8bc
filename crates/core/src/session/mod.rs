use tracing::{info, warn};

use crate::{
    DifficultyProfile, EngineConfig, Judgment, NoteTimeline, PerformanceSummary, PitchSample,
    PlayerScoreState, Result, ScoringEngine, StarPowerState,
};

/// One player's performance of one chart.
///
/// Everything is validated in [`Session::new`]; after that, ticks cannot fail.
/// A session is single-writer: drive it from one thread or task.
#[derive(Debug)]
pub struct Session {
    timeline: NoteTimeline,
    engine: ScoringEngine,
    state: PlayerScoreState,
    star_power: StarPowerState,
    last_tick_ms: u64,
    finished: bool,
}

impl Session {
    /// Validates `config` and `difficulty` and builds a fresh performance.
    pub fn new(
        timeline: NoteTimeline,
        difficulty: impl Into<DifficultyProfile>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let difficulty = difficulty.into();
        let engine = ScoringEngine::new(
            config.scoring.clone(),
            config.star_power.clone(),
            difficulty,
        )?;

        info!(
            title = timeline.title().unwrap_or("untitled"),
            notes = timeline.total_notes(),
            tolerance = engine.difficulty().pitch_tolerance_semitones,
            "session ready"
        );

        Ok(Self {
            timeline,
            engine,
            state: PlayerScoreState::new(),
            star_power: StarPowerState::new(),
            last_tick_ms: 0,
            finished: false,
        })
    }

    pub fn timeline(&self) -> &NoteTimeline {
        &self.timeline
    }

    /// Score, combo and hit counts so far.
    pub fn state(&self) -> &PlayerScoreState {
        &self.state
    }

    pub fn star_power(&self) -> &StarPowerState {
        &self.star_power
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Scores the freshest estimate at playback position `now_ms`.
    pub fn tick(&mut self, now_ms: u64, estimate: Option<&PitchSample>) -> Vec<Judgment> {
        if self.finished {
            return Vec::new();
        }
        self.last_tick_ms = self.last_tick_ms.max(now_ms);
        self.engine.tick(
            now_ms,
            estimate,
            &self.timeline,
            &mut self.state,
            &mut self.star_power,
        )
    }

    /// Player pressed the star-power button. Refusals are logged and returned.
    pub fn activate_star_power(&mut self) -> Result<()> {
        if let Err(reason) = self.engine.activate_star_power(&mut self.star_power) {
            warn!(%reason, "star power activation rejected");
            return Err(reason.into());
        }
        Ok(())
    }

    /// Settles the remaining notes and returns them with the summary.
    /// Later calls return no judgments and the same summary.
    pub fn finish(&mut self) -> (Vec<Judgment>, PerformanceSummary) {
        let judgments = if self.finished {
            Vec::new()
        } else {
            self.finished = true;
            let end = self.last_tick_ms.max(self.timeline.end_ms());
            self.engine.finish(end, &mut self.state, &mut self.star_power)
        };

        let summary = self.summary();
        info!(
            score = summary.score,
            accuracy = summary.accuracy_percent,
            grade = %summary.grade,
            "session finished"
        );
        (judgments, summary)
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::from_state(&self.state, self.timeline.total_notes())
    }
}
