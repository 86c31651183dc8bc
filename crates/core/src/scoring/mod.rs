//! Note matching and score bookkeeping.
//!
//! Each note is judged at most once, on the first tick after its window
//! closes. While a note is active every voiced tick is compared against it:
//! in-tolerance ticks add to its accuracy, out-of-tolerance ticks after the
//! onset grace count against it. At settlement a note with more off-pitch
//! ticks than in-tolerance ones is a miss; otherwise it is rated from the mean
//! accuracy of its in-tolerance ticks. A note that heard nothing expires
//! without a judgment.

mod types;

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

pub use types::{
    Difficulty, DifficultyProfile, HitRating, Judgment, PitchVerdict, PlayerScoreState, Rating,
};

use crate::{
    star_power::ActivationRejected, NoteId, NoteTimeline, PitchSample, Result, ScoringConfig,
    StarPowerConfig, StarPowerState,
};

#[derive(Debug, Clone)]
struct NoteProgress {
    end_ms: u64,
    is_golden: bool,
    is_bonus: bool,
    in_tune_ticks: u32,
    accuracy_sum: f64,
    strayed_ticks: u32,
    star_power_ticks: u32,
}

impl NoteProgress {
    /// Mean-accuracy rating, or `None` if the singer strayed more than not.
    fn rating(&self) -> Option<HitRating> {
        if self.in_tune_ticks == 0 || self.strayed_ticks > self.in_tune_ticks {
            return None;
        }
        HitRating::from_accuracy(self.accuracy_sum / f64::from(self.in_tune_ticks))
    }

    /// Star power counts when it was on for at least half of the in-tune ticks.
    fn boosted(&self) -> bool {
        self.in_tune_ticks > 0 && self.star_power_ticks * 2 >= self.in_tune_ticks
    }
}

/// Matches the pitch stream of one player against a timeline.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    scoring: ScoringConfig,
    star_power: StarPowerConfig,
    difficulty: DifficultyProfile,
    open: BTreeMap<(u64, NoteId), NoteProgress>,
    settled: HashSet<NoteId>,
    last_tick_ms: Option<u64>,
}

impl ScoringEngine {
    /// Builds an engine for one player; fails if `difficulty` is invalid.
    pub fn new(
        scoring: ScoringConfig,
        star_power: StarPowerConfig,
        difficulty: DifficultyProfile,
    ) -> Result<Self> {
        difficulty.validate()?;
        Ok(Self {
            scoring,
            star_power,
            difficulty,
            open: BTreeMap::new(),
            settled: HashSet::new(),
            last_tick_ms: None,
        })
    }

    pub fn difficulty(&self) -> &DifficultyProfile {
        &self.difficulty
    }

    pub fn star_power_config(&self) -> &StarPowerConfig {
        &self.star_power
    }

    /// Whether `id` has been settled (judged or expired).
    pub fn is_settled(&self, id: NoteId) -> bool {
        self.settled.contains(&id)
    }

    /// Runs one update-loop tick.
    ///
    /// Notes whose window closed before `now_ms` are settled first, then the
    /// estimate (if voiced and above the silence gate) is compared against
    /// every active note, and finally star power advances by the time elapsed
    /// since the previous tick.
    pub fn tick(
        &mut self,
        now_ms: u64,
        estimate: Option<&PitchSample>,
        timeline: &NoteTimeline,
        state: &mut PlayerScoreState,
        star_power: &mut StarPowerState,
    ) -> Vec<Judgment> {
        let judgments = self.settle_closed(now_ms, state, star_power);

        if let Some(sung) = self.gate(estimate) {
            self.evaluate(now_ms, sung, timeline, star_power.is_active());
        }

        let elapsed = self
            .last_tick_ms
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(0);
        self.last_tick_ms = Some(self.last_tick_ms.map_or(now_ms, |last| last.max(now_ms)));
        star_power.update(elapsed);

        judgments
    }

    /// Settles every note still open, in chart order. Call once the song ends.
    pub fn finish(
        &mut self,
        now_ms: u64,
        state: &mut PlayerScoreState,
        star_power: &mut StarPowerState,
    ) -> Vec<Judgment> {
        self.settle_where(now_ms, state, star_power, |_| true)
    }

    /// Requests star power on behalf of the player.
    pub fn activate_star_power(
        &self,
        star_power: &mut StarPowerState,
    ) -> std::result::Result<(), ActivationRejected> {
        star_power.activate(&self.star_power)
    }

    /// Points for a hit given the combo *before* it.
    pub fn award(
        &self,
        rating: HitRating,
        is_golden: bool,
        is_bonus: bool,
        combo: u32,
        star_power_active: bool,
    ) -> u64 {
        let bucket = match rating {
            HitRating::Perfect => self.scoring.perfect_points,
            HitRating::Good => self.scoring.good_points,
            HitRating::Okay => self.scoring.okay_points,
        };

        let mut total = bucket * self.difficulty.score_multiplier;
        total += (f64::from(combo) + 1.0)
            * self.scoring.combo_bonus_unit
            * (self.difficulty.combo_multiplier - 1.0);
        if is_golden {
            total += self.scoring.golden_bonus;
        }
        if is_bonus {
            total *= self.scoring.bonus_note_multiplier;
        }
        if star_power_active {
            total *= self.star_power.score_multiplier;
        }

        total.round().max(0.0) as u64
    }

    /// Meter charge for a hit given the combo including it.
    pub fn charge_for(&self, rating: HitRating, is_golden: bool, combo: u32) -> f64 {
        let config = &self.star_power;
        let mut base = match rating {
            HitRating::Perfect => config.perfect_charge,
            HitRating::Good => config.good_charge,
            HitRating::Okay => config.okay_charge,
        };
        if is_golden {
            base = base.max(config.golden_charge);
        }
        let streak = combo.min(config.combo_charge_cap);
        base * (1.0 + f64::from(streak) * config.combo_charge_step)
    }

    fn gate(&self, estimate: Option<&PitchSample>) -> Option<f64> {
        let estimate = estimate?;
        if estimate.loudness < self.scoring.silence_loudness {
            return None;
        }
        estimate.midi.filter(|midi| midi.is_finite())
    }

    fn evaluate(
        &mut self,
        now_ms: u64,
        sung_midi: f64,
        timeline: &NoteTimeline,
        star_power_active: bool,
    ) {
        let tolerance = self.difficulty.pitch_tolerance_semitones;
        let grace = self.difficulty.timing_tolerance_ms;

        for note in timeline.active_at(now_ms) {
            if self.settled.contains(&note.id) {
                continue;
            }

            let progress = self
                .open
                .entry((note.start_ms, note.id))
                .or_insert_with(|| NoteProgress {
                    end_ms: note.end_ms(),
                    is_golden: note.is_golden,
                    is_bonus: note.is_bonus,
                    in_tune_ticks: 0,
                    accuracy_sum: 0.0,
                    strayed_ticks: 0,
                    star_power_ticks: 0,
                });

            let pitch_diff = (sung_midi - note.pitch_midi).abs();
            match PitchVerdict::evaluate(pitch_diff, tolerance) {
                PitchVerdict::OutOfTolerance => {
                    if now_ms >= note.start_ms.saturating_add(grace) {
                        progress.strayed_ticks += 1;
                    }
                }
                PitchVerdict::InTolerance(_) => {
                    progress.in_tune_ticks += 1;
                    progress.accuracy_sum += PitchVerdict::accuracy(pitch_diff, tolerance);
                    if star_power_active {
                        progress.star_power_ticks += 1;
                    }
                }
            }
        }
    }

    fn settle_closed(
        &mut self,
        now_ms: u64,
        state: &mut PlayerScoreState,
        star_power: &mut StarPowerState,
    ) -> Vec<Judgment> {
        self.settle_where(now_ms, state, star_power, |progress| progress.end_ms < now_ms)
    }

    fn settle_where(
        &mut self,
        now_ms: u64,
        state: &mut PlayerScoreState,
        star_power: &mut StarPowerState,
        should_settle: impl Fn(&NoteProgress) -> bool,
    ) -> Vec<Judgment> {
        let ready: Vec<(u64, NoteId)> = self
            .open
            .iter()
            .filter(|(_, progress)| should_settle(progress))
            .map(|(key, _)| *key)
            .collect();

        let mut judgments = Vec::with_capacity(ready.len());
        for key in ready {
            let Some(progress) = self.open.remove(&key) else {
                continue;
            };
            let note_id = key.1;
            self.settled.insert(note_id);
            if let Some(judgment) = self.settle(note_id, &progress, now_ms, state, star_power) {
                judgments.push(judgment);
            }
        }
        judgments
    }

    fn settle(
        &self,
        note_id: NoteId,
        progress: &NoteProgress,
        now_ms: u64,
        state: &mut PlayerScoreState,
        star_power: &mut StarPowerState,
    ) -> Option<Judgment> {
        match (progress.rating(), progress.strayed_ticks > 0) {
            (Some(rating), _) => {
                let points = self.award(
                    rating,
                    progress.is_golden,
                    progress.is_bonus,
                    state.combo(),
                    progress.boosted(),
                );
                state.record_hit(points);
                star_power.charge(self.charge_for(rating, progress.is_golden, state.combo()));
                debug!(note = %note_id, ?rating, points, combo = state.combo(), "note hit");
                Some(Judgment::Hit {
                    note_id,
                    rating,
                    points,
                    combo: state.combo(),
                    at_ms: now_ms,
                })
            }
            (None, true) => {
                state.record_miss();
                debug!(
                    note = %note_id,
                    strayed = progress.strayed_ticks,
                    in_tune = progress.in_tune_ticks,
                    "note missed"
                );
                Some(Judgment::Miss {
                    note_id,
                    at_ms: now_ms,
                })
            }
            (None, false) => {
                debug!(note = %note_id, "note expired without a rating");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Note;

    fn engine(difficulty: Difficulty) -> ScoringEngine {
        ScoringEngine::new(
            ScoringConfig::default(),
            StarPowerConfig::default(),
            difficulty.profile(),
        )
        .unwrap()
    }

    fn sung(midi: f64) -> PitchSample {
        PitchSample::voiced(midi, 0.95, 0.8)
    }

    struct Run {
        engine: ScoringEngine,
        state: PlayerScoreState,
        star: StarPowerState,
        judgments: Vec<Judgment>,
    }

    impl Run {
        fn new(difficulty: Difficulty) -> Self {
            Self {
                engine: engine(difficulty),
                state: PlayerScoreState::new(),
                star: StarPowerState::new(),
                judgments: Vec::new(),
            }
        }

        fn tick(&mut self, timeline: &NoteTimeline, now: u64, estimate: Option<PitchSample>) {
            let judgments = self.engine.tick(
                now,
                estimate.as_ref(),
                timeline,
                &mut self.state,
                &mut self.star,
            );
            self.judgments.extend(judgments);
        }

        fn sing(&mut self, timeline: &NoteTimeline, from: u64, to: u64, midi: Option<f64>) {
            let mut now = from;
            while now <= to {
                self.tick(timeline, now, midi.map(sung));
                now += 16;
            }
        }
    }

    #[test]
    fn holding_the_right_pitch_scores_once() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 500)]).unwrap();
        let mut run = Run::new(Difficulty::Medium);

        run.sing(&timeline, 0, 800, Some(60.1));

        assert_eq!(run.judgments.len(), 1);
        assert_eq!(run.judgments[0].rating(), Rating::Perfect);
        assert_eq!(run.state.notes_hit(), 1);
        assert_eq!(run.state.combo(), 1);
        assert!(run.engine.is_settled(NoteId(1)));
    }

    #[test]
    fn brief_scoop_still_rates_perfect() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 500)]).unwrap();
        let mut run = Run::new(Difficulty::Medium);

        // 7 ticks at 0.6 accuracy, 25 at 1.0: mean 0.9125.
        run.sing(&timeline, 0, 96, Some(60.8));
        run.sing(&timeline, 112, 600, Some(60.0));

        assert_eq!(run.judgments.len(), 1);
        assert_eq!(run.judgments[0].rating(), Rating::Perfect);
    }

    #[test]
    fn rating_follows_mean_accuracy_not_the_best_tick() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 500)]).unwrap();
        let mut run = Run::new(Difficulty::Medium);

        // 16 ticks at 0.975, 16 ticks at 0.5: mean 0.7375.
        run.sing(&timeline, 0, 240, Some(60.05));
        run.sing(&timeline, 256, 496, Some(61.0));
        run.sing(&timeline, 512, 600, None);

        assert_eq!(run.judgments.len(), 1);
        assert_eq!(run.judgments[0].rating(), Rating::Good);
    }

    #[test]
    fn one_in_tune_tick_does_not_rescue_an_off_pitch_note() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 1_000)]).unwrap();
        let mut run = Run::new(Difficulty::Hard);

        run.sing(&timeline, 0, 976, Some(64.0));
        run.tick(&timeline, 992, Some(sung(60.0)));
        run.sing(&timeline, 1_008, 1_100, None);

        assert_eq!(run.judgments.len(), 1);
        assert!(run.judgments[0].is_miss());
        assert_eq!(run.state.combo(), 0);
        assert_eq!(run.state.score(), 0);
    }

    #[test]
    fn mostly_in_tune_note_survives_a_wrong_tail() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 1_000)]).unwrap();
        let mut run = Run::new(Difficulty::Hard);

        // 38 ticks in tune, then 25 ticks four semitones sharp.
        run.sing(&timeline, 0, 592, Some(60.1));
        run.sing(&timeline, 608, 992, Some(64.0));
        run.sing(&timeline, 1_008, 1_100, None);

        assert_eq!(run.judgments.len(), 1);
        assert_eq!(run.judgments[0].rating(), Rating::Perfect);
        assert_eq!(run.state.combo(), 1);
    }

    #[test]
    fn sustained_wrong_pitch_misses_once() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 500)]).unwrap();
        let mut run = Run::new(Difficulty::Hard);

        run.sing(&timeline, 0, 800, Some(64.0));

        assert_eq!(run.judgments.len(), 1);
        assert!(run.judgments[0].is_miss());
        assert_eq!(run.state.notes_missed(), 1);
        assert_eq!(run.state.combo(), 0);
    }

    #[test]
    fn off_pitch_onset_inside_grace_is_forgiven() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 500)]).unwrap();
        let mut run = Run::new(Difficulty::Medium);

        // Scoop into the note during the grace window, then silence.
        run.sing(&timeline, 0, 96, Some(57.0));
        run.sing(&timeline, 112, 800, None);

        assert!(run.judgments.is_empty());
        assert_eq!(run.state.notes_missed(), 0);
        assert!(run.engine.is_settled(NoteId(1)));
    }

    #[test]
    fn silence_never_judges() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 300)]).unwrap();
        let mut run = Run::new(Difficulty::Easy);

        run.sing(&timeline, 0, 600, None);
        let quiet = PitchSample::voiced(60.0, 0.9, 0.05);
        run.tick(&timeline, 150, Some(quiet));
        run.tick(&timeline, 700, Some(quiet));

        assert!(run.judgments.is_empty());
        assert_eq!(run.state, PlayerScoreState::new());
    }

    #[test]
    fn silence_gate_is_strictly_below_threshold() {
        let timeline = NoteTimeline::from_notes(vec![
            Note::new(1, 60.0, 0, 300),
            Note::new(2, 60.0, 400, 300),
        ])
        .unwrap();
        let mut run = Run::new(Difficulty::Easy);

        let at_gate = PitchSample::voiced(60.0, 0.9, 0.1);
        let just_under = PitchSample::voiced(60.0, 0.9, 0.0999);
        run.tick(&timeline, 100, Some(at_gate));
        run.tick(&timeline, 500, Some(just_under));
        run.tick(&timeline, 800, None);

        assert_eq!(run.judgments.len(), 1);
        assert_eq!(run.judgments[0].note_id(), NoteId(1));
        assert!(!run.engine.is_settled(NoteId(2)));
        assert_eq!(run.state.notes_hit(), 1);
    }

    #[test]
    fn unpitched_input_is_ignored() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 300)]).unwrap();
        let mut run = Run::new(Difficulty::Easy);
        let unpitched = PitchSample::from(crate::PitchEstimate::unpitched(0.9));

        for now in (0..=600).step_by(16) {
            run.tick(&timeline, now, Some(unpitched));
        }
        assert!(run.judgments.is_empty());
    }

    #[test]
    fn finish_settles_open_notes() {
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 10_000)]).unwrap();
        let mut run = Run::new(Difficulty::Easy);

        run.sing(&timeline, 0, 320, Some(60.0));
        assert!(run.judgments.is_empty());

        let final_judgments = run.engine.finish(400, &mut run.state, &mut run.star);
        assert_eq!(final_judgments.len(), 1);
        assert_eq!(final_judgments[0].at_ms(), 400);
        assert_eq!(run.state.notes_hit(), 1);
    }

    #[test]
    fn golden_notes_pay_more_and_bonus_notes_multiply() {
        let engine = engine(Difficulty::Medium);
        let plain = engine.award(HitRating::Perfect, false, false, 3, false);
        let golden = engine.award(HitRating::Perfect, true, false, 3, false);
        let bonus = engine.award(HitRating::Perfect, false, true, 3, false);

        // 100 * 1.25 + 4 * 10 * 0.5
        assert_eq!(plain, 145);
        assert_eq!(golden, 195);
        assert_eq!(bonus, 218);
        assert_eq!(engine.award(HitRating::Perfect, false, false, 3, true), 290);
    }

    #[test]
    fn combo_bonus_is_zero_without_combo_multiplier() {
        let engine = engine(Difficulty::Easy);
        assert_eq!(engine.award(HitRating::Good, false, false, 0, false), 75);
        assert_eq!(engine.award(HitRating::Good, false, false, 40, false), 75);
    }

    #[test]
    fn hits_charge_star_power_with_combo() {
        let engine = engine(Difficulty::Medium);
        let perfect = engine.charge_for(HitRating::Perfect, false, 1);
        let good = engine.charge_for(HitRating::Good, false, 1);
        let golden = engine.charge_for(HitRating::Okay, true, 1);
        let streak = engine.charge_for(HitRating::Perfect, false, 20);

        assert!(golden > perfect && perfect > good);
        assert!(streak > perfect);
    }

    #[test]
    fn star_power_multiplies_points_while_active() {
        let notes = (0..20)
            .map(|i| Note::new(i, 60.0, u64::from(i) * 200, 150).golden())
            .collect();
        let timeline = NoteTimeline::from_notes(notes).unwrap();
        let mut run = Run::new(Difficulty::Medium);

        run.sing(&timeline, 0, 1_900, Some(60.0));
        assert!(run.star.meter() >= 50.0, "meter {}", run.star.meter());
        run.engine.activate_star_power(&mut run.star).unwrap();

        run.sing(&timeline, 1_904, 2_400, Some(60.0));
        let points = |id| {
            let judgment = run.judgments.iter().find(|j| j.note_id() == NoteId(id)).unwrap();
            judgment.points()
        };

        // Note 9 was mostly sung before the button press.
        let plain = run.engine.award(HitRating::Perfect, true, false, 9, false);
        assert_eq!(points(9), plain);
        let boosted = run.engine.award(HitRating::Perfect, true, false, 10, true);
        assert_eq!(points(10), boosted);
    }

    #[test]
    fn star_power_follows_when_the_note_was_sung() {
        let config = StarPowerConfig {
            active_duration_ms: 200,
            ..Default::default()
        };
        let mut run = Run::new(Difficulty::Medium);
        run.engine = ScoringEngine::new(
            ScoringConfig::default(),
            config,
            Difficulty::Medium.profile(),
        )
        .unwrap();
        run.star.charge(100.0);
        let timeline = NoteTimeline::from_notes(vec![Note::new(1, 60.0, 0, 300)]).unwrap();

        // Star power runs out mid-note, before the note settles.
        run.engine.activate_star_power(&mut run.star).unwrap();
        run.sing(&timeline, 0, 304, Some(60.0));
        assert!(!run.star.is_active());

        assert_eq!(run.judgments.len(), 1);
        let boosted = run.engine.award(HitRating::Perfect, false, false, 0, true);
        assert_eq!(run.judgments[0].points(), boosted);
    }

    #[test]
    fn overlapping_notes_are_judged_independently() {
        let timeline = NoteTimeline::from_notes(vec![
            Note::new(1, 60.0, 0, 400),
            Note::new(2, 67.0, 100, 200),
        ])
        .unwrap();
        let mut run = Run::new(Difficulty::Medium);

        run.sing(&timeline, 0, 600, Some(60.0));

        let ratings: Vec<_> = run
            .judgments
            .iter()
            .map(|j| (j.note_id(), j.rating()))
            .collect();
        assert_eq!(
            ratings,
            vec![(NoteId(2), Rating::Miss), (NoteId(1), Rating::Perfect)]
        );
        assert_eq!(run.state.max_combo(), 1);
    }
}
