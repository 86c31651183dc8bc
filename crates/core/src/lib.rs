//! Core library for the karaoke game.
//!
//! Turns microphone windows into pitch estimates and scores them against a
//! chart of timed notes. The pieces, leaf first:
//!
//! * [`pitch`]: YIN fundamental-frequency estimation per sample window.
//! * [`stream`]: frequency/MIDI conversion and the freshest-value hand-off
//!   between the capture path and the update loop.
//! * [`timeline`]: the immutable chart and the playback clock.
//! * [`scoring`] and [`star_power`]: per-tick judgments, combo and meter.
//! * [`session`] and [`results`]: a validated performance and its summary.
//!
//! Nothing in here owns a timer or a thread; the host calls
//! [`Session::tick`] from its own loop.

pub mod config;
pub mod error;
pub mod pitch;
pub mod results;
pub mod scoring;
pub mod session;
pub mod star_power;
pub mod stream;
pub mod timeline;

pub use config::{CaptureConfig, EngineConfig, PitchConfig, ScoringConfig, StarPowerConfig};
pub use error::{KaraokeError, Result};
pub use pitch::{PitchEstimate, PitchEstimator, SampleWindow};
pub use results::{Grade, PerformanceSummary};
pub use scoring::{
    Difficulty, DifficultyProfile, HitRating, Judgment, PitchVerdict, PlayerScoreState, Rating,
    ScoringEngine,
};
pub use session::Session;
pub use star_power::{ActivationRejected, StarPowerState};
pub use stream::{frequency_to_midi, midi_to_frequency, PitchHandle, PitchSample, PitchTracker};
pub use timeline::{LyricLine, Note, NoteId, NoteTimeline, PlaybackClock};
