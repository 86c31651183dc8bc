use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    CaptureConfig, KaraokeError, PitchConfig, PitchEstimate, PitchEstimator, Result, SampleWindow,
};

/// MIDI note number of concert A.
pub const A4_MIDI: f64 = 69.0;
/// Frequency of concert A in Hz.
pub const A4_HZ: f64 = 440.0;

/// Converts a frequency to a fractional MIDI pitch (`69 + 12·log2(f/440)`).
pub fn frequency_to_midi(frequency_hz: f64) -> f64 {
    A4_MIDI + 12.0 * (frequency_hz / A4_HZ).log2()
}

/// Exact inverse of [`frequency_to_midi`], used when authoring charts.
pub fn midi_to_frequency(midi: f64) -> f64 {
    A4_HZ * 2f64.powf((midi - A4_MIDI) / 12.0)
}

/// Estimate expressed in pitch space, as consumed by the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchSample {
    pub midi: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub confidence: f64,
    pub loudness: f64,
}

impl PitchSample {
    /// A voiced sample at the given MIDI pitch.
    pub fn voiced(midi: f64, confidence: f64, loudness: f64) -> Self {
        Self {
            midi: Some(midi),
            frequency_hz: Some(midi_to_frequency(midi)),
            confidence,
            loudness,
        }
    }

    pub fn silent() -> Self {
        Self::from(PitchEstimate::silent())
    }
}

impl From<PitchEstimate> for PitchSample {
    fn from(estimate: PitchEstimate) -> Self {
        Self {
            midi: estimate.frequency_hz.map(frequency_to_midi),
            frequency_hz: estimate.frequency_hz,
            confidence: estimate.confidence,
            loudness: estimate.loudness,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<PitchSample>,
    sequence: u64,
}

/// Capture-side half of the pitch hand-off.
///
/// Every pushed window is estimated and overwrites the shared slot. Nothing is
/// queued: the update loop always sees the freshest estimate and a slow
/// consumer simply skips windows.
#[derive(Debug)]
pub struct PitchTracker {
    sample_rate: u32,
    estimator: PitchEstimator,
    slot: Arc<Mutex<Slot>>,
}

impl PitchTracker {
    pub fn new(capture: &CaptureConfig, pitch: PitchConfig) -> Self {
        Self {
            sample_rate: capture.sample_rate,
            estimator: PitchEstimator::new(pitch),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns a reader for the update loop. Handles are cheap to clone.
    pub fn handle(&self) -> PitchHandle {
        PitchHandle {
            slot: self.slot.clone(),
        }
    }

    /// Estimates one captured window and publishes it. Empty windows are
    /// dropped without touching the slot.
    pub fn push_window(&mut self, samples: &[f32]) -> Result<Option<PitchSample>> {
        if samples.is_empty() {
            warn!("dropping empty capture window");
            return Ok(None);
        }

        let window = SampleWindow::new(samples, self.sample_rate)?;
        let estimate = self.estimator.estimate(&window)?;
        let sample = PitchSample::from(estimate);

        let mut slot = lock_slot(&self.slot)?;
        slot.latest = Some(sample);
        slot.sequence += 1;
        Ok(Some(sample))
    }

    /// Forgets the published estimate, e.g. when the capture device is lost.
    pub fn clear(&self) -> Result<()> {
        let mut slot = lock_slot(&self.slot)?;
        slot.latest = None;
        Ok(())
    }
}

/// Update-loop half of the pitch hand-off.
#[derive(Clone)]
pub struct PitchHandle {
    slot: Arc<Mutex<Slot>>,
}

impl PitchHandle {
    /// Freshest published estimate, if any window has been analysed yet.
    pub fn latest_estimate(&self) -> Result<Option<PitchSample>> {
        Ok(lock_slot(&self.slot)?.latest)
    }

    /// Number of windows published so far. Lets a consumer spot a stalled
    /// capture path by comparing successive reads.
    pub fn sequence(&self) -> Result<u64> {
        Ok(lock_slot(&self.slot)?.sequence)
    }
}

impl std::fmt::Debug for PitchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchHandle").finish()
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> Result<MutexGuard<'_, Slot>> {
    slot.lock().map_err(|_| KaraokeError::Poisoned("pitch hand-off slot"))
}
