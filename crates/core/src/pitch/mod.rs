//! Monophonic fundamental-frequency estimation.
//!
//! [`PitchEstimator`] implements YIN: a squared-difference function over lags
//! up to half the window, normalised by its cumulative mean, searched for the
//! first dip below an absolute threshold. Silence, missing periodicity and
//! results outside the vocal band all come back as an estimate without a
//! frequency. Callers must read that as "no pitch", never as 0 Hz.

use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex64, ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{KaraokeError, PitchConfig, Result};

/// Borrowed block of mono samples in [-1, 1] together with its sample rate.
#[derive(Debug, Clone, Copy)]
pub struct SampleWindow<'a> {
    samples: &'a [f32],
    sample_rate: u32,
}

impl<'a> SampleWindow<'a> {
    /// Wraps one capture window. Fails if `sample_rate` is zero.
    pub fn new(samples: &'a [f32], sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(KaraokeError::InvalidInput(
                "sample window requires a positive sample rate".to_string(),
            ));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Raw mono samples, nominally in [-1, 1].
    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Window length in samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Result of analysing one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// `None` when the window is silent, unpitched or out of the vocal band.
    pub frequency_hz: Option<f64>,
    /// In [0, 1].
    pub confidence: f64,
    /// Scaled RMS in [0, 1].
    pub loudness: f64,
}

impl PitchEstimate {
    /// Estimate reported for windows below the silence threshold.
    pub fn silent() -> Self {
        Self {
            frequency_hz: None,
            confidence: 0.0,
            loudness: 0.0,
        }
    }

    /// Audible but without an acceptable period.
    pub fn unpitched(loudness: f64) -> Self {
        Self {
            frequency_hz: None,
            confidence: 0.0,
            loudness,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// YIN pitch estimator. Output depends only on the window and the
/// configuration; the mutable state is scratch memory reused between calls.
pub struct PitchEstimator {
    config: PitchConfig,
    planner: RealFftPlanner<f64>,
    buffers: Option<YinBuffers>,
}

impl PitchEstimator {
    /// Creates an estimator. FFT plans are built lazily on the first window
    /// and rebuilt only when the window length changes.
    pub fn new(config: PitchConfig) -> Self {
        Self {
            config,
            planner: RealFftPlanner::new(),
            buffers: None,
        }
    }

    /// Thresholds and band limits used by [`estimate`](Self::estimate).
    pub fn config(&self) -> &PitchConfig {
        &self.config
    }

    /// Analyses a single window.
    pub fn estimate(&mut self, window: &SampleWindow<'_>) -> Result<PitchEstimate> {
        let samples = window.samples();
        if samples.len() < 4 {
            return Ok(PitchEstimate::silent());
        }

        let rms = compute_rms(samples);
        if !(rms >= self.config.silence_rms) || rms == 0.0 {
            return Ok(PitchEstimate::silent());
        }
        let loudness = (rms * self.config.loudness_gain).clamp(0.0, 1.0);

        let PitchConfig {
            yin_threshold,
            min_frequency_hz,
            max_frequency_hz,
            ..
        } = self.config;
        let buffers = self.prepare(samples.len());
        buffers.difference(samples)?;
        let cmnd = buffers.normalise();

        let Some(tau) = first_dip(cmnd, yin_threshold) else {
            return Ok(PitchEstimate::unpitched(loudness));
        };

        let lag = refine_lag(cmnd, tau);
        if lag <= 0.0 {
            return Ok(PitchEstimate::unpitched(loudness));
        }

        let frequency = f64::from(window.sample_rate()) / lag;
        if frequency < min_frequency_hz || frequency > max_frequency_hz {
            return Ok(PitchEstimate::unpitched(loudness));
        }

        Ok(PitchEstimate {
            frequency_hz: Some(frequency),
            confidence: (1.0 - cmnd[tau]).clamp(0.0, 1.0),
            loudness,
        })
    }

    fn prepare(&mut self, size: usize) -> &mut YinBuffers {
        let planner = &mut self.planner;
        let buffers = self
            .buffers
            .get_or_insert_with(|| YinBuffers::new(planner, size));
        if buffers.size != size {
            *buffers = YinBuffers::new(planner, size);
        }
        buffers
    }
}

impl fmt::Debug for PitchEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchEstimator")
            .field("config", &self.config)
            .field("buffers", &self.buffers)
            .finish()
    }
}

/// FFT plans and scratch space for one window length.
struct YinBuffers {
    size: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    head: Vec<f64>,
    full: Vec<f64>,
    head_spectrum: Vec<Complex64>,
    full_spectrum: Vec<Complex64>,
    forward_scratch: Vec<Complex64>,
    inverse_scratch: Vec<Complex64>,
    correlation: Vec<f64>,
    energy: Vec<f64>,
    diff: Vec<f64>,
    cmnd: Vec<f64>,
}

impl YinBuffers {
    fn new(planner: &mut RealFftPlanner<f64>, size: usize) -> Self {
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let max_lag = size / 2;
        Self {
            size,
            head: forward.make_input_vec(),
            full: forward.make_input_vec(),
            head_spectrum: forward.make_output_vec(),
            full_spectrum: forward.make_output_vec(),
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            correlation: inverse.make_output_vec(),
            energy: vec![0.0; size + 1],
            diff: vec![0.0; max_lag + 1],
            cmnd: vec![0.0; max_lag + 1],
            forward,
            inverse,
        }
    }

    /// Fills `diff[τ] = Σ_{i<W} (x[i] - x[i+τ])²` for `τ` in `0..=N/2`,
    /// with `W = N/2`, expanded as two energy terms minus twice the
    /// cross-correlation of the first half against the whole window.
    fn difference(&mut self, samples: &[f32]) -> Result<()> {
        let n = self.size;
        let integration = n / 2;
        let max_lag = n / 2;

        for (index, sample) in samples.iter().enumerate() {
            let value = f64::from(*sample);
            self.full[index] = value;
            self.head[index] = if index < integration { value } else { 0.0 };
        }

        self.forward.process_with_scratch(
            &mut self.head,
            &mut self.head_spectrum,
            &mut self.forward_scratch,
        )?;
        self.forward.process_with_scratch(
            &mut self.full,
            &mut self.full_spectrum,
            &mut self.forward_scratch,
        )?;

        for (head, full) in self.head_spectrum.iter_mut().zip(&self.full_spectrum) {
            *head = head.conj() * full;
        }
        // DC and Nyquist bins of a real signal carry no imaginary part.
        self.head_spectrum[0].im = 0.0;
        if n % 2 == 0 {
            if let Some(last) = self.head_spectrum.last_mut() {
                last.im = 0.0;
            }
        }

        self.inverse.process_with_scratch(
            &mut self.head_spectrum,
            &mut self.correlation,
            &mut self.inverse_scratch,
        )?;

        self.energy[0] = 0.0;
        for (index, sample) in samples.iter().enumerate() {
            let value = f64::from(*sample);
            self.energy[index + 1] = self.energy[index] + value * value;
        }

        let head_energy = self.energy[integration];
        let scale = 1.0 / n as f64;
        for tau in 0..=max_lag {
            let lagged_energy = self.energy[tau + integration] - self.energy[tau];
            let correlation = self.correlation[tau] * scale;
            self.diff[tau] = (head_energy + lagged_energy - 2.0 * correlation).max(0.0);
        }

        Ok(())
    }

    /// Cumulative-mean-normalised difference, `d'(0) = 1`.
    fn normalise(&mut self) -> &[f64] {
        self.cmnd[0] = 1.0;
        let mut running = 0.0;
        for tau in 1..self.diff.len() {
            running += self.diff[tau];
            self.cmnd[tau] = if running > 0.0 {
                self.diff[tau] * tau as f64 / running
            } else {
                1.0
            };
        }
        &self.cmnd
    }
}

impl fmt::Debug for YinBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YinBuffers")
            .field("size", &self.size)
            .finish()
    }
}

/// First lag from 2 upward whose normalised difference drops below
/// `threshold`, walked forward to the bottom of its valley.
fn first_dip(cmnd: &[f64], threshold: f64) -> Option<usize> {
    let last = cmnd.len().checked_sub(1)?;
    let mut tau = (2..=last).find(|&tau| cmnd[tau] < threshold)?;
    while tau < last && cmnd[tau + 1] < cmnd[tau] {
        tau += 1;
    }
    Some(tau)
}

/// Parabolic interpolation around `tau` for a fractional lag.
fn refine_lag(cmnd: &[f64], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= cmnd.len() {
        return tau as f64;
    }

    let left = cmnd[tau - 1];
    let centre = cmnd[tau];
    let right = cmnd[tau + 1];
    let curvature = left - 2.0 * centre + right;
    if curvature.abs() < 1e-12 {
        return tau as f64;
    }

    let shift = (left - right) / (2.0 * curvature);
    tau as f64 + shift.clamp(-1.0, 1.0)
}

fn compute_rms(samples: &[f32]) -> f64 {
    let sum: f64 = samples
        .iter()
        .map(|sample| {
            let value = f64::from(*sample);
            value * value
        })
        .sum();
    (sum / samples.len() as f64).sqrt()
}
