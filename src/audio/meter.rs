//! Loudness estimation and voice thresholding
//!
//! Levels use the same 0-255 byte scale as a browser analyser node:
//! each frequency bin is smoothed over time, converted to decibels and
//! mapped linearly from [`MIN_DECIBELS`, `MAX_DECIBELS`] onto 0..=255.
//! The loudness is a weighted average that favours low bins, where most
//! voice energy sits.

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use crate::config::MicConfig;
use crate::state::VisualState;

pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Maps a raw loudness level onto a voice state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceGate {
    pub talk_threshold: f32,
    pub scream_threshold: f32,
}

impl VoiceGate {
    pub fn from_config(config: &MicConfig) -> Self {
        Self {
            talk_threshold: config.talk_threshold,
            scream_threshold: config.scream_threshold,
        }
    }

    /// State to request for a level, or `None` below the talk threshold
    ///
    /// Sub-threshold levels produce nothing so the voice channel decays
    /// on its own linger timer.
    pub fn classify(&self, level: f32) -> Option<VisualState> {
        if level >= self.scream_threshold {
            Some(VisualState::Scream)
        } else if level >= self.talk_threshold {
            Some(VisualState::Talk)
        } else {
            None
        }
    }
}

/// Low-frequency-weighted average of byte-scaled bins
pub fn weighted_level(bins: &[f32]) -> f32 {
    let (sum, weight) = bins
        .iter()
        .enumerate()
        .fold((0.0f32, 0.0f32), |(sum, weight), (i, value)| {
            let w = 1.0 / (i as f32 + 1.0);
            (sum + value * w, weight + w)
        });

    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

/// Convert a linear magnitude to the 0-255 analyser scale
pub fn magnitude_to_byte(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0).floor()
}

/// Smoothed spectral loudness over fixed-size sample blocks
pub struct LoudnessMeter {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    smoothed: Vec<f32>,
    bins: Vec<f32>,
    smoothing: f32,
}

impl LoudnessMeter {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let bin_count = fft_size / 2;

        Self {
            fft,
            window: blackman(fft_size),
            input,
            spectrum,
            smoothed: vec![0.0; bin_count],
            bins: vec![0.0; bin_count],
            smoothing,
        }
    }

    /// Samples consumed per call to [`process`](Self::process)
    pub fn block_size(&self) -> usize {
        self.window.len()
    }

    /// Analyse one block of samples in `[-1, 1]` and return the level
    ///
    /// Shorter blocks are zero-padded; extra samples are ignored.
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        for (i, slot) in self.input.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = sample * self.window[i];
        }

        if self.fft.process(&mut self.input, &mut self.spectrum).is_err() {
            return 0.0;
        }

        let n = self.window.len() as f32;
        for (i, bin) in self.bins.iter_mut().enumerate() {
            let magnitude = self.spectrum[i].norm() / n;
            let smoothed = self.smoothing * self.smoothed[i] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[i] = smoothed;
            *bin = magnitude_to_byte(smoothed);
        }

        weighted_level(&self.bins)
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;

    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_gate_thresholds_are_inclusive() {
        let gate = VoiceGate {
            talk_threshold: 15.0,
            scream_threshold: 150.0,
        };
        assert_eq!(gate.classify(0.0), None);
        assert_eq!(gate.classify(14.9), None);
        assert_eq!(gate.classify(15.0), Some(VisualState::Talk));
        assert_eq!(gate.classify(149.0), Some(VisualState::Talk));
        assert_eq!(gate.classify(150.0), Some(VisualState::Scream));
        assert_eq!(gate.classify(255.0), Some(VisualState::Scream));
    }

    #[test]
    fn test_weighted_level() {
        assert_eq!(weighted_level(&[]), 0.0);
        assert!((weighted_level(&[100.0; 8]) - 100.0).abs() < 1e-3);
        // the first bin dominates
        let low = weighted_level(&[200.0, 0.0, 0.0, 0.0]);
        let high = weighted_level(&[0.0, 0.0, 0.0, 200.0]);
        assert!(low > high);
    }

    #[test]
    fn test_magnitude_to_byte_range() {
        assert_eq!(magnitude_to_byte(0.0), 0.0);
        assert_eq!(magnitude_to_byte(1e-6), 0.0);
        assert_eq!(magnitude_to_byte(1.0), 255.0);
        let mid = magnitude_to_byte(10f32.powf(-65.0 / 20.0));
        assert!((mid - 127.0).abs() <= 1.0);
    }

    #[test]
    fn test_silence_is_zero() {
        let mut meter = LoudnessMeter::new(256, 0.85);
        assert_eq!(meter.block_size(), 256);
        for _ in 0..4 {
            assert_eq!(meter.process(&[0.0; 256]), 0.0);
        }
    }

    #[test]
    fn test_louder_signal_reads_higher() {
        let mut quiet = LoudnessMeter::new(256, 0.0);
        let mut loud = LoudnessMeter::new(256, 0.0);
        let q = quiet.process(&sine(300.0, 0.01, 48_000.0, 256));
        let l = loud.process(&sine(300.0, 0.8, 48_000.0, 256));
        assert!(l > q, "loud {} should exceed quiet {}", l, q);
        assert!(l > 0.0);
    }

    #[test]
    fn test_smoothing_ramps_up() {
        let mut meter = LoudnessMeter::new(256, 0.85);
        let block = sine(300.0, 0.5, 48_000.0, 256);
        let first = meter.process(&block);
        let later = (0..20).map(|_| meter.process(&block)).last().unwrap();
        assert!(later >= first);
    }
}
