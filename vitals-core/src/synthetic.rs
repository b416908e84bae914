//! # Synthetic Signals
//!
//! Deterministic generators shared by the tests and the command-line driver:
//! plain sinusoids for the numeric engines, and NV21 video of a lit fingertip
//! whose luma carries a cardiac pulse and a slower breathing modulation.
//!
//! ## Features
//! - Uniform NV21 frames with chosen Y/V/U values
//! - Per-pixel ordered dither so sub-unit luma changes survive 8-bit quantization
//! - Optional seeded noise for reproducible runs
//! - Optional dark lead-in to simulate a finger placed late

use std::f64::consts::PI;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::capture::FrameSource;
use crate::frame::{Frame, FrameBuffer};

/// `offset + amplitude * sin(2π f t)` sampled at `fs`.
pub fn sinusoid(freq_hz: f64, fs: f64, n: usize, amplitude: f64, offset: f64) -> Vec<f64> {
    (0..n)
        .map(|i| offset + amplitude * (2.0 * PI * freq_hz * i as f64 / fs).sin())
        .collect()
}

/// NV21 frame with every luma byte set to `y` and every chroma pair to `(v, u)`.
pub fn uniform_frame(width: usize, height: usize, y: u8, v: u8, u: u8) -> Vec<u8> {
    let pixels = width * height;
    let mut data = vec![y; Frame::expected_len(width, height)];
    for pair in data[pixels..].chunks_exact_mut(2) {
        pair[0] = v;
        pair[1] = u;
    }
    data
}

/// Parameters of the simulated fingertip video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingertipConfig {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    /// Length of the recording; the source ends after this.
    pub duration_secs: f64,
    pub heart_rate_bpm: f64,
    pub breathing_rpm: f64,
    /// Peak luma deviation of the cardiac pulse.
    pub pulse_amplitude: f64,
    /// Peak luma deviation of the breathing baseline.
    pub breath_amplitude: f64,
    pub luma: f64,
    pub chroma_v: u8,
    pub chroma_u: u8,
    /// Half-width of uniform luma noise added per frame.
    pub noise: f64,
    pub seed: u64,
    /// Frames before this time show no finger (dark luma).
    pub contact_delay_secs: f64,
}

impl Default for FingertipConfig {
    fn default() -> Self {
        Self {
            width: 16,
            height: 12,
            fps: 30.0,
            duration_secs: 40.0,
            heart_rate_bpm: 72.0,
            breathing_rpm: 15.0,
            pulse_amplitude: 3.0,
            breath_amplitude: 1.0,
            luma: 110.0,
            chroma_v: 170,
            chroma_u: 120,
            noise: 0.0,
            seed: 7,
            contact_delay_secs: 0.0,
        }
    }
}

const DARK_LUMA: f64 = 10.0;
const NEUTRAL_CHROMA: u8 = 128;

/// Endless-until-duration NV21 source with virtual timestamps `i / fps`.
#[derive(Debug, Clone)]
pub struct SyntheticFingertip {
    config: FingertipConfig,
    index: u64,
    total: u64,
    rng: StdRng,
}

impl SyntheticFingertip {
    pub fn new(config: FingertipConfig) -> Self {
        let fps = config.fps.max(1.0);
        let total = (config.duration_secs.max(0.0) * fps).round() as u64;
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            index: 0,
            total,
            rng,
        }
    }

    pub fn config(&self) -> &FingertipConfig {
        &self.config
    }

    /// Total number of frames the source will produce.
    pub fn total_frames(&self) -> u64 {
        self.total
    }

    /// Noise-free mean luma at time `t`.
    pub fn luma_at(&self, t: f64) -> f64 {
        let c = &self.config;
        if t < c.contact_delay_secs {
            return DARK_LUMA;
        }
        let pulse = c.pulse_amplitude * (2.0 * PI * c.heart_rate_bpm / 60.0 * t).sin();
        let breath = c.breath_amplitude * (2.0 * PI * c.breathing_rpm / 60.0 * t).sin();
        c.luma + pulse + breath
    }

    /// Renders frame `i` without advancing the source.
    pub fn render(&mut self, i: u64) -> FrameBuffer {
        let t = i as f64 / self.config.fps.max(1.0);
        let mut level = self.luma_at(t);
        if self.config.noise > 0.0 && t >= self.config.contact_delay_secs {
            level += self.rng.gen_range(-self.config.noise..=self.config.noise);
        }

        let (width, height) = (self.config.width, self.config.height);
        let (v, u) = if t < self.config.contact_delay_secs {
            (NEUTRAL_CHROMA, NEUTRAL_CHROMA)
        } else {
            (self.config.chroma_v, self.config.chroma_u)
        };
        let mut data = uniform_frame(width, height, 0, v, u);
        let pixels = width * height;
        for (p, y) in data[..pixels].iter_mut().enumerate() {
            let dither = (p as f64 + 0.5) / pixels as f64;
            *y = (level + dither).floor().clamp(0.0, 255.0) as u8;
        }

        FrameBuffer {
            data,
            width,
            height,
            timestamp: Duration::from_secs_f64(t),
        }
    }
}

impl FrameSource for SyntheticFingertip {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        if self.index >= self.total {
            return Ok(None);
        }
        let frame = self.render(self.index);
        self.index += 1;
        Ok(Some(frame))
    }
}
