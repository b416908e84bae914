//! # Channel Extraction Module
//!
//! Turns an NV21 camera frame into per-channel average intensities. The
//! colour conversion is the integer BT.601 approximation used by camera
//! stacks, evaluated through precomputed lookup tables so a full frame can be
//! decoded well inside one frame interval.
//!
//! ## Features
//! - Fixed-point YUV to RGB conversion with clamping to [0,255]
//! - Exposure normalization of the red average against a reference luminance
//! - Rolling average over the recent normalized red values
//! - Rejection of "no finger" (too dark) and saturated frames

use std::collections::VecDeque;
use std::time::Duration;

use log::trace;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::error::VitalsError;
use crate::frame::Frame;

const Y_OFFSET: i32 = 16;
const UV_OFFSET: i32 = 128;
const ROUNDING: i32 = 128;

/// `298 * (Y - 16)`, with luma below the offset clamped to zero.
static LUMA: Lazy<[i32; 256]> = Lazy::new(|| table(|y| 298 * (y - Y_OFFSET).max(0)));
static RED_V: Lazy<[i32; 256]> = Lazy::new(|| table(|v| 409 * (v - UV_OFFSET)));
static GREEN_V: Lazy<[i32; 256]> = Lazy::new(|| table(|v| 208 * (v - UV_OFFSET)));
static GREEN_U: Lazy<[i32; 256]> = Lazy::new(|| table(|u| 100 * (u - UV_OFFSET)));
static BLUE_U: Lazy<[i32; 256]> = Lazy::new(|| table(|u| 517 * (u - UV_OFFSET)));

fn table(f: impl Fn(i32) -> i32) -> [i32; 256] {
    let mut t = [0; 256];
    for (i, slot) in t.iter_mut().enumerate() {
        *slot = f(i as i32);
    }
    t
}

#[inline]
fn clamp_byte(v: i32) -> u64 {
    v.clamp(0, 255) as u64
}

/// Colour channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// One accepted frame reduced to channel intensities in [0,255].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    pub timestamp: Duration,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl ChannelSample {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }
}

/// Raw per-frame averages before normalization and smoothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbAverages {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

/// Decodes a validated NV21 frame and averages each channel over all pixels.
pub fn average_rgb(frame: &Frame<'_>) -> Result<RgbAverages, VitalsError> {
    frame.validate()?;

    let (width, height) = (frame.width, frame.height);
    let frame_size = frame.pixel_count();
    let data = frame.data;
    let (luma, red_v, green_v, green_u, blue_u) = (&*LUMA, &*RED_V, &*GREEN_V, &*GREEN_U, &*BLUE_U);

    let (mut sum_r, mut sum_g, mut sum_b) = (0u64, 0u64, 0u64);
    for j in 0..height {
        let row = &data[j * width..(j + 1) * width];
        let chroma_row = &data[frame_size + (j >> 1) * width..frame_size + (j >> 1) * width + width];
        for (pair, luma_pair) in chroma_row.chunks_exact(2).zip(row.chunks_exact(2)) {
            let (v, u) = (pair[0] as usize, pair[1] as usize);
            for &y in luma_pair {
                let y_scaled = luma[y as usize];
                sum_r += clamp_byte((y_scaled + red_v[v] + ROUNDING) >> 8);
                sum_g += clamp_byte((y_scaled - green_v[v] - green_u[u] + ROUNDING) >> 8);
                sum_b += clamp_byte((y_scaled + blue_u[u] + ROUNDING) >> 8);
            }
        }
    }

    let n = frame_size as f64;
    Ok(RgbAverages {
        red: sum_r as f64 / n,
        green: sum_g as f64 / n,
        blue: sum_b as f64 / n,
    })
}

/// Stateful extractor owned by one measurement session.
///
/// The only state is the rolling history of normalized red values; it is
/// cleared whenever the owning session resets.
#[derive(Debug, Clone)]
pub struct ChannelExtractor {
    config: ExtractorConfig,
    red_history: VecDeque<f64>,
}

impl ChannelExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let window = config.smoothing_window.max(1);
        Self {
            config,
            red_history: VecDeque::with_capacity(window),
        }
    }

    pub fn reset(&mut self) {
        self.red_history.clear();
    }

    /// Decodes one frame into a sample.
    ///
    /// Returns `Ok(None)` when the smoothed red level is outside the accepted
    /// range, meaning no finger covers the lens or the sensor is saturated.
    /// Input errors leave the smoothing history untouched.
    pub fn extract(&mut self, frame: &Frame<'_>) -> Result<Option<ChannelSample>, VitalsError> {
        let averages = average_rgb(frame)?;

        let mut red = averages.red;
        let luminance = (averages.red + averages.green + averages.blue) / 3.0;
        if luminance > 0.0 {
            red = red / luminance * self.config.reference_luminance;
        }

        let smoothed = self.smooth_red(red);
        if !smoothed.is_finite() || smoothed < self.config.min_red || smoothed > self.config.max_red {
            trace!("[EXTRACT] rejected frame, smoothed red {smoothed:.1}");
            return Ok(None);
        }

        Ok(Some(ChannelSample {
            timestamp: frame.timestamp,
            red: smoothed,
            green: averages.green,
            blue: averages.blue,
        }))
    }

    fn smooth_red(&mut self, value: f64) -> f64 {
        if self.red_history.len() >= self.config.smoothing_window.max(1) {
            self.red_history.pop_front();
        }
        self.red_history.push_back(value);
        self.red_history.iter().sum::<f64>() / self.red_history.len() as f64
    }
}
