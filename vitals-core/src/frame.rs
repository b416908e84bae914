//! # Frame Module
//!
//! Raw camera frames as handed over by the capture collaborator. Frames are
//! NV21 (YUV420SP): a full-resolution luma plane followed by an interleaved
//! V/U plane subsampled 2x2.

use std::time::Duration;

use crate::error::VitalsError;

/// A borrowed NV21 frame. The core never keeps the buffer past the call.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    /// Capture time on the source's monotonic clock.
    pub timestamp: Duration,
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], width: usize, height: usize, timestamp: Duration) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
        }
    }

    /// Number of bytes an NV21 frame of these dimensions occupies.
    pub fn expected_len(width: usize, height: usize) -> usize {
        width * height + width * height / 2
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Rejects frames the decoder cannot walk safely.
    ///
    /// Odd dimensions are refused because the interleaved chroma rows would
    /// run past the end of the buffer.
    pub fn validate(&self) -> Result<(), VitalsError> {
        if self.data.is_empty() {
            return Err(VitalsError::EmptyFrame);
        }
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(VitalsError::UnsupportedDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = Self::expected_len(self.width, self.height);
        if self.data.len() < expected {
            return Err(VitalsError::TruncatedFrame {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Owned frame, used when frames cross a thread boundary.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: Duration,
}

impl FrameBuffer {
    pub fn view(&self) -> Frame<'_> {
        Frame::new(&self.data, self.width, self.height, self.timestamp)
    }
}
