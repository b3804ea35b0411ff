//! Audio frame sources consumed by the spectrum routines.
//!
//! A source yields one [`AudioFrame`] per analysis cycle. Reads are bounded by
//! a timeout so a stalled source reports [`Fetch::Pending`] instead of
//! blocking the routine that polls it.

mod analyzer;
#[cfg(feature = "capture")]
mod capture;
mod spectral;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use analyzer::{render_analyzer_config, AnalyzerProcess, FrameStream, RawFrameReader};
#[cfg(feature = "capture")]
pub use capture::CpalCapture;
pub use spectral::{SampleSource, SpectralAnalyzer};

/// Normalized magnitudes, one per bar, each in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    levels: Vec<f32>,
}

impl AudioFrame {
    /// Builds a frame, clamping every level into `[0, 1]`.
    pub fn from_levels(levels: Vec<f32>) -> Self {
        let levels = levels
            .into_iter()
            .map(|level| if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) })
            .collect();
        Self { levels }
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Outcome of a bounded read from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Ready(T),
    /// Nothing arrived before the read timeout; try again.
    Pending,
    /// The source is exhausted. This is a normal end, not a failure.
    Ended,
}

impl<T> Fetch<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Anything that yields audio frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Fetch<AudioFrame>>;
}

/// Sample width of the analyzer's raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitFormat {
    #[serde(rename = "8bit")]
    Eight,
    #[serde(rename = "16bit")]
    Sixteen,
}

impl BitFormat {
    pub fn byte_width(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Largest raw value, used to normalize samples into `[0, 1]`.
    pub fn divisor(self) -> f32 {
        match self {
            Self::Eight => 255.0,
            Self::Sixteen => 65_535.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eight => "8bit",
            Self::Sixteen => "16bit",
        }
    }

    /// Decodes one raw record. 16-bit samples use the host byte order, which
    /// is what the analyzer writes.
    pub fn decode(self, record: &[u8]) -> AudioFrame {
        let divisor = self.divisor();
        let levels = match self {
            Self::Eight => record.iter().map(|&raw| f32::from(raw) / divisor).collect(),
            Self::Sixteen => record
                .chunks_exact(2)
                .map(|raw| f32::from(u16::from_ne_bytes([raw[0], raw[1]])) / divisor)
                .collect(),
        };
        AudioFrame { levels }
    }
}
