//! The contract between the chapter sequencer and a compressed-audio encoder.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Vendor string written when none is configured.
pub const DEFAULT_VENDOR: &str = concat!("opusgap ", env!("CARGO_PKG_VERSION"));

/// Errors reported by an encoder implementation.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(feature = "ogg-opus")]
    #[error("opus encoder error")]
    Opus(#[from] opus::Error),

    #[cfg(feature = "ogg-opus")]
    #[error("failed to set up the resampler")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[cfg(feature = "ogg-opus")]
    #[error("resampling failed")]
    Resample(#[from] rubato::ResampleError),

    #[error("unsupported encoder parameter: {0}")]
    InvalidParameter(String),
}

/// Vorbis-style comment metadata attached to every chapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comments {
    vendor: String,
    entries: Vec<String>,
}

impl Comments {
    pub fn new() -> Self {
        Self {
            vendor: DEFAULT_VENDOR.to_owned(),
            entries: Vec::new(),
        }
    }

    /// Add a `TAG=value` entry. Tags are stored upper-case.
    pub fn add(&mut self, tag: &str, value: &str) {
        self.entries
            .push(format!("{}={}", tag.to_ascii_uppercase(), value));
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Default for Comments {
    fn default() -> Self {
        Self::new()
    }
}

/// An open encoding session.
///
/// Samples are interleaved floats in [-1.0, 1.0). Dropping the session
/// releases it; call [`ChapterEncoder::drain`] first to flush buffered audio.
pub trait ChapterEncoder {
    /// Advisory hint about the precision of the source samples.
    fn set_bit_depth_hint(&mut self, bits: u16) -> Result<(), EncoderError>;

    /// Feed `frames` frames of interleaved samples.
    fn write_float(&mut self, samples: &[f32], frames: usize) -> Result<(), EncoderError>;

    /// End the current chapter and continue into a new one written to `output`,
    /// without resetting the encoder.
    fn continue_new_file(
        &mut self,
        output: &Path,
        comments: &Comments,
    ) -> Result<(), EncoderError>;

    /// Flush everything still buffered and finalize every chapter.
    fn drain(&mut self) -> Result<(), EncoderError>;
}

/// Creates encoding sessions.
pub trait EncoderFactory {
    type Encoder: ChapterEncoder;

    fn create(
        &mut self,
        output: &Path,
        comments: &Comments,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self::Encoder, EncoderError>;
}
