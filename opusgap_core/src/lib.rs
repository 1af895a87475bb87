//! Gapless chaptered encoding of 16-bit PCM WAV batches.
//!
//! A list of WAV file names is read line by line. Every file becomes one
//! chapter of a single continuously running encoder, so consecutive tracks
//! play back without gaps. The first file fixes the sample rate and channel
//! count for the whole run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod convert;
pub mod encoder;
pub mod header;
pub mod names;
#[cfg(feature = "ogg-opus")]
pub mod ogg_opus;
mod sequencer;

pub use encoder::{ChapterEncoder, Comments, EncoderError, EncoderFactory};
pub use header::{AudioFormat, HeaderError, WavHeader};
pub use names::{output_name, NameSource, MAX_INPUT_NAME_LEN};
#[cfg(feature = "ogg-opus")]
pub use ogg_opus::{OggOpusEncoder, OggOpusFactory};
pub use sequencer::{
    plan_chapters, run, ChapterSequencer, PlannedChapter, RunSummary, SequencerState,
};

/// Errors that end a conversion run.
#[derive(Debug, Error)]
pub enum OpusGapError {
    /// The name list was empty.
    #[error("there aren't any file names")]
    InputExhausted,

    /// A listed name leaves no room for the output suffix.
    #[error("line {line}: file name is longer than {} bytes: {name}", MAX_INPUT_NAME_LEN)]
    NameTooLong { line: usize, name: String },

    /// Reading the name list itself failed.
    #[error("line {line}: failed to read file name")]
    UnreadableName {
        line: usize,
        #[source]
        source: io::Error,
    },

    /// A listed file could not be opened.
    #[error("failed to open file: {}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a canonical 16-bit PCM WAV.
    #[error("unsupported format: {}", path.display())]
    UnsupportedFormat {
        path: PathBuf,
        #[source]
        reason: HeaderError,
    },

    /// A later chapter does not share the first chapter's rate and channel count.
    #[error(
        "you can't change the sample rate or number of channels: {} is {found}, expected {expected}",
        path.display()
    )]
    FormatMismatch {
        path: PathBuf,
        expected: AudioFormat,
        found: AudioFormat,
    },

    /// The data chunk ended before its declared size.
    #[error("error reading input file: {}", path.display())]
    ShortRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sample buffer for a chapter could not be allocated.
    #[error("out of memory reading {samples} samples from {}", path.display())]
    Allocation { path: PathBuf, samples: usize },

    /// Stream creation, sample submission, chapter continuation or drain failed.
    #[error("encoder failed: {}", path.display())]
    Encoder {
        path: PathBuf,
        #[source]
        source: EncoderError,
    },

    /// A chapter or finish was requested from a sequencer that already
    /// finished or failed.
    #[error("the chapter sequencer is already closed")]
    SequencerClosed,
}

impl OpusGapError {
    /// Process exit status for this kind of failure.
    ///
    /// Statuses start at 3; 1 is left for front-end failures and 2 for
    /// command-line usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            OpusGapError::InputExhausted => 3,
            OpusGapError::NameTooLong { .. } => 4,
            OpusGapError::UnreadableName { .. } => 5,
            OpusGapError::FileOpen { .. } => 6,
            OpusGapError::UnsupportedFormat { .. } => 7,
            OpusGapError::FormatMismatch { .. } => 8,
            OpusGapError::ShortRead { .. } => 9,
            OpusGapError::Allocation { .. } => 10,
            OpusGapError::Encoder { .. } => 11,
            OpusGapError::SequencerClosed => 12,
        }
    }
}
