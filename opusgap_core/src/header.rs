//! Validation of the canonical 44-byte PCM WAV header.
//!
//! Only the simplest layout is understood: a `RIFF` chunk holding `WAVE`, a
//! 16-byte `fmt ` chunk describing 16-bit mono or stereo PCM, and the `data`
//! chunk immediately after it. Anything else is rejected rather than parsed.

use std::fmt;
use std::io::{self, Read};

use thiserror::Error;

/// Size of the canonical RIFF/WAVE header in bytes.
pub const HEADER_LEN: usize = 0x2c;

/// The only sample depth accepted by the validator.
pub const SUPPORTED_BIT_DEPTH: u16 = 16;

const RIFF_TAG: &[u8] = b"RIFF";
const WAVE_FMT_TAG: &[u8] = b"WAVEfmt ";
const DATA_TAG: &[u8] = b"data";
const PCM_FMT_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// Stream parameters shared by every chapter of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl AudioFormat {
    /// Whether a chapter in `other` can continue a stream opened in `self`.
    ///
    /// Bit depth is deliberately left out of the comparison.
    pub fn matches_stream(&self, other: &AudioFormat) -> bool {
        self.channels == other.channels && self.sample_rate == other.sample_rate
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} channel(s), {}-bit",
            self.sample_rate, self.channels, self.bit_depth
        )
    }
}

/// Parameters extracted from a header that passed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavHeader {
    pub format: AudioFormat,
    /// Samples per channel.
    pub sample_count: usize,
}

impl WavHeader {
    /// Number of interleaved samples in the data chunk.
    pub fn sample_len(&self) -> usize {
        self.sample_count * usize::from(self.format.channels)
    }

    /// Number of data bytes that must follow the header.
    pub fn data_len(&self) -> usize {
        self.sample_len() * usize::from(self.format.bit_depth / 8)
    }
}

/// Reason a header was rejected.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("file is shorter than the {}-byte WAV header", HEADER_LEN)]
    Truncated,

    #[error("failed to read the WAV header")]
    Io(#[source] io::Error),

    #[error("missing RIFF tag")]
    NotRiff,

    #[error("missing WAVE format chunk")]
    NotWave,

    #[error("format chunk is {0} bytes long; only the 16-byte PCM form is supported")]
    ExtendedFormat(u32),

    #[error("format tag {0} is not uncompressed PCM")]
    NotPcm(u16),

    #[error("{0} channels; only mono and stereo are supported")]
    UnsupportedChannels(u16),

    #[error("{0}-bit samples; only 16-bit is supported")]
    UnsupportedBitDepth(u16),

    #[error("data chunk does not directly follow the format chunk")]
    MissingDataChunk,
}

/// Read exactly [`HEADER_LEN`] bytes from `reader` and validate them.
///
/// On success the reader is positioned at the first sample byte.
pub fn read_header<R: Read>(reader: &mut R) -> Result<WavHeader, HeaderError> {
    let mut bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut bytes).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => HeaderError::Truncated,
        _ => HeaderError::Io(err),
    })?;
    parse_header(&bytes)
}

/// Validate a header already held in memory.
///
/// Checks run in a fixed order and stop at the first failure.
pub fn parse_header(bytes: &[u8; HEADER_LEN]) -> Result<WavHeader, HeaderError> {
    if bytes[0x00..0x04] != *RIFF_TAG {
        return Err(HeaderError::NotRiff);
    }
    if bytes[0x08..0x10] != *WAVE_FMT_TAG {
        return Err(HeaderError::NotWave);
    }

    let fmt_len = u32_at(bytes, 0x10);
    if fmt_len != PCM_FMT_LEN {
        return Err(HeaderError::ExtendedFormat(fmt_len));
    }

    let format_tag = u16_at(bytes, 0x14);
    if format_tag != FORMAT_PCM {
        return Err(HeaderError::NotPcm(format_tag));
    }

    let channels = u16_at(bytes, 0x16);
    if !(1..=2).contains(&channels) {
        return Err(HeaderError::UnsupportedChannels(channels));
    }

    let bit_depth = u16_at(bytes, 0x22);
    if bit_depth != SUPPORTED_BIT_DEPTH {
        return Err(HeaderError::UnsupportedBitDepth(bit_depth));
    }

    if bytes[0x24..0x28] != *DATA_TAG {
        return Err(HeaderError::MissingDataChunk);
    }

    // Any rate is taken as-is; plausibility is left to the encoder.
    let sample_rate = u32_at(bytes, 0x18);
    let data_len = u32_at(bytes, 0x28) as usize;
    let sample_count = data_len / usize::from(channels) / usize::from(bit_depth / 8);

    Ok(WavHeader {
        format: AudioFormat {
            channels,
            sample_rate,
            bit_depth,
        },
        sample_count,
    })
}

fn u16_at(bytes: &[u8; HEADER_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
