//! Conversion of 16-bit PCM sample data into normalized floats.

use std::io::{self, Read};

use thiserror::Error;

/// Divisor mapping the i16 range onto [-1.0, 1.0).
const I16_SCALE: f32 = 32_768.0;

/// Failure to load a chapter's samples.
#[derive(Debug, Error)]
pub enum ReadSamplesError {
    /// The buffer for this many samples could not be reserved.
    #[error("not enough memory for {0} samples")]
    Allocation(usize),

    /// The reader failed or ended early.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Append one float per little-endian i16 in `bytes` to `out`.
///
/// Interleaving is passed through untouched. A trailing odd byte is ignored.
pub fn convert_samples(bytes: &[u8], out: &mut Vec<f32>) {
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / I16_SCALE),
    );
}

/// Read `sample_len` interleaved 16-bit samples from `reader` and convert them.
///
/// Buffers are reserved fallibly so an oversized data chunk reports
/// [`ReadSamplesError::Allocation`] instead of aborting the process.
pub fn read_samples<R: Read>(
    reader: &mut R,
    sample_len: usize,
) -> Result<Vec<f32>, ReadSamplesError> {
    let byte_len = sample_len
        .checked_mul(2)
        .ok_or(ReadSamplesError::Allocation(sample_len))?;

    let mut raw = Vec::new();
    raw.try_reserve_exact(byte_len)
        .map_err(|_| ReadSamplesError::Allocation(sample_len))?;
    raw.resize(byte_len, 0u8);
    reader.read_exact(&mut raw)?;

    let mut samples = Vec::new();
    samples
        .try_reserve_exact(sample_len)
        .map_err(|_| ReadSamplesError::Allocation(sample_len))?;
    convert_samples(&raw, &mut samples);
    Ok(samples)
}
