//! Ogg Opus encoding with gapless chapter continuation.
//!
//! One Opus encoder runs across the whole batch and is never reset. Each
//! chapter is written to its own Ogg Opus file:
//!
//! - the first chapter uses the encoder lookahead as pre-skip;
//! - a continued chapter starts with the packet preceding its first sample,
//!   re-sent as a priming packet, and a pre-skip that lands exactly on the
//!   chapter boundary;
//! - every chapter's final page carries an end granule that trims playback at
//!   the next boundary.
//!
//! Granule positions count samples on the 48 kHz Opus timeline. Inputs at any
//! other rate are resampled as one continuous stream.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use opus::{Application, Bitrate, Channels};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::encoder::{ChapterEncoder, Comments, EncoderError, EncoderFactory};

/// Rate of the Opus timeline.
pub const OPUS_RATE: u32 = 48_000;

/// Samples per channel in one 20 ms frame.
pub const FRAME_SIZE: u64 = 960;

const MAX_PACKET_LEN: usize = 4_000;
const RESAMPLER_CHUNK: usize = 1_024;
const PACKET_HISTORY: usize = 4;
const SERIAL_BASE: u32 = 0x4f50_4741;

/// Creates [`OggOpusEncoder`] sessions.
#[derive(Clone, Debug, Default)]
pub struct OggOpusFactory {
    bitrate: Option<u32>,
}

impl OggOpusFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target bitrate in bits per second instead of the encoder's automatic choice.
    pub fn with_bitrate(mut self, bits_per_second: u32) -> Self {
        self.bitrate = Some(bits_per_second);
        self
    }
}

impl EncoderFactory for OggOpusFactory {
    type Encoder = OggOpusEncoder;

    fn create(
        &mut self,
        output: &Path,
        comments: &Comments,
        sample_rate: u32,
        channels: u16,
    ) -> Result<OggOpusEncoder, EncoderError> {
        OggOpusEncoder::create(output, comments, sample_rate, channels, self.bitrate)
    }
}

/// A continuously running Opus encoder writing one Ogg file per chapter.
pub struct OggOpusEncoder {
    opus: opus::Encoder,
    channels: usize,
    input_rate: u32,
    resampler: Option<StreamResampler>,
    lookahead: u64,
    /// Interleaved 48 kHz samples not yet making up a whole frame.
    pending: Vec<f32>,
    /// Input-rate frames accepted across all chapters.
    input_frames: u64,
    next_packet: u64,
    history: VecDeque<(u64, Vec<u8>)>,
    streams: VecDeque<ChapterStream>,
    next_serial: u32,
}

impl OggOpusEncoder {
    pub fn create(
        output: &Path,
        comments: &Comments,
        sample_rate: u32,
        channels: u16,
        bitrate: Option<u32>,
    ) -> Result<Self, EncoderError> {
        if sample_rate == 0 {
            return Err(EncoderError::InvalidParameter(
                "sample rate of 0 Hz".to_owned(),
            ));
        }
        let layout = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(EncoderError::InvalidParameter(format!(
                    "{other} channels"
                )))
            }
        };

        let mut opus = opus::Encoder::new(OPUS_RATE, layout, Application::Audio)?;
        if let Some(bits) = bitrate {
            let bits = i32::try_from(bits).map_err(|_| {
                EncoderError::InvalidParameter(format!("bitrate of {bits} bit/s"))
            })?;
            opus.set_bitrate(Bitrate::Bits(bits))?;
        }
        let lookahead = u64::try_from(opus.get_lookahead()?).map_err(|_| {
            EncoderError::InvalidParameter("negative encoder lookahead".to_owned())
        })?;

        let resampler = if sample_rate == OPUS_RATE {
            None
        } else {
            Some(StreamResampler::new(sample_rate, usize::from(channels))?)
        };
        debug!(
            "opus encoder: {channels} channel(s), lookahead {lookahead}, input {sample_rate} Hz{}",
            if resampler.is_some() {
                " (resampled)"
            } else {
                ""
            }
        );

        let mut encoder = Self {
            opus,
            channels: usize::from(channels),
            input_rate: sample_rate,
            resampler,
            lookahead,
            pending: Vec::new(),
            input_frames: 0,
            next_packet: 0,
            history: VecDeque::with_capacity(PACKET_HISTORY),
            streams: VecDeque::new(),
            next_serial: SERIAL_BASE,
        };
        encoder.open_stream(output, comments, lookahead)?;
        Ok(encoder)
    }

    /// Position on the 48 kHz decoded timeline of everything written so far.
    fn boundary(&self) -> u64 {
        self.lookahead + to_opus_frames(self.input_frames, self.input_rate)
    }

    fn open_stream(
        &mut self,
        path: &Path,
        comments: &Comments,
        start: u64,
    ) -> Result<(), EncoderError> {
        let timeline = ChapterTimeline::starting_at(start);
        let pre_skip = u16::try_from(timeline.pre_skip).map_err(|_| {
            EncoderError::InvalidParameter(format!("pre-skip of {}", timeline.pre_skip))
        })?;
        if timeline.base < self.next_packet
            && self.history.front().map_or(true, |(index, _)| *index > timeline.base)
        {
            return Err(EncoderError::InvalidParameter(format!(
                "priming packet {} is no longer available",
                timeline.base
            )));
        }

        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);

        let mut writer = PacketWriter::new(BufWriter::new(File::create(path)?));
        writer.write_packet(
            opus_head(self.channels as u8, pre_skip, self.input_rate),
            serial,
            PacketWriteEndInfo::EndPage,
            0,
        )?;
        writer.write_packet(opus_tags(comments), serial, PacketWriteEndInfo::EndPage, 0)?;
        debug!(
            "{}: serial {serial:#010x}, first packet {}, pre-skip {pre_skip}",
            path.display(),
            timeline.base
        );

        let mut stream = ChapterStream {
            writer,
            path: path.to_path_buf(),
            serial,
            timeline,
            held: None,
            finished: false,
        };
        for (index, packet) in &self.history {
            stream.push(*index, packet.clone())?;
        }
        self.streams.push_back(stream);
        Ok(())
    }

    fn encode_pending(&mut self) -> Result<(), EncoderError> {
        let frame_len = FRAME_SIZE as usize * self.channels;
        let mut offset = 0;
        while self.pending.len() - offset >= frame_len {
            let packet = self
                .opus
                .encode_vec_float(&self.pending[offset..offset + frame_len], MAX_PACKET_LEN)?;
            offset += frame_len;
            self.emit(packet)?;
        }
        self.pending.drain(..offset);
        Ok(())
    }

    fn emit(&mut self, packet: Vec<u8>) -> Result<(), EncoderError> {
        let index = self.next_packet;
        self.next_packet += 1;

        for stream in self.streams.iter_mut() {
            stream.push(index, packet.clone())?;
        }
        self.retire_finished()?;

        if self.history.len() == PACKET_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((index, packet));
        Ok(())
    }

    fn retire_finished(&mut self) -> Result<(), EncoderError> {
        while self.streams.front().is_some_and(|stream| stream.finished) {
            if let Some(stream) = self.streams.pop_front() {
                let path = stream.close()?;
                info!("wrote {}", path.display());
            }
        }
        Ok(())
    }
}

impl ChapterEncoder for OggOpusEncoder {
    /// Forwarded as the encoder's LSB depth; libopus accepts 8 to 24 bits.
    fn set_bit_depth_hint(&mut self, bits: u16) -> Result<(), EncoderError> {
        self.opus.set_lsb_depth(i32::from(bits))?;
        Ok(())
    }

    fn write_float(&mut self, samples: &[f32], frames: usize) -> Result<(), EncoderError> {
        let len = frames * self.channels;
        let Some(samples) = samples.get(..len) else {
            return Err(EncoderError::InvalidParameter(format!(
                "{frames} frames requested from {} samples",
                samples.len()
            )));
        };

        match self.resampler.as_mut() {
            Some(resampler) => resampler.push(samples, &mut self.pending)?,
            None => self.pending.extend_from_slice(samples),
        }
        self.input_frames += frames as u64;
        self.encode_pending()
    }

    fn continue_new_file(
        &mut self,
        output: &Path,
        comments: &Comments,
    ) -> Result<(), EncoderError> {
        let boundary = self.boundary();
        if let Some(stream) = self.streams.back_mut() {
            stream.end_at(boundary)?;
        }
        self.retire_finished()?;
        self.open_stream(output, comments, boundary)
    }

    fn drain(&mut self) -> Result<(), EncoderError> {
        if self.streams.is_empty() {
            return Ok(());
        }

        if let Some(resampler) = self.resampler.as_mut() {
            let target = to_opus_frames(self.input_frames, self.input_rate);
            resampler.flush(target, &mut self.pending)?;
        }

        let boundary = self.boundary();
        if let Some(stream) = self.streams.back_mut() {
            stream.end_at(boundary)?;
        }
        self.retire_finished()?;

        // Pad with silence until every open chapter has its final packet.
        let frame_len = FRAME_SIZE as usize * self.channels;
        while !self.streams.is_empty() {
            let padding = frame_len - self.pending.len() % frame_len;
            self.pending.resize(self.pending.len() + padding, 0.0);
            self.encode_pending()?;
        }
        Ok(())
    }
}

/// Packet layout of one chapter on the global packet sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ChapterTimeline {
    /// Index of the first packet carried by this chapter.
    base: u64,
    pre_skip: u64,
    /// Decoded-timeline position where the chapter stops, once known.
    end: Option<u64>,
}

impl ChapterTimeline {
    fn starting_at(start: u64) -> Self {
        // One packet of priming before the packet holding `start`.
        let base = (start / FRAME_SIZE).saturating_sub(1);
        Self {
            base,
            pre_skip: start - base * FRAME_SIZE,
            end: None,
        }
    }

    fn granule_after(&self, index: u64) -> u64 {
        (index - self.base + 1) * FRAME_SIZE
    }

    fn last_packet(&self) -> Option<u64> {
        self.end
            .map(|end| end.div_ceil(FRAME_SIZE).saturating_sub(1).max(self.base))
    }

    fn end_granule(&self) -> Option<u64> {
        self.end.map(|end| end - self.base * FRAME_SIZE)
    }
}

struct ChapterStream {
    writer: PacketWriter<'static, BufWriter<File>>,
    path: PathBuf,
    serial: u32,
    timeline: ChapterTimeline,
    /// Newest packet, held back until it is known whether it ends the stream.
    held: Option<(u64, Vec<u8>)>,
    finished: bool,
}

impl ChapterStream {
    fn push(&mut self, index: u64, packet: Vec<u8>) -> io::Result<()> {
        if self.finished || index < self.timeline.base {
            return Ok(());
        }
        if let Some((held_index, held)) = self.held.take() {
            let granule = self.timeline.granule_after(held_index);
            self.writer
                .write_packet(held, self.serial, PacketWriteEndInfo::NormalPacket, granule)?;
        }
        self.held = Some((index, packet));
        self.try_finish()
    }

    fn end_at(&mut self, end: u64) -> io::Result<()> {
        self.timeline.end = Some(end);
        self.try_finish()
    }

    fn try_finish(&mut self) -> io::Result<()> {
        let (Some(last), Some(granule)) = (self.timeline.last_packet(), self.timeline.end_granule())
        else {
            return Ok(());
        };
        if !matches!(self.held, Some((index, _)) if index >= last) {
            return Ok(());
        }
        if let Some((_, packet)) = self.held.take() {
            self.writer
                .write_packet(packet, self.serial, PacketWriteEndInfo::EndStream, granule)?;
            self.finished = true;
        }
        Ok(())
    }

    fn close(self) -> io::Result<PathBuf> {
        self.writer.into_inner().flush()?;
        Ok(self.path)
    }
}

/// Continuous resampling to 48 kHz with the resampler delay removed.
struct StreamResampler {
    inner: FastFixedIn<f32>,
    /// Planar input waiting for a full chunk.
    input: Vec<Vec<f32>>,
    /// Output frames still to drop for the resampler delay.
    skip: usize,
    produced: u64,
}

impl StreamResampler {
    fn new(input_rate: u32, channels: usize) -> Result<Self, EncoderError> {
        let inner = FastFixedIn::<f32>::new(
            f64::from(OPUS_RATE) / f64::from(input_rate),
            1.0,
            PolynomialDegree::Septic,
            RESAMPLER_CHUNK,
            channels,
        )?;
        let skip = inner.output_delay();
        Ok(Self {
            inner,
            input: vec![Vec::with_capacity(RESAMPLER_CHUNK); channels],
            skip,
            produced: 0,
        })
    }

    fn push(&mut self, interleaved: &[f32], out: &mut Vec<f32>) -> Result<(), EncoderError> {
        let channels = self.input.len();
        for frame in interleaved.chunks_exact(channels) {
            for (plane, sample) in self.input.iter_mut().zip(frame) {
                plane.push(*sample);
            }
            if self.input[0].len() >= self.inner.input_frames_next() {
                let planar = self.inner.process(&self.input, None)?;
                for plane in &mut self.input {
                    plane.clear();
                }
                self.append(&planar, out, None);
            }
        }
        Ok(())
    }

    /// Push out buffered input and the delayed tail until `target` frames exist.
    fn flush(&mut self, target: u64, out: &mut Vec<f32>) -> Result<(), EncoderError> {
        if !self.input[0].is_empty() {
            let planar = self.inner.process_partial(Some(self.input.as_slice()), None)?;
            for plane in &mut self.input {
                plane.clear();
            }
            self.append(&planar, out, Some(target));
        }
        while self.produced < target {
            let planar = self.inner.process_partial::<Vec<f32>>(None, None)?;
            if planar.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.append(&planar, out, Some(target));
        }
        Ok(())
    }

    fn append(&mut self, planar: &[Vec<f32>], out: &mut Vec<f32>, limit: Option<u64>) {
        let frames = planar.first().map_or(0, Vec::len);
        for frame in 0..frames {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if limit.is_some_and(|limit| self.produced >= limit) {
                break;
            }
            out.extend(planar.iter().map(|plane| plane[frame]));
            self.produced += 1;
        }
    }
}

/// Number of 48 kHz frames spanning `frames` frames at `rate`.
fn to_opus_frames(frames: u64, rate: u32) -> u64 {
    if rate == OPUS_RATE {
        return frames;
    }
    let rate = u128::from(rate);
    ((u128::from(frames) * u128::from(OPUS_RATE) + rate / 2) / rate) as u64
}

/// The `OpusHead` identification header for channel mapping family 0.
fn opus_head(channels: u8, pre_skip: u16, input_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&input_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

/// The `OpusTags` comment header.
fn opus_tags(comments: &Comments) -> Vec<u8> {
    let vendor = comments.vendor().as_bytes();
    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&(comments.entries().len() as u32).to_le_bytes());
    for entry in comments.entries() {
        tags.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        tags.extend_from_slice(entry.as_bytes());
    }
    tags
}
