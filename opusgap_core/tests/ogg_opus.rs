#![cfg(feature = "ogg-opus")]

use ogg::reading::PacketReader;
use opusgap_core::{run, Comments, OggOpusFactory};
use std::error::Error;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use symphonia::core::codecs::CODEC_TYPE_OPUS;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tempfile::tempdir;

fn write_sine_wave(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    frames: u32,
) -> Result<(), Box<dyn Error>> {
    let amplitude = i16::MAX as f32 * 0.6;
    let mut data = Vec::with_capacity(frames as usize * channels as usize * 2);
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let sample = (amplitude * (220.0 * std::f32::consts::TAU * t).sin()) as i16;
        for _ in 0..channels {
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }

    let block_align = channels * 2;
    let mut file = File::create(path)?;
    file.write_all(b"RIFF")?;
    file.write_all(&(36 + data.len() as u32).to_le_bytes())?;
    file.write_all(b"WAVEfmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&(sample_rate * u32::from(block_align)).to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&(data.len() as u32).to_le_bytes())?;
    file.write_all(&data)?;
    Ok(())
}

struct ChapterFile {
    channels: u8,
    pre_skip: u64,
    input_rate: u32,
    comments: Vec<String>,
    end_granule: u64,
    audio_packets: usize,
}

fn read_chapter(path: &Path) -> Result<ChapterFile, Box<dyn Error>> {
    let mut reader = PacketReader::new(File::open(path)?);

    let head = reader.read_packet()?.ok_or("missing OpusHead")?;
    assert_eq!(&head.data[..8], b"OpusHead");
    assert!(head.first_in_stream());
    let tags = reader.read_packet()?.ok_or("missing OpusTags")?;
    assert_eq!(&tags.data[..8], b"OpusTags");
    assert_eq!(tags.stream_serial(), head.stream_serial());

    let vendor_len = u32::from_le_bytes(tags.data[8..12].try_into()?) as usize;
    let mut offset = 12 + vendor_len;
    let count = u32::from_le_bytes(tags.data[offset..offset + 4].try_into()?);
    offset += 4;
    let mut comments = Vec::new();
    for _ in 0..count {
        let len = u32::from_le_bytes(tags.data[offset..offset + 4].try_into()?) as usize;
        offset += 4;
        comments.push(String::from_utf8(tags.data[offset..offset + len].to_vec())?);
        offset += len;
    }

    let mut audio_packets = 0;
    let mut end_granule = 0;
    while let Some(packet) = reader.read_packet()? {
        audio_packets += 1;
        if packet.last_in_stream() {
            end_granule = packet.absgp_page();
        }
    }

    Ok(ChapterFile {
        channels: head.data[9],
        pre_skip: u64::from(u16::from_le_bytes([head.data[10], head.data[11]])),
        input_rate: u32::from_le_bytes(head.data[12..16].try_into()?),
        comments,
        end_granule,
        audio_packets,
    })
}

fn name_list(paths: &[PathBuf]) -> Cursor<String> {
    let list: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    Cursor::new(list.join("\n"))
}

fn output_of(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.opus", path.display()))
}

#[test]
fn chapters_play_back_to_back_at_48khz() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let lengths = [48_000u32, 30_000, 12_345];
    let paths: Vec<PathBuf> = (0..lengths.len())
        .map(|n| dir.path().join(format!("part{n}.wav")))
        .collect();
    for (path, frames) in paths.iter().zip(lengths) {
        write_sine_wave(path, 48_000, 2, frames)?;
    }

    let mut comments = Comments::new();
    comments.add("album", "Test Album");
    let mut factory = OggOpusFactory::new().with_bitrate(96_000);
    let summary = run(name_list(&paths), &mut factory, comments)?;
    assert_eq!(summary.chapters, 3);

    for (index, (path, frames)) in paths.iter().zip(lengths).enumerate() {
        let chapter = read_chapter(&output_of(path))?;
        assert_eq!(chapter.channels, 2);
        assert_eq!(chapter.input_rate, 48_000);
        assert_eq!(chapter.comments, ["ALBUM=Test Album"]);
        assert!(chapter.audio_packets > 0);
        assert_eq!(
            chapter.end_granule - chapter.pre_skip,
            u64::from(frames),
            "chapter {index} does not play exactly its own samples"
        );
        if index > 0 {
            assert!((960..1_920).contains(&chapter.pre_skip));
        }
    }
    Ok(())
}

#[test]
fn resampled_chapters_add_up_to_the_whole_input() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let lengths = [44_100u32, 22_050, 1_234];
    let paths: Vec<PathBuf> = (0..lengths.len())
        .map(|n| dir.path().join(format!("{n}.wav")))
        .collect();
    for (path, frames) in paths.iter().zip(lengths) {
        write_sine_wave(path, 44_100, 1, frames)?;
    }

    let mut factory = OggOpusFactory::new();
    run(name_list(&paths), &mut factory, Comments::new())?;

    let mut played = 0;
    for path in &paths {
        let chapter = read_chapter(&output_of(path))?;
        assert_eq!(chapter.channels, 1);
        assert_eq!(chapter.input_rate, 44_100);
        played += chapter.end_granule - chapter.pre_skip;
    }
    let total_input: u64 = lengths.iter().map(|&n| u64::from(n)).sum();
    assert_eq!(played, (total_input * 48_000 + 22_050) / 44_100);
    Ok(())
}

#[test]
fn output_is_recognised_as_ogg_opus() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("single.wav");
    write_sine_wave(&input, 48_000, 1, 9_600)?;

    let mut factory = OggOpusFactory::new();
    run(name_list(&[input.clone()]), &mut factory, Comments::new())?;

    let output = output_of(&input);
    let mut hint = Hint::new();
    hint.with_extension("opus");
    let mss = MediaSourceStream::new(Box::new(File::open(&output)?), Default::default());
    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let track = probed.format.default_track().ok_or("no default track")?;
    assert_eq!(track.codec_params.codec, CODEC_TYPE_OPUS);
    assert_eq!(track.codec_params.channels.map(|c| c.count()), Some(1));
    Ok(())
}
