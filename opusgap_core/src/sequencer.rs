use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::convert::{read_samples, ReadSamplesError};
use crate::encoder::{ChapterEncoder, Comments, EncoderFactory};
use crate::header::{read_header, AudioFormat, WavHeader};
use crate::names::{output_name, NameSource};
use crate::OpusGapError;

/// Where a [`ChapterSequencer`] is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    AwaitingFirstFile,
    StreamOpen,
    ValidatingContinuation,
    Draining,
    Done,
    Failed,
}

/// Totals reported after a successful run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub chapters: usize,
    /// Frames (samples per channel) submitted across all chapters.
    pub frames: u64,
    pub outputs: Vec<PathBuf>,
}

/// A chapter validated by [`plan_chapters`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedChapter {
    pub input: PathBuf,
    pub output: PathBuf,
    pub header: WavHeader,
}

/// Feeds WAV files, one chapter each, into a single encoding session.
///
/// The first submitted file creates the session and fixes the stream format;
/// every later file must match it and is appended as a new chapter.
pub struct ChapterSequencer<'a, F: EncoderFactory> {
    factory: &'a mut F,
    comments: Comments,
    format: Option<AudioFormat>,
    session: Option<F::Encoder>,
    state: SequencerState,
    summary: RunSummary,
}

impl<'a, F: EncoderFactory> ChapterSequencer<'a, F> {
    pub fn new(factory: &'a mut F, comments: Comments) -> Self {
        Self {
            factory,
            comments,
            format: None,
            session: None,
            state: SequencerState::AwaitingFirstFile,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.state,
            SequencerState::Done | SequencerState::Failed | SequencerState::Draining
        )
    }

    /// The format fixed by the first chapter, once there is one.
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Validate, convert and encode the WAV file `name` as the next chapter.
    ///
    /// Any error leaves the sequencer in [`SequencerState::Failed`]. Once done
    /// or failed, further chapters are refused with
    /// [`OpusGapError::SequencerClosed`].
    pub fn submit(&mut self, name: &str) -> Result<(), OpusGapError> {
        if self.is_closed() {
            return Err(OpusGapError::SequencerClosed);
        }

        let result = self.submit_chapter(name);
        self.state = match result {
            Ok(()) => SequencerState::StreamOpen,
            Err(_) => SequencerState::Failed,
        };
        result
    }

    fn submit_chapter(&mut self, name: &str) -> Result<(), OpusGapError> {
        let path = Path::new(name);
        let (mut reader, header) = open_chapter(path)?;
        let output = PathBuf::from(output_name(name));

        let session = match &mut self.session {
            Some(session) => {
                self.state = SequencerState::ValidatingContinuation;
                establish_format(&mut self.format, path, header.format)?;
                info!("continuing stream in {}", output.display());
                session
                    .continue_new_file(&output, &self.comments)
                    .map_err(|source| OpusGapError::Encoder {
                        path: output.clone(),
                        source,
                    })?;
                session
            }
            slot @ None => {
                let format = header.format;
                establish_format(&mut self.format, path, format)?;
                info!("starting stream in {} ({format})", output.display());
                let session = self
                    .factory
                    .create(&output, &self.comments, format.sample_rate, format.channels)
                    .map_err(|source| OpusGapError::Encoder {
                        path: output.clone(),
                        source,
                    })?;
                slot.insert(session)
            }
        };

        let samples =
            read_samples(&mut reader, header.sample_len()).map_err(|err| match err {
                ReadSamplesError::Allocation(samples) => OpusGapError::Allocation {
                    path: path.to_path_buf(),
                    samples,
                },
                ReadSamplesError::Io(source) => OpusGapError::ShortRead {
                    path: path.to_path_buf(),
                    source,
                },
            })?;
        drop(reader);

        if let Err(err) = session.set_bit_depth_hint(header.format.bit_depth) {
            warn!("failed to set the input bit depth, continuing anyway: {err}");
        }
        session
            .write_float(&samples, header.sample_count)
            .map_err(|source| OpusGapError::Encoder {
                path: output.clone(),
                source,
            })?;

        self.summary.chapters += 1;
        self.summary.frames += header.sample_count as u64;
        self.summary.outputs.push(output);
        Ok(())
    }

    /// Drain and release the session after the last chapter.
    ///
    /// Fails with [`OpusGapError::InputExhausted`] when no chapter was ever
    /// submitted.
    pub fn finish(&mut self) -> Result<RunSummary, OpusGapError> {
        if self.is_closed() {
            return Err(OpusGapError::SequencerClosed);
        }
        let Some(mut session) = self.session.take() else {
            self.state = SequencerState::Failed;
            return Err(OpusGapError::InputExhausted);
        };

        self.state = SequencerState::Draining;
        let last = self.summary.outputs.last().cloned().unwrap_or_default();
        if let Err(source) = session.drain() {
            self.state = SequencerState::Failed;
            return Err(OpusGapError::Encoder { path: last, source });
        }
        drop(session);

        self.state = SequencerState::Done;
        info!(
            "finished {} chapter(s), {} frames",
            self.summary.chapters, self.summary.frames
        );
        Ok(std::mem::take(&mut self.summary))
    }

    /// Finalize whatever was encoded before a failure and release the session.
    pub fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.drain() {
                warn!("failed to finalize the stream after an error: {err}");
            }
        }
        self.state = SequencerState::Failed;
    }
}

/// Encode every file named in `names` as consecutive chapters of one stream.
pub fn run<R: BufRead, F: EncoderFactory>(
    names: R,
    factory: &mut F,
    comments: Comments,
) -> Result<RunSummary, OpusGapError> {
    let mut names = NameSource::new(names);
    let first = names.next_name()?.ok_or(OpusGapError::InputExhausted)?;

    let mut sequencer = ChapterSequencer::new(factory, comments);
    match submit_all(&mut sequencer, &mut names, first) {
        Ok(()) => sequencer.finish(),
        Err(err) => {
            sequencer.abort();
            Err(err)
        }
    }
}

fn submit_all<R: BufRead, F: EncoderFactory>(
    sequencer: &mut ChapterSequencer<'_, F>,
    names: &mut NameSource<R>,
    first: String,
) -> Result<(), OpusGapError> {
    let mut next = Some(first);
    while let Some(name) = next {
        sequencer.submit(&name)?;
        next = names.next_name()?;
    }
    debug!("name list exhausted after {} line(s)", names.line_number());
    Ok(())
}

/// Validate every file named in `names` without encoding anything.
pub fn plan_chapters<R: BufRead>(names: R) -> Result<Vec<PlannedChapter>, OpusGapError> {
    let mut names = NameSource::new(names);
    let mut format = None;
    let mut plan = Vec::new();

    while let Some(name) = names.next_name()? {
        let path = Path::new(&name);
        let (_, header) = open_chapter(path)?;
        establish_format(&mut format, path, header.format)?;
        plan.push(PlannedChapter {
            input: path.to_path_buf(),
            output: PathBuf::from(output_name(&name)),
            header,
        });
    }

    if plan.is_empty() {
        return Err(OpusGapError::InputExhausted);
    }
    Ok(plan)
}

fn open_chapter(path: &Path) -> Result<(BufReader<File>, WavHeader), OpusGapError> {
    let file = File::open(path).map_err(|source| OpusGapError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader).map_err(|reason| OpusGapError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason,
    })?;
    debug!(
        "{}: {}, {} frames",
        path.display(),
        header.format,
        header.sample_count
    );
    Ok((reader, header))
}

/// Record the first chapter's format, or check a later chapter against it.
fn establish_format(
    slot: &mut Option<AudioFormat>,
    path: &Path,
    found: AudioFormat,
) -> Result<(), OpusGapError> {
    match slot {
        None => {
            *slot = Some(found);
            Ok(())
        }
        Some(expected) if expected.matches_stream(&found) => Ok(()),
        Some(expected) => Err(OpusGapError::FormatMismatch {
            path: path.to_path_buf(),
            expected: *expected,
            found,
        }),
    }
}
