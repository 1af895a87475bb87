//! The newline-delimited list of input file names.

use std::io::BufRead;

use crate::OpusGapError;

/// Size of a file-name buffer, including the output suffix and a terminator.
pub const MAX_NAME_LEN: usize = 0x100;

/// Suffix appended to an input name to form its chapter's output name.
pub const OUTPUT_SUFFIX: &str = ".opus";

/// Longest accepted input name in bytes.
pub const MAX_INPUT_NAME_LEN: usize = MAX_NAME_LEN - OUTPUT_SUFFIX.len() - 1;

/// Output name for the chapter encoded from `input`.
pub fn output_name(input: &str) -> String {
    format!("{input}{OUTPUT_SUFFIX}")
}

/// Yields trimmed file names, one per line, until end of input.
pub struct NameSource<R> {
    reader: R,
    line: String,
    line_number: usize,
}

impl<R: BufRead> NameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }

    /// Number of lines consumed so far.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Read the next name, or `Ok(None)` once the input is exhausted.
    pub fn next_name(&mut self) -> Result<Option<String>, OpusGapError> {
        self.line.clear();
        let line = self.line_number + 1;
        let read = self
            .reader
            .read_line(&mut self.line)
            .map_err(|source| OpusGapError::UnreadableName { line, source })?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number = line;

        let name = self.line.trim();
        if name.len() > MAX_INPUT_NAME_LEN {
            return Err(OpusGapError::NameTooLong {
                line,
                name: name.to_owned(),
            });
        }
        Ok(Some(name.to_owned()))
    }
}
