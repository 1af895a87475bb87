use std::fmt;

/// A `TAG=value` comment destined for every chapter's `OpusTags` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentArg {
    pub tag: String,
    pub value: String,
}

/// Parse a `TAG=value` pair.
///
/// The tag must be non-empty printable ASCII without `=` (0x20–0x7d, as
/// Vorbis comments require). The value may be empty and may itself contain
/// `=`; only the first one separates tag from value.
pub fn parse_comment(input: &str) -> Result<CommentArg, CommentParseError> {
    let Some((tag, value)) = input.split_once('=') else {
        return Err(CommentParseError::MissingSeparator);
    };
    if tag.is_empty() {
        return Err(CommentParseError::EmptyTag);
    }
    if let Some((index, found)) = tag
        .char_indices()
        .find(|(_, ch)| !matches!(ch, ' '..='<' | '>'..='}'))
    {
        return Err(CommentParseError::InvalidTagChar { index, found });
    }

    Ok(CommentArg {
        tag: tag.to_owned(),
        value: value.to_owned(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentParseError {
    MissingSeparator,
    EmptyTag,
    InvalidTagChar { index: usize, found: char },
}

impl std::error::Error for CommentParseError {}

impl fmt::Display for CommentParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentParseError::MissingSeparator => {
                write!(f, "expected TAG=VALUE")
            }
            CommentParseError::EmptyTag => write!(f, "comment tag cannot be empty"),
            CommentParseError::InvalidTagChar { index, found } => write!(
                f,
                "invalid character '{}' in comment tag at position {}",
                found.escape_default(),
                index + 1
            ),
        }
    }
}
