mod comment;

use std::path::PathBuf;

use clap::{builder::ValueParser, value_parser, Arg, ArgAction, Command};

pub use comment::{parse_comment, CommentArg};

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Encode a list of WAV files into gapless chained Ogg Opus chapters")
        .long_about(
            "Reads WAV file names, one per line, and encodes them as consecutive \
             chapters of one continuous Opus stream. Each chapter is written next to \
             its input with '.opus' appended. All files must share the first file's \
             sample rate and channel count.",
        )
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("LIST_FILE")
                .help("Read file names from LIST_FILE instead of standard input")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_name("BITS_PER_SECOND")
                .help("Target bitrate (default: chosen by the encoder)")
                .value_parser(value_parser!(u32).range(500..=512_000)),
        )
        .arg(
            Arg::new("comment")
                .short('c')
                .long("comment")
                .value_name("TAG=VALUE")
                .help("Comment added to every chapter; may be repeated")
                .action(ArgAction::Append)
                .value_parser(ValueParser::new(parse_comment)),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Validate the listed files and print the chapters without encoding")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn collects_repeated_comments() {
        let matches = build_cli()
            .try_get_matches_from(["opusgap", "-c", "ARTIST=A", "--comment", "ALBUM=B"])
            .unwrap();
        let comments: Vec<&CommentArg> = matches.get_many("comment").unwrap().collect();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].tag, "ALBUM");
    }

    #[test]
    fn rejects_out_of_range_bitrate() {
        assert!(build_cli()
            .try_get_matches_from(["opusgap", "--bitrate", "100"])
            .is_err());
        let matches = build_cli()
            .try_get_matches_from(["opusgap", "--bitrate", "128000"])
            .unwrap();
        assert_eq!(matches.get_one::<u32>("bitrate"), Some(&128_000));
    }

    #[test]
    fn rejects_malformed_comments() {
        assert!(build_cli()
            .try_get_matches_from(["opusgap", "--comment", "novalue"])
            .is_err());
    }
}
