mod cli;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use log::debug;
use opusgap_core::{plan_chapters, run, Comments, OggOpusFactory, OpusGapError};

use crate::cli::{build_cli, CommentArg};

fn main() -> ExitCode {
    env_logger::init();

    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<OpusGapError>())
                .map_or(1, OpusGapError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn try_main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    let names: Box<dyn BufRead> = match matches.get_one::<PathBuf>("input") {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open name list '{}'", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    if matches.get_flag("dry-run") {
        let plan = plan_chapters(names)?;
        println!("Dry run: would encode {} chapter(s):", plan.len());
        for chapter in &plan {
            println!(
                "  {} -> {}",
                chapter.input.display(),
                chapter.output.display()
            );
        }
        return Ok(());
    }

    let mut comments = Comments::new();
    if let Some(args) = matches.get_many::<CommentArg>("comment") {
        for CommentArg { tag, value } in args {
            comments.add(tag, value);
        }
    }

    let mut factory = OggOpusFactory::new();
    if let Some(&bitrate) = matches.get_one::<u32>("bitrate") {
        factory = factory.with_bitrate(bitrate);
    }

    let summary = run(names, &mut factory, comments)?;
    debug!("wrote {} output file(s)", summary.outputs.len());

    Ok(())
}
