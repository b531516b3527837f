//! Reference search tool speaking the bgrep command-line and output
//! convention, backed by the brute-force oracle. Pointing the harness at it
//! checks the harness itself.

use anyhow::Context;
use bgrep_fuzz_core::case::{TestCase, decode_hex};
use bgrep_fuzz_core::oracle::{NaiveOracle, ReferenceOracle};
use bgrep_fuzz_core::report::{DEFAULT_OFFSET_WIDTH, render_expected};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Brute-force binary search in bgrep output format", long_about = None)]
struct Cli {
    /// Pattern as hex digits, e.g. `deadbeef`.
    pattern: String,
    file: PathBuf,
    /// Minimum hex digits per printed offset.
    #[clap(long, default_value_t = DEFAULT_OFFSET_WIDTH)]
    offset_width: usize,
}

fn search(pattern_hex: &str, file: &Path, offset_width: usize) -> Result<Vec<u8>, anyhow::Error> {
    let pattern = decode_hex(pattern_hex).context("invalid hex string")?;
    let data = std::fs::read(file).with_context(|| format!("cannot open file {file:?}"))?;
    let case = TestCase::new(data, pattern).context("invalid/empty hex string")?;

    let offsets = NaiveOracle::new().matches(&case);
    Ok(render_expected(
        &offsets,
        file.as_os_str().as_encoded_bytes(),
        offset_width,
    ))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = search(&cli.pattern, &cli.file, cli.offset_width).and_then(|output| {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&output)?;
        stdout.flush()?;
        Ok(())
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("refgrep: {e:#}");
            ExitCode::FAILURE
        }
    }
}
