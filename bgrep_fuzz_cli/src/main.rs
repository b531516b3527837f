use bgrep_fuzz_core::config::{ExitStatusPolicy, HarnessConfig};
use bgrep_fuzz_core::fuzzer::{Fuzzer, HaltReason};

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code used when the tool under test disagreed with the reference.
const MISMATCH_EXIT_CODE: u8 = 2;
/// Exit code used when the operator stopped the run, as shells report SIGINT.
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Differential fuzzer for binary pattern-search tools", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Path to the tool under test (replaces the first word of tool.command).
    #[clap(short, long)]
    tool: Option<String>,
    #[clap(long)]
    max_data_len: Option<usize>,
    #[clap(long)]
    max_pattern_len: Option<usize>,
    /// Seed for case generation; a random one is chosen and logged otherwise.
    #[clap(long)]
    seed: Option<u64>,
    /// Stop after this many iterations instead of running until a mismatch.
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Kill the tool if a single invocation takes longer than this.
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Minimum hex digits per offset in the tool's output (16 for 64-bit builds).
    #[clap(long)]
    offset_width: Option<usize>,
    /// Treat a non-zero exit status from the tool as a mismatch.
    #[clap(long)]
    require_success: bool,
    /// Print the effective configuration as TOML and exit.
    #[clap(long)]
    print_config: bool,
}

fn load_config(config_file: Option<&Path>) -> Result<HarnessConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = Path::new("config.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                HarnessConfig::load_from_file(default_config_path)
            } else {
                debug!("No config file specified and default 'config.toml' not found, using built-in defaults.");
                Ok(HarnessConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut HarnessConfig, cli: &Cli) {
    if let Some(tool) = &cli.tool {
        if config.tool.command.is_empty() {
            config.tool.command.push(tool.clone());
        } else {
            config.tool.command[0] = tool.clone();
        }
    }
    if let Some(max_data_len) = cli.max_data_len {
        config.generator.max_data_len = max_data_len;
    }
    if let Some(max_pattern_len) = cli.max_pattern_len {
        config.generator.max_pattern_len = max_pattern_len;
    }
    if let Some(seed) = cli.seed {
        config.generator.seed = Some(seed);
    }
    if let Some(iterations) = cli.iterations {
        config.fuzzer.max_iterations = Some(iterations);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.tool.timeout_ms = Some(timeout_ms);
    }
    if let Some(offset_width) = cli.offset_width {
        config.tool.offset_width = offset_width;
    }
    if cli.require_success {
        config.tool.exit_status = ExitStatusPolicy::RequireSuccess;
    }
}

fn main() -> Result<ExitCode, anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config_file.as_deref())?;
    apply_overrides(&mut config, &cli);

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    debug!("Effective configuration: {config:#?}");

    let mut fuzzer = Fuzzer::from_config(&config)?;
    info!("Replay this run with --seed {}", fuzzer.seed());

    // First Ctrl-C finishes the current iteration; a second one exits at once.
    let stop = fuzzer.stop_handle();
    ctrlc::set_handler(move || {
        if stop.swap(true, Ordering::Relaxed) {
            std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
        }
        warn!("Stop requested, halting after the current iteration");
    })?;

    match fuzzer.run()? {
        HaltReason::Mismatch(report) => {
            println!("\n!!! MISMATCH FOUND (Iteration {}) !!!", fuzzer.iterations());
            println!("  Pattern: {}", report.pattern_hex);
            println!(
                "  Data: {} bytes, md5 {} ({:?})",
                report.data_len, report.data_md5, report.data_file
            );
            println!("  Tool: {}", report.tool_status);
            println!("  Expected output: {:?}", report.expected_file);
            println!("  Actual output: {:?}", report.actual_file);
            println!("  Seed: {}", fuzzer.seed());
            Ok(ExitCode::from(MISMATCH_EXIT_CODE))
        }
        HaltReason::Interrupted => {
            println!(
                "Interrupted after {} iterations without a mismatch.",
                fuzzer.iterations()
            );
            Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
        }
        HaltReason::IterationLimit => {
            println!(
                "Fuzz loop finished after {} iterations without a mismatch.",
                fuzzer.iterations()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "bgrep_fuzz_cli",
            "--tool",
            "./bgrep",
            "--max-data-len",
            "10",
            "--max-pattern-len",
            "3",
            "--seed",
            "8",
            "-i",
            "20",
            "--timeout-ms",
            "500",
            "--offset-width",
            "16",
            "--require-success",
        ]);
        let mut config = HarnessConfig::default();
        config.tool.command = vec!["../bgrep".to_string(), "-f".to_string()];
        apply_overrides(&mut config, &cli);

        assert_eq!(config.tool.command, vec!["./bgrep".to_string(), "-f".to_string()]);
        assert_eq!(config.generator.max_data_len, 10);
        assert_eq!(config.generator.max_pattern_len, 3);
        assert_eq!(config.generator.seed, Some(8));
        assert_eq!(config.fuzzer.max_iterations, Some(20));
        assert_eq!(config.tool.timeout_ms, Some(500));
        assert_eq!(config.tool.offset_width, 16);
        assert_eq!(config.tool.exit_status, ExitStatusPolicy::RequireSuccess);
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let cli = Cli::parse_from(["bgrep_fuzz_cli"]);
        let mut config = HarnessConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.tool.command, vec!["../bgrep".to_string()]);
        assert_eq!(config.fuzzer.max_iterations, None);
        assert_eq!(config.tool.offset_width, 8);
        assert_eq!(config.tool.exit_status, ExitStatusPolicy::Ignore);
    }
}
