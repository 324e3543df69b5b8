//! Command-line interface definitions.
//!
//! Defines the CLI structure for the tradeline binary using `clap`. The
//! subcommands operate on execution log files, synthetic ids and the
//! configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::paths;
use crate::domain::DEFAULT_PADDING;

/// Exchange connectivity toolkit: execution logs, synthetic ids, config checks
#[derive(Parser, Debug)]
#[command(name = "tradeline")]
#[command(version)]
pub struct Cli {
    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a full `.log` file into a compacted `.clog` file
    Compact(ConvertArgs),

    /// Convert a compacted `.clog` file into a full `.log` file
    Expand(ConvertArgs),

    /// Print the records of a `.log` or `.clog` file
    Cat(CatArgs),

    /// Split a synthetic execution id into time and counter
    DecodeId(DecodeIdArgs),

    /// Validate a configuration file
    CheckConfig(ConfigPathArg),
}

/// Arguments for `compact` and `expand`.
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// File to read.
    pub source: PathBuf,

    /// File to write; its extension must match the target format.
    pub destination: PathBuf,
}

/// Arguments for `cat`.
#[derive(Parser, Debug)]
pub struct CatArgs {
    /// Log file to print.
    pub path: PathBuf,

    /// Print at most this many records.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

/// Arguments for `decode-id`.
#[derive(Parser, Debug)]
pub struct DecodeIdArgs {
    /// Synthetic execution id.
    pub id: u64,

    /// Padding the id was encoded with.
    #[arg(long, default_value_t = DEFAULT_PADDING)]
    pub padding: u64,
}

/// Shared argument struct for commands that require only a configuration path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to the configuration file.
    #[arg(short, long, default_value_os_t = paths::default_config())]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decode_id_with_padding() {
        let cli = Cli::try_parse_from(["tradeline", "decode-id", "170000000000012345", "--padding", "1000"])
            .unwrap();
        match cli.command {
            Commands::DecodeId(args) => {
                assert_eq!(args.id, 170_000_000_000_012_345);
                assert_eq!(args.padding, 1_000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["tradeline", "cat", "a.clog", "--json", "-n", "3"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Cat(CatArgs { limit: Some(3), .. })));
    }

    #[test]
    fn convert_requires_both_paths() {
        assert!(Cli::try_parse_from(["tradeline", "compact", "a.log"]).is_err());
    }
}
