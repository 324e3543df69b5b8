//! CLI module graph.

pub mod check;
pub mod command;
pub mod id;
pub mod log;
pub mod output;
pub mod paths;

use command::{Cli, Commands};
use output::OutputConfig;

use crate::error::Result;

/// Run the parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    output::configure(OutputConfig::new(cli.json, cli.quiet));

    match cli.command {
        Commands::Compact(args) => log::execute_compact(&args.source, &args.destination),
        Commands::Expand(args) => log::execute_expand(&args.source, &args.destination),
        Commands::Cat(args) => log::execute_cat(&args.path, args.limit),
        Commands::DecodeId(args) => id::execute_decode_id(args.id, args.padding),
        Commands::CheckConfig(args) => check::execute_check_config(&args.config),
    }
}
