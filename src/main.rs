use anyhow::Context;
use clap::Parser;
use tradeline::adapter::inbound::cli::{self, command::Cli};
use tradeline::infrastructure::config::logging::LoggingConfig;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    // Both reqwest and tokio-tungstenite pull in rustls; pin the provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    LoggingConfig {
        level: level.into(),
        format: "pretty".into(),
    }
    .init();

    cli::execute(cli).context("tradeline failed")?;
    Ok(())
}
