//! Configuration check command.

use std::path::Path;

use crate::adapter::inbound::cli::output;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

/// Validate the configuration file without connecting anywhere.
pub fn execute_check_config(path: &Path) -> Result<()> {
    let config = Config::load(path)?;

    output::section("Configuration Check");
    output::field("Config", path.display());
    output::success("Configuration file is valid");

    output::section("Storage");
    output::field("Logs", config.storage.log_dir.display());
    output::field("Limits", config.storage.limiter_state.display());

    if config.exchanges.is_empty() {
        output::warning("No exchanges configured");
    }
    for (name, exchange) in &config.exchanges {
        output::section(name);
        output::field("Address", &exchange.address);
        output::field("Padding", exchange.padding);
        output::field(
            "Ack",
            format!(
                "{} ms x {}",
                exchange.ack_timeout_ms, exchange.max_ack_attempts
            ),
        );
        match &exchange.limit {
            Some(limit) => output::field(
                "Limit",
                format!(
                    "{} per {} ms{}",
                    limit.permits,
                    limit.refresh_ms,
                    if limit.persist { " (persisted)" } else { "" }
                ),
            ),
            None => output::field("Limit", output::muted("none")),
        }
    }

    output::success("Configuration check complete");
    Ok(())
}
