//! Synthetic id inspection.

use crate::adapter::inbound::cli::output;
use crate::domain::Sequencer;
use crate::error::Result;

/// Print the time and counter encoded in `id`.
pub fn execute_decode_id(id: u64, padding: u64) -> Result<()> {
    let sequencer = Sequencer::new("cli", padding)?;
    let (time_ms, counter) = sequencer.decode(id);
    let date_time = sequencer.compute_date_time(id);

    output::section("Execution id");
    output::field("Id", output::highlight(id));
    output::field("Padding", padding);
    output::field("Time (ms)", time_ms);
    output::field("Time (UTC)", date_time.format("%Y-%m-%dT%H:%M:%S%.3fZ"));
    output::field("Counter", counter);
    Ok(())
}
