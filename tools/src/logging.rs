use std::str::FromStr;

use tracing::Level;

/// Install the fmt subscriber. Logs go to stderr so stdout stays clean for
/// the tool's own output.
pub fn init(log_level: &str) -> anyhow::Result<()> {
    let level = Level::from_str(log_level)
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", log_level))?;

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
