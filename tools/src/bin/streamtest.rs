use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use statusnet_bridge_tools::logging;
use statusnet_bridge_tools::streamtest::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let stdout = Arc::new(Mutex::new(std::io::stdout()));
    match streamtest::run(&cli, stdout) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
