use std::process::ExitCode;

use clap::Parser;
use statusnet_bridge_tools::logging;
use statusnet_bridge_tools::request_token::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let mut stdout = std::io::stdout().lock();
    match request_token::run(&cli, &mut stdout) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
