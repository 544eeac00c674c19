use std::process::ExitCode;

use clap::Parser;
use ssm::{Cli, init_panic_hook, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.effective_log_level()) {
        eprintln!("Warning: {e}");
    }
    init_panic_hook();

    tracing::info!("ssm {} starting", env!("CARGO_PKG_VERSION"));
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
