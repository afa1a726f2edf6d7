mod api;
mod cli;
mod error;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod sync;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    if !args.wants_tui() {
        if let Err(e) = logging::init_tracing(args.verbose) {
            eprintln!("{e:#}");
        }
    }

    if let Err(e) = cli::run(args).await {
        // One line, context chain included.
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
