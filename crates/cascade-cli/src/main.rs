//! Cascade CLI entry point.
//!
//! Binary name: `cascade`
//!
//! Parses CLI arguments, initializes tracing, then dispatches to the
//! `run` or `validate` command handler. Exit code 0 on success, non-zero
//! on any unrecovered failure.

mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    if cli.otel {
        cascade_observe::tracing_setup::init_tracing(true)
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "info,cascade=debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .init();
    }

    let result = match cli.command {
        Commands::Run {
            ref workflow,
            ref input,
            ref input_file,
            ref provider,
            ref model,
            ref base_url,
        } => {
            cli::run(
                workflow,
                input.as_deref(),
                input_file.as_deref(),
                provider,
                model.as_deref(),
                base_url.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Validate { ref workflow } => cli::validate(workflow, cli.json),
    };

    if cli.otel {
        cascade_observe::tracing_setup::shutdown_tracing();
    }

    result
}
