use anyhow::Result;
use clap::Parser;
use confstore_cli::{resolve_config, run, Args};
use confstore_core::{init_logging_with_config, metrics};
use tracing::debug;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    init_logging_with_config(config.logging.to_log_config()?)?;
    metrics::init_metrics();
    debug!(path = %config.store.path.display(), "confstore CLI started");

    let stdout = std::io::stdout();
    run(&args, &config, &mut stdout.lock())
}
