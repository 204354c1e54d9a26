//! Binary entry point for the tree store CLI.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use treestore::cli::{self, Cli};

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("treestore=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("treestore=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    cli::run(cli)
}
