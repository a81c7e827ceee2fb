//! learnbot - a question answering bot that learns
//!
//! Answers from a confidence-scored knowledge base, looks up what it does
//! not know, and adjusts its beliefs from user feedback.

use clap::Parser;
use learnbot::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // WARN by default, INFO with --verbose; RUST_LOG adds directives on top
    let level = if cli.verbose { tracing::Level::INFO } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(level.into())
        )
        .init();

    cli::run(cli).await
}
