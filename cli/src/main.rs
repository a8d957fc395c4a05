mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout carries only the diagnostic output itself.
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("b2check=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    if let Err(err) = cli::Cli::parse().run().await {
        eprintln!("b2check error: {:#}", err);
        std::process::exit(1);
    }
}
