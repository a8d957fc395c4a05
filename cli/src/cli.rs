//! Argument parsing and command dispatch for the `b2check` binary.

use anyhow::Result;
use b2check::{run_attempts, ClientBuilder, Config};
use clap::Parser;
use std::path::PathBuf;

/// Repeatedly download a file from a B2 bucket and verify its SHA-1,
/// printing request/response diagnostics on mismatch.
#[derive(Debug, Parser)]
#[command(name = "b2check")]
#[command(about = "Reproduce intermittent B2 download checksum mismatches", long_about = None)]
pub struct Cli {
    /// Path of the file within the bucket.
    pub file_path: String,

    /// Expected SHA-1 of the file contents, as lowercase hex.
    pub sha1: String,

    /// Number of download attempts.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub loops: u32,

    /// Path to the TOML config file holding the key pair and bucket name.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = Config::from_file(&self.config)?;

        // construction authenticates; a key bound to the wrong bucket
        // errors out here, before any download
        let client = ClientBuilder::new(config).build().await?;
        tracing::debug!(
            account_id = client.account_id(),
            bucket_id = client.bucket_id(),
            "session established"
        );

        let summary = run_attempts(&client, &self.file_path, &self.sha1, self.loops).await?;
        tracing::info!(
            matches = summary.matches,
            mismatches = summary.mismatches,
            http_errors = summary.http_errors,
            "run complete"
        );
        Ok(())
    }
}
