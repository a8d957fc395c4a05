//! The attempt loop: run download-and-verify a fixed number of times,
//! printing timestamped banners and tallying outcomes.

use crate::client::{AttemptOutcome, Client};
use crate::util::http_date_now;
use anyhow::Result;
use async_trait::async_trait;

/// A wrapper around the one client operation the loop needs, so the loop can
/// be exercised against a fake in tests.
#[async_trait]
pub trait VerifiedDownloader {
    async fn download_and_verify(
        &self,
        file_path: &str,
        expected_sha1: &str,
        attempt: u32,
    ) -> Result<AttemptOutcome>;
}

/// Trivial implementation of the VerifiedDownloader trait for Client.
#[async_trait]
impl VerifiedDownloader for Client {
    async fn download_and_verify(
        &self,
        file_path: &str,
        expected_sha1: &str,
        attempt: u32,
    ) -> Result<AttemptOutcome> {
        (self as &Client)
            .download_and_verify(file_path, expected_sha1, attempt)
            .await
    }
}

/// Outcome tally for a completed run.  `http_errors` includes attempts whose
/// request could not be completed at all (sentinel status 900).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub matches: u32,
    pub mismatches: u32,
    pub http_errors: u32,
}

/// Run the download-and-verify operation `loops` times with attempt numbers
/// `0..loops`, strictly in order.  Per-attempt failures never abort the run;
/// only errors outside the per-request path (e.g. a malformed auth token
/// header) propagate.
pub async fn run_attempts<D: VerifiedDownloader>(
    downloader: &D,
    file_path: &str,
    expected_sha1: &str,
    loops: u32,
) -> Result<RunSummary> {
    println!("[{}]: Starting downloads, {} times", http_date_now(), loops);

    let mut summary = RunSummary::default();
    for attempt in 0..loops {
        match downloader
            .download_and_verify(file_path, expected_sha1, attempt)
            .await?
        {
            AttemptOutcome::Match => summary.matches += 1,
            AttemptOutcome::Mismatch { .. } => summary.mismatches += 1,
            AttemptOutcome::HttpStatus(status) => {
                tracing::debug!(attempt, status, "attempt did not produce a verifiable body");
                summary.http_errors += 1;
            }
        }
    }

    println!("[{}]: End", http_date_now());
    Ok(summary)
}
