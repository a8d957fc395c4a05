/*!
# b2check

A small diagnostic client for reproducing intermittent download checksum
mismatches against a B2-style object-storage API.  It is a convenience
wrapper around `reqwest` that authenticates once, then repeatedly downloads a
named file and verifies its SHA-1 three ways: the caller's expectation, the
`X-Bz-Content-Sha1` the server reports, and a local digest of the body.  On
disagreement it prints the full request and response (with credentials
redacted) so the failing exchange can be inspected.

# Usage

Build a [`Client`] from a [`Config`] using the [`ClientBuilder`]; building
performs account authorization and bucket resolution, so a constructed client
always holds a complete session:

```no_run
# use anyhow::Result;
# async fn example() -> Result<()> {
use b2check::{run_attempts, ClientBuilder, Config};

let config = Config::from_file("config.toml")?;
let client = ClientBuilder::new(config).build().await?;
let summary = run_attempts(&client, "path/to/file.bin", "da39a3ee...", 10).await?;
println!("{} of 10 attempts matched", summary.matches);
# Ok(())
# }
```

Authorization failures, including an application key bound to a bucket other
than the configured one, surface as errors from `build()`; per-attempt
download failures are reported as [`AttemptOutcome`] values and never abort
the run.
*/

mod client;
mod config;
mod fetch;
mod harness;
pub mod util;

pub use client::{AttemptOutcome, Client, ClientBuilder, DEFAULT_AUTH_BASE_URL};
pub use config::{Config, DEFAULT_API_VERSION};
pub use fetch::{
    format_request_dump, format_response_dump, Exchange, FetchFailure, FetchResult,
    STATUS_REQUEST_FAILED,
};
pub use harness::{run_attempts, RunSummary, VerifiedDownloader};
