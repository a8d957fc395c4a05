//! A single-request HTTP fetch helper that never propagates transport errors
//! to the caller; failures are folded into [`FetchResult`] instead.

use crate::util::http_date_now;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{StatusCode, Version};
use thiserror::Error;

/// Locally-defined marker meaning "the request itself could not be
/// completed".  This is not an HTTP status code and never collides with one;
/// servers cannot return values above 599.
pub const STATUS_REQUEST_FAILED: u16 = 900;

/// Everything observed about one request/response pair.  The same struct
/// serves callers that only need `body` and `status` and callers that need
/// full introspection for diagnostic dumps.
#[derive(Debug)]
pub struct Exchange {
    /// Request method (always `GET` for this client)
    pub method: String,

    /// Final request URL, including any query string
    pub url: String,

    /// Headers sent with the request
    pub request_headers: HeaderMap,

    /// Time the request was sent, in `%a, %d %b %Y %H:%M:%S GMT` form
    pub timestamp: String,

    /// Response status
    pub status: StatusCode,

    /// HTTP version of the response
    pub version: Version,

    /// Response headers
    pub response_headers: HeaderMap,

    /// Full response body
    pub body: Vec<u8>,
}

/// A transport-level failure, categorized.  These are the cases the original
/// tooling reported with status 900.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("connection failed")]
    Connect(#[source] reqwest::Error),

    #[error("error while reading response body")]
    Body(#[source] reqwest::Error),

    #[error("request could not be completed")]
    Request(#[source] reqwest::Error),
}

/// The outcome of a fetch.  Any HTTP response, success or not, is
/// `Completed`; `Failed` means no response was obtained at all.
#[derive(Debug)]
pub enum FetchResult {
    Completed(Exchange),
    Failed(FetchFailure),
}

impl FetchResult {
    /// The response status, or [`STATUS_REQUEST_FAILED`] when the request
    /// could not be completed.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchResult::Completed(exchange) => exchange.status.as_u16(),
            FetchResult::Failed(_) => STATUS_REQUEST_FAILED,
        }
    }
}

fn classify(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout(err)
    } else if err.is_connect() {
        FetchFailure::Connect(err)
    } else if err.is_body() || err.is_decode() {
        FetchFailure::Body(err)
    } else {
        FetchFailure::Request(err)
    }
}

/// Perform a single GET request.  Transport errors are logged and returned as
/// [`FetchResult::Failed`]; this function never panics and has no `Err` path.
pub(crate) async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    query: Option<Vec<(&str, &str)>>,
    headers: HeaderMap,
) -> FetchResult {
    let mut builder = client.get(url).headers(headers);
    if let Some(q) = query {
        builder = builder.query(&q);
    }

    let req = match builder.build() {
        Ok(req) => req,
        Err(err) => {
            tracing::warn!(url, error = %err, "could not build HTTP GET request");
            return FetchResult::Failed(classify(err));
        }
    };

    // capture the request side before execute() consumes it
    let method = req.method().to_string();
    let final_url = req.url().to_string();
    let request_headers = req.headers().clone();
    let timestamp = http_date_now();

    let res = match client.execute(req).await {
        Ok(res) => res,
        Err(err) => {
            tracing::warn!(url = %final_url, error = %err, "HTTP GET request failed");
            return FetchResult::Failed(classify(err));
        }
    };

    let status = res.status();
    let version = res.version();
    let response_headers = res.headers().clone();

    let body = match res.bytes().await {
        Ok(body) => body.to_vec(),
        Err(err) => {
            tracing::warn!(url = %final_url, error = %err, "failed reading response body");
            return FetchResult::Failed(FetchFailure::Body(err));
        }
    };

    FetchResult::Completed(Exchange {
        method,
        url: final_url,
        request_headers,
        timestamp,
        status,
        version,
        response_headers,
        body,
    })
}

fn push_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        let value = if name == &AUTHORIZATION {
            // never echo credentials into the diagnostic output
            "[omitted]"
        } else {
            value.to_str().unwrap_or("<non-printable>")
        };
        out.push_str(&format!("{}: {}\n", name, value));
    }
}

/// Pretty-print the request side of an exchange.  The `Authorization` value
/// is always replaced with the literal `[omitted]`.
pub fn format_request_dump(exchange: &Exchange, attempt: u32) -> String {
    let mut out = format!("[Attempt: {}] REQUEST  **********\n", attempt);
    out.push_str(&format!("{} {}\n", exchange.method, exchange.url));
    push_headers(&mut out, &exchange.request_headers);
    out
}

/// Pretty-print the response side of an exchange, status line first.
pub fn format_response_dump(exchange: &Exchange, attempt: u32) -> String {
    let mut out = format!("[Attempt: {}] RESPONSE  **********\n", attempt);
    out.push_str(&format!(
        "{:?} {}\n",
        exchange.version,
        exchange.status.as_u16()
    ));
    push_headers(&mut out, &exchange.response_headers);
    out
}
