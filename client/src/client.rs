use crate::fetch::{
    fetch_url, format_request_dump, format_response_dump, Exchange, FetchResult,
    STATUS_REQUEST_FAILED,
};
use crate::util::sha1_hex;
use crate::Config;
use anyhow::{anyhow, bail, Context, Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RANGE};
use serde::Deserialize;
use std::time::Duration;

/// Public API endpoint used for account authorization.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://api.backblaze.com";

const AUTHORIZE_ACCOUNT: &str = "b2_authorize_account";
const LIST_BUCKETS: &str = "b2_list_buckets";

/// Response header carrying the SHA-1 the server computed for the content.
const CONTENT_SHA1_HEADER: &str = "X-Bz-Content-Sha1";

/// Byte range requested on even-numbered attempts: the first ~10MB of the
/// file, to see whether partial-range requests correlate with the mismatch.
const RANGE_PROBE: &str = "bytes=0-9999999";

/// ClientBuilder implements the builder pattern for building a Client,
/// allowing optional configuration of the authorization endpoint (used by
/// tests to point at a local server) and the per-request timeout.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: Config,
    auth_base_url: String,
    timeout: Duration,
}

impl ClientBuilder {
    /// Create a new ClientBuilder from a loaded [`Config`].
    pub fn new(config: Config) -> Self {
        Self {
            config,
            auth_base_url: DEFAULT_AUTH_BASE_URL.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the base URL used for `b2_authorize_account`.
    pub fn auth_base_url<S: Into<String>>(mut self, auth_base_url: S) -> Self {
        self.auth_base_url = auth_base_url.into();
        self
    }

    /// Set the timeout for each HTTP request made by the client.  The default
    /// is 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client, consuming the builder.  This performs account
    /// authorization and bucket resolution, so a returned `Client` always
    /// holds a complete session.
    pub async fn build(self) -> Result<Client> {
        Client::new(self).await
    }
}

impl From<Config> for ClientBuilder {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

/// Typed response body for `b2_authorize_account`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    api_url: String,
    authorization_token: String,
    download_url: String,
    account_id: String,
    #[serde(default)]
    allowed: AllowedRestrictions,
}

/// The `allowed` object of the authorization response.  When the application
/// key is bound to a single bucket, both fields are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedRestrictions {
    #[serde(default)]
    bucket_id: Option<String>,
    #[serde(default)]
    bucket_name: Option<String>,
}

/// Typed response body for `b2_list_buckets`.
#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

/// The result of one download-and-verify attempt.  Per-attempt failures are
/// data, not errors; the attempt loop always runs to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Expected, server-reported and locally-computed SHA-1 all agree.
    Match,

    /// At least one pairwise disagreement between the three checksums.
    Mismatch {
        expected: String,
        reported: String,
        computed: String,
    },

    /// No body to verify: a non-success HTTP status, or
    /// [`STATUS_REQUEST_FAILED`] when the request could not be completed.
    HttpStatus(u16),
}

/// Client holds one authenticated session against the B2 API.  All session
/// fields are populated during [`ClientBuilder::build`] and immutable for the
/// life of the process; tokens are not persisted or refreshed.
#[derive(Debug)]
pub struct Client {
    /// Base URL for API calls, as returned by authorization
    api_url: String,

    /// Bearer token for subsequent requests
    auth_token: String,

    /// Base URL for file downloads, as returned by authorization
    download_url: String,

    /// Account the key belongs to
    account_id: String,

    /// Resolved ID of the configured bucket
    bucket_id: String,

    /// Bucket name from the config
    bucket_name: String,

    /// API version path fragment from the config
    api_version: String,

    /// Reqwest client, reused across requests
    http: reqwest::Client,
}

impl Client {
    /// Create a new client (public interface is via
    /// [`ClientBuilder::build`](crate::ClientBuilder::build)).
    async fn new(b: ClientBuilder) -> Result<Client> {
        let http = reqwest::Client::builder().timeout(b.timeout).build()?;
        let config = b.config;

        let basic = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", config.key_id, config.app_key))
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&basic).context("while building the basic auth header")?,
        );

        let url = format!("{}{}{}", b.auth_base_url, config.api_version, AUTHORIZE_ACCOUNT);
        let exchange = match fetch_url(&http, &url, None, headers).await {
            FetchResult::Completed(exchange) => exchange,
            FetchResult::Failed(err) => {
                return Err(Error::new(err).context("while authorizing account"))
            }
        };
        if !exchange.status.is_success() {
            bail!(
                "account authorization returned status {}",
                exchange.status.as_u16()
            );
        }

        let auth: AuthorizeAccountResponse = serde_json::from_slice(&exchange.body)
            .context("while parsing the b2_authorize_account response")?;
        tracing::debug!(account_id = %auth.account_id, "account authorized");

        let mut client = Client {
            api_url: auth.api_url,
            auth_token: auth.authorization_token,
            download_url: auth.download_url,
            account_id: auth.account_id,
            bucket_id: String::new(),
            bucket_name: config.bucket_name,
            api_version: config.api_version,
            http,
        };

        // if the application key is bound to a single bucket, the bucket ID
        // comes back with the authorization; it must match the config.
        client.bucket_id = match auth.allowed.bucket_id.as_deref() {
            Some(id) if !id.is_empty() => {
                if auth.allowed.bucket_name.as_deref() == Some(client.bucket_name.as_str()) {
                    id.to_owned()
                } else {
                    bail!(
                        "the application key is restricted to bucket {}, but the config names {}",
                        auth.allowed.bucket_name.as_deref().unwrap_or("(unnamed)"),
                        client.bucket_name
                    );
                }
            }
            _ => client.bucket_id_from_name().await?,
        };

        Ok(client)
    }

    /// Resolve the configured bucket name to a bucket ID via
    /// `b2_list_buckets`.  An unknown name is an explicit error.
    async fn bucket_id_from_name(&self) -> Result<String> {
        let url = format!("{}{}{}", self.api_url, self.api_version, LIST_BUCKETS);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&self.auth_token)
                .context("while building the authorization header")?,
        );

        let query = Some(vec![("accountId", self.account_id.as_str())]);
        let exchange = match fetch_url(&self.http, &url, query, headers).await {
            FetchResult::Completed(exchange) => exchange,
            FetchResult::Failed(err) => {
                return Err(Error::new(err).context("while listing buckets"))
            }
        };
        if !exchange.status.is_success() {
            bail!(
                "bucket listing returned status {}",
                exchange.status.as_u16()
            );
        }

        let listing: ListBucketsResponse = serde_json::from_slice(&exchange.body)
            .context("while parsing the b2_list_buckets response")?;

        listing
            .buckets
            .into_iter()
            .find(|bucket| bucket.bucket_name == self.bucket_name)
            .map(|bucket| bucket.bucket_id)
            .ok_or_else(|| {
                anyhow!(
                    "no bucket named {} in account {}",
                    self.bucket_name,
                    self.account_id
                )
            })
    }

    /// Download `{download_url}/file/{bucket_name}/{file_path}` once and
    /// verify its SHA-1 three ways: the caller's expectation, the server's
    /// `X-Bz-Content-Sha1` header, and a local digest of the body.  Prints
    /// a per-attempt result line, and full (redacted) request/response dumps
    /// on mismatch.  Per-attempt failures are returned as
    /// [`AttemptOutcome::HttpStatus`], never as `Err`.
    pub async fn download_and_verify(
        &self,
        file_path: &str,
        expected_sha1: &str,
        attempt: u32,
    ) -> Result<AttemptOutcome> {
        let url = format!(
            "{}/file/{}/{}",
            self.download_url, self.bucket_name, file_path
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&self.auth_token)
                .context("while building the authorization header")?,
        );
        if attempt % 2 == 0 {
            headers.insert(RANGE, HeaderValue::from_static(RANGE_PROBE));
        }

        let exchange = match fetch_url(&self.http, &url, None, headers).await {
            FetchResult::Completed(exchange) => exchange,
            FetchResult::Failed(err) => {
                tracing::warn!(attempt, error = %err, "download request could not be completed");
                println!(
                    "[Attempt: {}]: Returned status code {}. Continuing.",
                    attempt, STATUS_REQUEST_FAILED
                );
                return Ok(AttemptOutcome::HttpStatus(STATUS_REQUEST_FAILED));
            }
        };

        println!(
            "[Attempt: {}]: Request made at {}",
            attempt, exchange.timestamp
        );

        if !exchange.status.is_success() {
            println!(
                "[Attempt: {}]: Returned status code {}. Continuing.",
                attempt,
                exchange.status.as_u16()
            );
            return Ok(AttemptOutcome::HttpStatus(exchange.status.as_u16()));
        }

        Ok(self.verify_body(&exchange, expected_sha1, attempt))
    }

    /// Compare the three checksum sources for a successful response.
    fn verify_body(
        &self,
        exchange: &Exchange,
        expected_sha1: &str,
        attempt: u32,
    ) -> AttemptOutcome {
        let computed = sha1_hex(&exchange.body);
        // a missing header can only ever mismatch
        let reported = exchange
            .response_headers
            .get(CONTENT_SHA1_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        if computed == expected_sha1 && reported == expected_sha1 {
            println!("[Attempt: {}]: All SHA1 match.", attempt);
            return AttemptOutcome::Match;
        }

        println!("[Attempt: {}]: SHA1 do not match.", attempt);
        println!(
            "[Attempt: {}]: expected_content_sha1: {}",
            attempt, expected_sha1
        );
        println!("[Attempt: {}]: b2_content_sha1: {}", attempt, reported);
        println!("[Attempt: {}]: res_content_sha1: {}", attempt, computed);
        println!("{}", format_request_dump(exchange, attempt));
        println!("{}", format_response_dump(exchange, attempt));

        AttemptOutcome::Mismatch {
            expected: expected_sha1.to_owned(),
            reported,
            computed,
        }
    }

    /// API base URL returned by authorization.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Download base URL returned by authorization.
    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    /// Account ID the application key belongs to.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Resolved ID of the configured bucket.
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Configured bucket name.
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    const KEY_ID: &str = "0011aabbccdd";
    const APP_KEY: &str = "K001secret";
    const TOKEN: &str = "4_0011token";
    const BUCKET: &str = "repro-bucket";

    /// `Basic base64("0011aabbccdd:K001secret")`
    const BASIC_AUTH: &str = "Basic MDAxMWFhYmJjY2RkOkswMDFzZWNyZXQ=";

    const BODY: &[u8] = b"hello, world";
    const BODY_SHA1: &str = "b7e23ec29af22b0b4e41da31e868d57226121c84";

    fn test_config() -> Config {
        Config::new(KEY_ID, APP_KEY, BUCKET, "/b2api/v2/")
    }

    #[test]
    fn basic_auth_literal_matches_encoder() {
        assert_eq!(
            BASIC_AUTH,
            format!("Basic {}", BASE64.encode(format!("{}:{}", KEY_ID, APP_KEY)))
        );
    }

    #[test]
    fn body_sha1_literal_matches_digest() {
        assert_eq!(BODY_SHA1, sha1_hex(BODY));
    }

    /// Expect the authorize-account call and respond with the given `allowed`
    /// object, pointing api and download URLs back at the test server.
    fn expect_authorize(server: &Server, allowed: serde_json::Value) {
        let root = format!("http://{}", server.addr());
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/b2api/v2/b2_authorize_account"),
                request::headers(contains(("authorization", BASIC_AUTH))),
            ])
            .respond_with(json_encoded(json!({
                "accountId": "acct-1",
                "apiUrl": root,
                "downloadUrl": root,
                "authorizationToken": TOKEN,
                "allowed": allowed,
            }))),
        );
    }

    async fn bound_client(server: &Server) -> Client {
        expect_authorize(
            server,
            json!({"bucketId": "bkt-1", "bucketName": BUCKET}),
        );
        ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn build_populates_session() {
        let server = Server::run();
        let client = bound_client(&server).await;

        let root = format!("http://{}", server.addr());
        assert_eq!(client.api_url(), root);
        assert_eq!(client.download_url(), root);
        assert_eq!(client.account_id(), "acct-1");
        assert_eq!(client.bucket_id(), "bkt-1");
        assert_eq!(client.bucket_name(), BUCKET);
        assert_eq!(client.auth_token, TOKEN);
    }

    #[tokio::test]
    async fn build_rejects_foreign_bucket() {
        let server = Server::run();
        expect_authorize(
            &server,
            json!({"bucketId": "bkt-9", "bucketName": "someone-elses-bucket"}),
        );

        let err = ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("restricted to bucket"));
    }

    #[tokio::test]
    async fn build_resolves_bucket_by_name() {
        let server = Server::run();
        expect_authorize(&server, json!({"bucketId": null, "bucketName": null}));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/b2api/v2/b2_list_buckets"),
                request::query(url_decoded(contains(("accountId", "acct-1")))),
                request::headers(contains(("authorization", TOKEN))),
            ])
            .respond_with(json_encoded(json!({
                "buckets": [
                    {"bucketId": "bkt-0", "bucketName": "other-bucket"},
                    {"bucketId": "bkt-7", "bucketName": BUCKET},
                ],
            }))),
        );

        let client = ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap();
        assert_eq!(client.bucket_id(), "bkt-7");
    }

    #[tokio::test]
    async fn build_fails_for_unknown_bucket() {
        let server = Server::run();
        expect_authorize(&server, json!({}));
        server.expect(
            Expectation::matching(request::method_path("GET", "/b2api/v2/b2_list_buckets"))
                .respond_with(json_encoded(json!({
                    "buckets": [{"bucketId": "bkt-0", "bucketName": "other-bucket"}],
                }))),
        );

        let err = ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no bucket named"));
    }

    #[tokio::test]
    async fn build_fails_on_auth_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/b2api/v2/b2_authorize_account",
            ))
            .respond_with(status_code(401)),
        );

        let err = ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn download_even_attempt_sends_range_probe() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/file/repro-bucket/some/file.bin"),
                request::headers(contains(("authorization", TOKEN))),
                request::headers(contains(("range", RANGE_PROBE))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header(CONTENT_SHA1_HEADER, BODY_SHA1)
                    .body(BODY),
            ),
        );
        let client = bound_client(&server).await;

        let outcome = client
            .download_and_verify("some/file.bin", BODY_SHA1, 0)
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Match);
    }

    #[tokio::test]
    async fn download_odd_attempt_has_no_range_header() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/file/repro-bucket/some/file.bin"),
                request::headers(not(contains(key("range")))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header(CONTENT_SHA1_HEADER, BODY_SHA1)
                    .body(BODY),
            ),
        );
        let client = bound_client(&server).await;

        let outcome = client
            .download_and_verify("some/file.bin", BODY_SHA1, 1)
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Match);
    }

    #[tokio::test]
    async fn download_mismatch_reports_all_three_checksums() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/file/repro-bucket/data.bin",
            ))
            .respond_with(
                status_code(200)
                    .insert_header(CONTENT_SHA1_HEADER, BODY_SHA1)
                    .body(&b"corrupted body"[..]),
            ),
        );
        let client = bound_client(&server).await;

        let expected = "0000000000000000000000000000000000000000";
        let outcome = client
            .download_and_verify("data.bin", expected, 1)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::Mismatch {
                expected: expected.to_owned(),
                reported: BODY_SHA1.to_owned(),
                computed: sha1_hex(b"corrupted body"),
            }
        );
    }

    #[tokio::test]
    async fn download_mismatch_when_sha1_header_missing() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/file/repro-bucket/data.bin",
            ))
            .respond_with(status_code(200).body(BODY)),
        );
        let client = bound_client(&server).await;

        let outcome = client
            .download_and_verify("data.bin", BODY_SHA1, 1)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::Mismatch {
                expected: BODY_SHA1.to_owned(),
                reported: String::new(),
                computed: BODY_SHA1.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn download_non_success_status_continues() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/file/repro-bucket/data.bin",
            ))
            .respond_with(status_code(404)),
        );
        let client = bound_client(&server).await;

        let outcome = client
            .download_and_verify("data.bin", "da39a3ee", 1)
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::HttpStatus(404));
    }

    #[tokio::test]
    async fn download_transport_failure_yields_sentinel() {
        let server = Server::run();
        expect_authorize(
            &server,
            json!({"bucketId": "bkt-1", "bucketName": BUCKET}),
        );
        // authorization succeeds, but the download endpoint is unreachable
        let mut client = ClientBuilder::new(test_config())
            .auth_base_url(format!("http://{}", server.addr()))
            .build()
            .await
            .unwrap();
        client.download_url = "http://127.0.0.1:1".to_owned();

        let outcome = client
            .download_and_verify("data.bin", "da39a3ee", 1)
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::HttpStatus(STATUS_REQUEST_FAILED));
    }
}
