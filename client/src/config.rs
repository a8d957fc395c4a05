use anyhow::{anyhow, Context, Error};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Default API version path fragment, used when `B2CHECK_API_VERSION` is not
/// set.  The config file must always name one explicitly.
pub const DEFAULT_API_VERSION: &str = "/b2api/v2/";

/// Config holds the credentials and parameters required to reach the B2 API.
/// It is loaded once at startup and passed to
/// [`ClientBuilder`](crate::ClientBuilder); nothing mutates it afterwards.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct Config {
    /// Application key ID
    #[serde(rename = "keyid")]
    pub key_id: String,

    /// Application key secret
    #[serde(rename = "appkey")]
    pub app_key: String,

    /// Name of the bucket holding the file under diagnosis
    #[serde(rename = "bucketName")]
    pub bucket_name: String,

    /// API version path fragment, e.g. `/b2api/v2/`
    #[serde(rename = "apiVersion")]
    pub api_version: String,
}

impl Config {
    /// Create a new Config from its four parts.
    pub fn new<S1, S2, S3, S4>(key_id: S1, app_key: S2, bucket_name: S3, api_version: S4) -> Config
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        Config {
            key_id: key_id.into(),
            app_key: app_key.into(),
            bucket_name: bucket_name.into(),
            api_version: api_version.into(),
        }
    }

    /// Load a Config from a TOML file with keys `keyid`, `appkey`,
    /// `bucketName` and `apiVersion`, all required.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("while reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("while parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Create a new Config from environment variables:
    ///
    /// * `B2CHECK_KEY_ID`
    /// * `B2CHECK_APP_KEY`
    /// * `B2CHECK_BUCKET_NAME`
    /// * `B2CHECK_API_VERSION` (optional, defaults to `/b2api/v2/`)
    pub fn from_env() -> Result<Config, Error> {
        let key_id = env::var("B2CHECK_KEY_ID").context("B2CHECK_KEY_ID")?;
        let app_key = env::var("B2CHECK_APP_KEY").context("B2CHECK_APP_KEY")?;
        let bucket_name = env::var("B2CHECK_BUCKET_NAME").context("B2CHECK_BUCKET_NAME")?;

        let api_version = match env::var("B2CHECK_API_VERSION") {
            Err(env::VarError::NotPresent) => DEFAULT_API_VERSION.to_owned(),
            Err(err) => {
                return Err(anyhow!(
                    "Cannot read environment variable 'B2CHECK_API_VERSION': {}",
                    err
                ))
            }
            Ok(v) if v.is_empty() => DEFAULT_API_VERSION.to_owned(),
            Ok(v) => v,
        };

        Ok(Config {
            key_id,
            app_key,
            bucket_name,
            api_version,
        })
    }
}
