//! Google Sheets source: sheet listing, value-range fetches, token cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "vacsync-sheets";

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh slightly before the recorded expiry so an in-flight request does
/// not race the deadline.
const EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading token cache {path}: {source}")]
    TokenCacheIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("token cache {path} is not valid authorized-user json: {source}")]
    TokenCacheFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("access token rejected and the cache carries no refresh credentials")]
    NoRefreshCredentials,
}

/// Yields sheet names and, per sheet, ordered rows of raw cell text.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn sheet_names(&self) -> Result<Vec<String>, SheetError>;

    /// Rows of `sheet_name` within `range`, e.g. `B2:P`. Empty when the
    /// sheet has no data in the range.
    async fn rows(&self, sheet_name: &str, range: &str) -> Result<Vec<Vec<String>>, SheetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Authorized-user token cache, in the JSON layout the consent flow writes.
/// The interactive flow itself lives outside this service; a missing or
/// unrefreshable cache is a transport failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenCache {
    pub async fn load(path: &Path) -> Result<Self, SheetError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| SheetError::TokenCacheIo {
                path: path.display().to_string(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| SheetError::TokenCacheFormat {
            path: path.display().to_string(),
            source,
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), SheetError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| {
            SheetError::TokenCacheFormat {
                path: path.display().to_string(),
                source,
            }
        })?;
        fs::write(path, text)
            .await
            .map_err(|source| SheetError::TokenCacheIo {
                path: path.display().to_string(),
                source,
            })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - chrono::Duration::seconds(EXPIRY_SLACK_SECS) <= now,
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    #[serde(default)]
    properties: SheetProperties,
}

#[derive(Debug, Default, Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SheetsClientConfig {
    pub spreadsheet_id: String,
    pub token_cache_path: PathBuf,
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

/// Sheets v4 REST client authenticated from the local token cache.
#[derive(Debug)]
pub struct GoogleSheetsClient {
    client: reqwest::Client,
    spreadsheet_id: String,
    token_cache_path: PathBuf,
    token: Mutex<TokenCache>,
    backoff: BackoffPolicy,
}

impl GoogleSheetsClient {
    /// Build the HTTP client and load the token cache from disk.
    pub async fn connect(config: SheetsClientConfig) -> Result<Self, SheetError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let token = TokenCache::load(&config.token_cache_path).await?;
        info!(
            spreadsheet_id = %config.spreadsheet_id,
            token_cache = %config.token_cache_path.display(),
            "connected sheet source"
        );
        Ok(Self {
            client,
            spreadsheet_id: config.spreadsheet_id,
            token_cache_path: config.token_cache_path,
            token: Mutex::new(token),
            backoff: config.backoff,
        })
    }

    /// Exchange the cached refresh token for a fresh access token and persist
    /// the renewed cache.
    async fn refresh_access_token(&self) -> Result<(), SheetError> {
        let mut cache = self.token.lock().await;
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            cache.refresh_token.clone(),
            cache.client_id.clone(),
            cache.client_secret.clone(),
        ) else {
            return Err(SheetError::NoRefreshCredentials);
        };

        let response = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SheetError::HttpStatus {
                status: status.as_u16(),
                url: TOKEN_URI.to_string(),
            });
        }
        let body: RefreshResponse = response.json().await?;

        cache.token = body.access_token;
        cache.expiry =
            Some(Utc::now() + chrono::Duration::seconds(body.expires_in - EXPIRY_SLACK_SECS));
        cache.save(&self.token_cache_path).await?;
        info!("refreshed sheets access token");
        Ok(())
    }

    async fn bearer(&self) -> Result<String, SheetError> {
        let expired = {
            let cache = self.token.lock().await;
            cache.is_expired(Utc::now())
        };
        if expired {
            self.refresh_access_token().await?;
        }
        Ok(self.token.lock().await.token.clone())
    }

    /// GET `url` as JSON with retry on transient failures and a single token
    /// refresh on 401.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SheetError> {
        let mut refreshed = false;
        let mut attempt = 0usize;

        loop {
            let bearer = self.bearer().await?;
            match self.client.get(url).bearer_auth(&bearer).send().await {
                Ok(response) => {
                    let status = response.status();
                    let final_url = response.url().to_string();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status == StatusCode::UNAUTHORIZED && !refreshed {
                        refreshed = true;
                        debug!(url = %final_url, "access token rejected, refreshing");
                        self.refresh_access_token().await?;
                        continue;
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(url = %final_url, %status, ?delay, "retrying sheet request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(SheetError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(url, error = %err, ?delay, "retrying sheet request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SheetError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl SheetSource for GoogleSheetsClient {
    async fn sheet_names(&self) -> Result<Vec<String>, SheetError> {
        let url = format!(
            "{SHEETS_API_BASE}/{}?fields=sheets.properties.title",
            self.spreadsheet_id
        );
        let meta: SpreadsheetMeta = self.get_json(&url).await?;
        Ok(meta
            .sheets
            .into_iter()
            .map(|entry| entry.properties.title)
            .filter(|title| !title.is_empty())
            .collect())
    }

    async fn rows(&self, sheet_name: &str, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = format!(
            "{SHEETS_API_BASE}/{}/values/{sheet_name}!{range}",
            self.spreadsheet_id
        );
        let value_range: ValueRange = self.get_json(&url).await?;
        Ok(value_range.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn spreadsheet_meta_parses_sheet_titles() {
        let meta: SpreadsheetMeta = serde_json::from_str(
            r#"{"sheets":[{"properties":{"title":"Лист1"}},{"properties":{"title":""}},{"properties":{}}]}"#,
        )
        .expect("meta json");
        let titles: Vec<_> = meta
            .sheets
            .into_iter()
            .map(|entry| entry.properties.title)
            .filter(|title| !title.is_empty())
            .collect();
        assert_eq!(titles, vec!["Лист1".to_string()]);
    }

    #[test]
    fn value_range_defaults_to_no_rows() {
        let empty: ValueRange = serde_json::from_str(r#"{"range":"Лист1!B2:P"}"#).expect("json");
        assert!(empty.values.is_empty());

        let filled: ValueRange =
            serde_json::from_str(r#"{"values":[["Acme","","IT","Engineer"]]}"#).expect("json");
        assert_eq!(filled.values.len(), 1);
        assert_eq!(filled.values[0][3], "Engineer");
    }

    #[test]
    fn expiry_check_honors_slack() {
        let cache = TokenCache {
            token: "t".into(),
            refresh_token: None,
            client_id: None,
            client_secret: None,
            expiry: Some(Utc::now() + chrono::Duration::seconds(30)),
        };
        // 30s left is inside the slack window.
        assert!(cache.is_expired(Utc::now()));

        let fresh = TokenCache {
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
            ..cache.clone()
        };
        assert!(!fresh.is_expired(Utc::now()));

        let no_expiry = TokenCache {
            expiry: None,
            ..cache
        };
        assert!(!no_expiry.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn token_cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token.json");
        let cache = TokenCache {
            token: "ya29.test".into(),
            refresh_token: Some("1//refresh".into()),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            expiry: None,
        };
        cache.save(&path).await.expect("save");
        let loaded = TokenCache::load(&path).await.expect("load");
        assert_eq!(loaded.token, "ya29.test");
        assert_eq!(loaded.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[tokio::test]
    async fn missing_token_cache_is_a_transport_failure() {
        let err = TokenCache::load(Path::new("/nonexistent/token.json"))
            .await
            .expect_err("missing cache");
        assert!(matches!(err, SheetError::TokenCacheIo { .. }));
    }
}
