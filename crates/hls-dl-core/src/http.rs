//! C1 — HTTP Fetcher: a single resilient GET used by every other component.

use std::sync::OnceLock;

use bytes::Bytes;
use rand::RngExt;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::HttpConfig;
use crate::error::DownloadError;
use crate::retry::retry_with_backoff;

/// Install the process-wide rustls `CryptoProvider` exactly once.
///
/// reqwest's `rustls-tls-webpki-roots-no-provider` feature deliberately omits
/// this so callers can pick a backend; every `HttpFetcher` needs one present
/// before building a client.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Generate the 16-character `__ddg2_` session cookie value, once per process.
fn generate_session_cookie() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..16)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Process-wide HTTP client shared by every fetch.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self, DownloadError> {
        install_rustls_provider();

        let cookie = format!("__ddg2_={}", generate_session_cookie());

        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.base_url)
                .map_err(|e| DownloadError::ConfigError(format!("invalid base url: {e}")))?,
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie)
                .map_err(|e| DownloadError::ConfigError(format!("invalid cookie: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(DownloadError::from)?;

        Ok(Self { client, config })
    }

    /// GET `url`, retrying per the configured policy, returning the full body.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn fetch(&self, url: &str, token: &CancellationToken) -> Result<Bytes, DownloadError> {
        retry_with_backoff(&self.config.retry, token, |_attempt| async {
            let url_headers_referer = &self.config.base_url;
            let resp = self
                .client
                .get(url)
                .header(USER_AGENT, &self.config.user_agent)
                .header(REFERER, url_headers_referer)
                .send()
                .await?;

            let status = resp.status();
            if status.is_success() {
                Ok(resp.bytes().await?)
            } else if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
                Err(DownloadError::RetryableHttp { status: status.as_u16(), url: url.to_string() })
            } else {
                Err(DownloadError::PermanentHttp { status: status.as_u16(), url: url.to_string() })
            }
        })
        .await
    }
}
