// src/fetch/client.rs
use once_cell::sync::OnceCell;
use reqwest::{Client, StatusCode};
use rustls::{OwnedTrustAnchor, RootCertStore};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::HttpConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("building HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("GET {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Status and body of a completed GET. Non-success statuses are not errors here.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

static SHARED: OnceCell<LegacyClient> = OnceCell::new();

/// TLS settings for the EPA and ZIP lookup hosts.
///
/// Both servers predate RFC 5746. OpenSSL-based stacks refuse them unless
/// `SSL_OP_LEGACY_SERVER_CONNECT` is set. rustls never renegotiates and does not
/// require the secure-renegotiation extension, so its stock defaults already
/// connect; the config is built here only to pin webpki roots and HTTP/1.1 ALPN.
fn legacy_tls_config() -> rustls::ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

/// Upper bound on a single retry delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry `attempt` (1-based): `initial_ms * 2^(attempt-1)`, capped.
fn backoff_delay_ms(initial_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(MAX_BACKOFF_MS, |factor| initial_ms.saturating_mul(factor))
        .min(MAX_BACKOFF_MS)
}

/// HTTP client built on the legacy-tolerant TLS configuration, with bounded
/// timeouts and optional retry on transport failures.
#[derive(Debug, Clone)]
pub struct LegacyClient {
    inner: Client,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl LegacyClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self, TransportError> {
        let inner = Client::builder()
            .use_preconfigured_tls(legacy_tls_config())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(TransportError::Build)?;
        Ok(Self {
            inner,
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
        })
    }

    /// Process-wide client, built on first use from `cfg`. Later calls reuse it and
    /// ignore their `cfg`.
    pub fn shared(cfg: &HttpConfig) -> Result<&'static LegacyClient, TransportError> {
        SHARED.get_or_try_init(|| Self::new(cfg))
    }

    /// Single GET; the status is returned, never turned into an error.
    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, TransportError> {
        debug!(%url, "GET");
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|source| TransportError::Body {
                url: url.to_string(),
                source,
            })?
            .to_vec();
        debug!(%url, %status, bytes = body.len(), "response");
        Ok(FetchResponse { status, body })
    }

    /// [`fetch`](Self::fetch) with exponential backoff on transport errors.
    pub async fn fetch_with_retry(&self, url: &Url) -> Result<FetchResponse, TransportError> {
        let mut attempts = 0;
        loop {
            match self.fetch(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = backoff_delay_ms(self.initial_backoff_ms, attempts);
                    warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    error!(%url, error = %e, "Exhausted retries");
                    return Err(e);
                }
            }
        }
    }
}
