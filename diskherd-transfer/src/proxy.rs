use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use diskherd_core::{EngineConfig, HerdError, Result, TransferSession};
use reqwest::Certificate;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE};
use tracing::debug;

/// TLS trust settings for the proxy connection.
#[derive(Debug, Clone, Default)]
pub struct ProxyTls {
    /// Disable certificate validation and hostname verification entirely.
    pub insecure: bool,
    pub ca_file: Option<PathBuf>,
}

impl From<&EngineConfig> for ProxyTls {
    fn from(config: &EngineConfig) -> Self {
        Self {
            insecure: config.insecure,
            ca_file: config.ca_file.clone(),
        }
    }
}

/// Byte range of one chunk within the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl std::fmt::Display for ContentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Sink for ranged image chunks. One sink serves exactly one upload.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// PUT one chunk; returns the HTTP status code.
    async fn put_chunk(&self, range: &ContentRange, body: Bytes) -> Result<u16>;
}

/// HTTPS connection to the transfer proxy named by a ready session. The
/// signed ticket authorizes every chunk.
#[derive(Debug)]
pub struct HttpsProxy {
    client: reqwest::Client,
    url: reqwest::Url,
    ticket: String,
}

impl HttpsProxy {
    pub fn connect(session: &TransferSession, tls: &ProxyTls) -> Result<Self> {
        let ticket = session
            .signed_ticket
            .clone()
            .ok_or_else(|| HerdError::RemoteOperation {
                operation: "transfer setup".to_string(),
                message: format!("session {} carries no signed ticket", session.id),
            })?;
        let raw_url = session
            .proxy_url
            .as_ref()
            .ok_or_else(|| HerdError::RemoteOperation {
                operation: "transfer setup".to_string(),
                message: format!("session {} carries no proxy URL", session.id),
            })?;
        let url = reqwest::Url::parse(raw_url).map_err(|e| HerdError::RemoteOperation {
            operation: "transfer setup".to_string(),
            message: format!("invalid proxy URL '{raw_url}': {e}"),
        })?;

        let mut builder = reqwest::Client::builder();
        if tls.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        } else if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file)?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                HerdError::Config(format!("invalid CA file {}: {e}", ca_file.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| HerdError::Config(format!("failed to build proxy client: {e}")))?;

        debug!("Connected to transfer proxy at {url}");
        Ok(Self {
            client,
            url,
            ticket,
        })
    }
}

#[async_trait]
impl ChunkSink for HttpsProxy {
    async fn put_chunk(&self, range: &ContentRange, body: Bytes) -> Result<u16> {
        let response = self
            .client
            .put(self.url.clone())
            .header(AUTHORIZATION, &self.ticket)
            .header(CONTENT_RANGE, range.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| HerdError::Network {
                operation: "chunk upload".to_string(),
                cause: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}
