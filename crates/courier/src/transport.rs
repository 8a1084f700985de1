//! Pluggable HTTP transport.
//!
//! The queue talks to the network only through [`Transport`], so the real
//! reqwest engine and test doubles are interchangeable. A transport reports
//! back through [`TransferSink`], which the owning transfer implements.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Body, Client};
use rustls::{ClientConfig as TlsClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{CourierError, TransferError};
use crate::message::Method;
use crate::proxy::build_proxy_from_config;

/// Everything a transport needs to run one transfer.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    /// Raw `Name: value` header lines, already including any cache
    /// validators.
    pub headers: Vec<String>,
    /// In-memory request body.
    pub body: Option<Bytes>,
    /// Stream the request body from this file instead of memory.
    pub upload_file: Option<PathBuf>,
    /// Bounds the time until response headers arrive; zero defers to the
    /// client-level timeout.
    pub connect_timeout: Duration,
}

/// Callback surface a transfer exposes to the transport.
#[async_trait]
pub trait TransferSink: Send {
    /// One trimmed, non-empty response header line.
    fn on_header(&mut self, line: &str);

    /// Progress report. For uploads the figures describe the upload side.
    fn on_progress(&mut self, transferred: u64, total: u64);

    /// A chunk of the response body.
    async fn on_body(&mut self, chunk: Bytes) -> Result<(), TransferError>;
}

/// A multiplexed transfer engine. Implemented by [`HttpTransport`] for real
/// traffic and by test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one transfer to completion, feeding `sink` along the way, and
    /// return the HTTP status code.
    async fn execute(
        &self,
        request: TransportRequest,
        sink: &mut dyn TransferSink,
    ) -> Result<u16, TransferError>;
}

/// Create a reqwest Client with the provided configuration.
pub fn create_client(config: &ClientConfig) -> Result<Client, CourierError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to same host
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if config.danger_accept_invalid_certs {
        warn!("TLS certificate verification disabled by configuration");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    } else {
        // Build platform default TLS configuration
        let provider = Arc::new(ring::default_provider());
        let tls_config = TlsClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("Failed to configure default TLS protocol versions")
            .with_platform_verifier()
            .map_err(|e| CourierError::Generic(Box::new(e)))?
            .with_no_client_auth();
        client_builder = client_builder.use_preconfigured_tls(tls_config);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    // Set up proxy configuration
    if let Some(proxy_config) = &config.proxy {
        // Explicit proxy configuration takes precedence
        let proxy = match build_proxy_from_config(proxy_config) {
            Ok(p) => p,
            Err(e) => return Err(CourierError::ProxyError(e)),
        };
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        // reqwest applies system proxy settings (environment variables) by
        // default when we don't call no_proxy()
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(CourierError::from)
}

/// The reqwest-backed transport used for real traffic.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, CourierError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
        sink: &mut dyn TransferSink,
    ) -> Result<u16, TransferError> {
        let url: reqwest::Url = request
            .url
            .parse()
            .map_err(|e| TransferError::TransportInit(format!("invalid URL {}: {e}", request.url)))?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransferError::TransportInit(format!("invalid method: {e}")))?;

        let mut builder = self.client.request(method, url);
        for line in &request.headers {
            if let Some((name, value)) = line.split_once(':') {
                builder = builder.header(name.trim(), value.trim());
            }
        }

        // Uploads stream from disk through a byte counter so progress can be
        // reported from the upload side.
        let upload_sent = Arc::new(AtomicU64::new(0));
        let mut upload_total = None;
        if let Some(path) = &request.upload_file {
            let io_error = |e: std::io::Error| TransferError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            };
            let file = tokio::fs::File::open(path).await.map_err(io_error)?;
            let metadata = file.metadata().await.map_err(io_error)?;
            upload_total = Some(metadata.len());

            let sent = Arc::clone(&upload_sent);
            let counted = ReaderStream::new(file).inspect_ok(move |chunk| {
                sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            });
            builder = builder.body(Body::wrap_stream(counted));
        } else if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let pending = builder.send();
        let response = if request.connect_timeout.is_zero() {
            pending.await.map_err(network_error)?
        } else {
            match tokio::time::timeout(request.connect_timeout, pending).await {
                Ok(result) => result.map_err(network_error)?,
                Err(_) => {
                    return Err(TransferError::Network(format!(
                        "no response headers within {:?}",
                        request.connect_timeout
                    )));
                }
            }
        };

        let status = response.status().as_u16();
        for (name, value) in response.headers() {
            let line = format!("{}: {}", name.as_str(), value.to_str().unwrap_or_default());
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                sink.on_header(trimmed);
            }
        }

        let total = response.content_length().unwrap_or(0);
        let mut stream = response.bytes_stream();
        let mut fetched: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network_error)?;
            fetched += chunk.len() as u64;
            sink.on_body(chunk).await?;
            match upload_total {
                Some(upload_len) => {
                    sink.on_progress(upload_sent.load(Ordering::Relaxed), upload_len)
                }
                None => sink.on_progress(fetched, total),
            }
        }
        if let Some(upload_len) = upload_total {
            sink.on_progress(upload_sent.load(Ordering::Relaxed), upload_len);
        }

        Ok(status)
    }
}

fn network_error(error: reqwest::Error) -> TransferError {
    TransferError::Network(error.to_string())
}
