use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

const DEFAULT_USER_AGENT: &str = "courier/0.2";

/// Configurable options for the HTTP client shared by all transfers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Response cache configuration; `None` disables caching entirely.
    pub cache: Option<CacheConfig>,

    /// Connection timeout applied at the client level. Per-message
    /// `connect_timeout` values bound time-to-headers on top of this.
    pub connect_timeout: Duration,

    /// Whether to follow redirects (limited to 10 hops).
    pub follow_redirects: bool,

    /// User agent string.
    pub user_agent: String,

    /// Default HTTP headers attached to every request.
    pub headers: HeaderMap,

    /// Explicit proxy configuration (optional).
    pub proxy: Option<ProxyConfig>,

    /// Whether to fall back to system proxy settings (environment variables).
    pub use_system_proxy: bool,

    /// Disable TLS certificate verification.
    ///
    /// # Warning
    /// This is insecure and exists only for testing or controlled
    /// environments. Verification is on by default.
    pub danger_accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache: Some(CacheConfig::default()),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: ClientConfig::default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> crate::builder::ClientConfigBuilder {
        crate::builder::ClientConfigBuilder::new()
    }

    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        headers
    }
}

/// Response cache sizing and placement.
///
/// Watermark eviction: once total stored size crosses `high_watermark`, the
/// coldest entries are deleted until the total drops under `low_watermark`.
/// Bodies larger than `max_item_size` are never stored.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// SQLite file location. `None` places `courier-cache/cache.sqlite`
    /// under the system temp directory.
    pub path: Option<PathBuf>,
    /// Eviction trigger threshold in bytes.
    pub high_watermark: u64,
    /// Eviction target threshold in bytes.
    pub low_watermark: u64,
    /// Hard cap for a single cached body in bytes.
    pub max_item_size: u64,
    /// Capacity of the in-memory front cache in bytes.
    pub memory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            high_watermark: 100 * 1024 * 1024, // 100 MiB
            low_watermark: 80 * 1024 * 1024,   // 80 MiB
            max_item_size: 1024 * 1024,        // 1 MiB
            memory_capacity: 8 * 1024 * 1024,  // 8 MiB
        }
    }
}

impl CacheConfig {
    pub(crate) fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => std::env::temp_dir().join("courier-cache").join("cache.sqlite"),
        }
    }
}
