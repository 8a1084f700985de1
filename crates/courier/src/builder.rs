//! # Builder for ClientConfig
//!
//! Fluent API for creating and customizing [`ClientConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use courier_engine::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyEditor/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_caching_enabled(true)
//!     .build();
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::config::{CacheConfig, ClientConfig};
use crate::proxy::ProxyConfig;

/// Builder for creating [`ClientConfig`] instances with a fluent API.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the cache configuration.
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Enable or disable response caching.
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        if enabled {
            if self.config.cache.is_none() {
                self.config.cache = Some(CacheConfig::default());
            }
        } else {
            self.config.cache = None;
        }
        self
    }

    /// Set the client-level connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects.
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a default HTTP header attached to every request.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all default headers, replacing any existing ones.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set the proxy configuration.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available.
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        // Only set system proxy if no explicit proxy is configured
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Set whether to accept invalid certificates.
    ///
    /// # Warning
    /// This is unsafe and should only be used for testing or in controlled
    /// environments.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    /// Build the [`ClientConfig`] instance.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyAuth, ProxyType};
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfigBuilder::new().build();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.follow_redirects);
        assert!(config.use_system_proxy);
        assert!(!config.danger_accept_invalid_certs);
        assert!(config.cache.is_some());
    }

    #[test]
    fn test_builder_customization() {
        let config = ClientConfigBuilder::new()
            .with_connect_timeout(Duration::from_secs(20))
            .with_follow_redirects(false)
            .with_user_agent("CustomUserAgent/1.0")
            .with_header("X-Custom-Header", "CustomValue")
            .with_system_proxy(false)
            .build();

        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "CustomUserAgent/1.0");
        assert!(!config.use_system_proxy);

        let header_value = config.headers.get("X-Custom-Header").unwrap();
        assert_eq!(header_value.to_str().unwrap(), "CustomValue");
    }

    #[test]
    fn test_caching_options() {
        let config_with_cache = ClientConfigBuilder::new()
            .with_caching_enabled(true)
            .build();
        assert!(config_with_cache.cache.is_some());

        let config_without_cache = ClientConfigBuilder::new()
            .with_caching_enabled(false)
            .build();
        assert!(config_without_cache.cache.is_none());
    }

    #[test]
    fn test_proxy_configuration() {
        let proxy_config = ProxyConfig {
            url: "http://proxy.example.com:8080".to_string(),
            proxy_type: ProxyType::Http,
            auth: Some(ProxyAuth {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
        };

        let config_with_proxy = ClientConfigBuilder::new()
            .with_proxy(proxy_config.clone())
            .build();

        assert!(config_with_proxy.proxy.is_some());
        assert!(!config_with_proxy.use_system_proxy);

        let stored_proxy = config_with_proxy.proxy.unwrap();
        assert_eq!(stored_proxy.url, proxy_config.url);
        assert_eq!(stored_proxy.auth.as_ref().unwrap().username, "user");
        assert_eq!(stored_proxy.proxy_type, proxy_config.proxy_type);
    }
}
