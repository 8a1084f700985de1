use std::error::Error as StdError;

/// Errors raised while constructing the client, queue or cache.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("Cache error: {0}")]
    CacheError(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(Box<dyn StdError + Send + Sync>),
}

/// Terminal failure reason carried by a [`TransferResult`].
///
/// Diagnostics are plain strings so results stay `Clone` and can cross the
/// worker/caller boundary as data; nothing here is ever thrown across it.
///
/// [`TransferResult`]: crate::TransferResult
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The transport could not be set up for this transfer. Fatal to the one
    /// transfer, not to the queue.
    #[error("Failed to initialize transfer: {0}")]
    TransportInit(String),

    /// Local file open/read/write failure on an upload or download path.
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// DNS, connect, timeout or protocol failure, reported with the
    /// transport's diagnostic string. Counts toward the group failure budget.
    #[error("Network error: {0}")]
    Network(String),

    /// Server returned an error status and the request asked to fail on it.
    #[error("Server returned status code {0}")]
    HttpStatus(u16),

    /// Cooperative cancellation. Never counted as a network failure.
    #[error("Transfer aborted")]
    Aborted,

    /// Synthesized before any I/O once a group's failure budget is spent.
    #[error("Group disabled due to repeated failures")]
    GroupDisabled,
}

impl TransferError {
    /// Whether this failure spends the owning group's failure budget.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, TransferError::Aborted | TransferError::GroupDisabled)
    }
}
