//! Request and result types exchanged with the queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::error::TransferError;

/// Identifier of a submitted message, unique for the lifetime of a queue.
pub type MessageId = u64;

/// Index of an admission-control group, in the order groups were configured.
pub type GroupId = usize;

/// HTTP method for a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    /// Any other verb, sent as-is.
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Custom(verb) => verb,
        }
    }
}

/// One network request, immutable after submission.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    /// Raw `Name: value` header lines, sent in order.
    pub headers: Vec<String>,
    /// In-memory request body (POST/PUT).
    pub body: Option<Bytes>,
    /// Stream the request body from this file instead of memory.
    pub upload_file: Option<PathBuf>,
    /// Stream the response body into this file instead of memory.
    pub download_file: Option<PathBuf>,
    /// Free-form label used by [`RequestQueue::abort_by_tag`].
    ///
    /// [`RequestQueue::abort_by_tag`]: crate::RequestQueue::abort_by_tag
    pub tag: String,
    pub allow_caching: bool,
    /// Treat HTTP status >= 400 as a terminal failure.
    pub fail_on_http_error: bool,
    /// Bounds the time until response headers arrive. Zero uses the
    /// client-level default.
    pub connect_timeout: Duration,
}

impl Request {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            body: None,
            upload_file: None,
            download_file: None,
            tag: String::new(),
            allow_caching: false,
            fail_on_http_error: false,
            connect_timeout: Duration::ZERO,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get)
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(url, Method::Post);
        request.body = Some(body);
        request
    }

    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_caching(mut self, allow: bool) -> Self {
        self.allow_caching = allow;
        self
    }

    pub fn with_download_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_file = Some(path.into());
        self
    }

    pub fn with_upload_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.upload_file = Some(path.into());
        self
    }

    pub fn with_fail_on_http_error(mut self, fail: bool) -> Self {
        self.fail_on_http_error = fail;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Lifecycle of a submitted message.
///
/// `Pending` means the message sits in its group's pending list without a
/// transfer attached yet. `Done` is terminal and delivered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferState {
    Pending,
    Connecting,
    Running,
    Progress,
    Done,
}

/// Terminal outcome of one transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub success: bool,
    /// HTTP status code, 0 when the transfer never reached the server.
    pub status: u16,
    /// Trimmed response header lines, in arrival order.
    pub headers: Vec<String>,
    /// Response body; empty when the body was streamed to a download file.
    pub body: Bytes,
    pub error: Option<TransferError>,
}

impl TransferResult {
    pub(crate) fn success(status: u16, headers: Vec<String>, body: Bytes) -> Self {
        Self {
            success: true,
            status,
            headers,
            body,
            error: None,
        }
    }

    pub(crate) fn failure(error: TransferError) -> Self {
        Self {
            success: false,
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            error: Some(error),
        }
    }

    pub(crate) fn http_failure(status: u16, headers: Vec<String>) -> Self {
        Self {
            success: false,
            status,
            headers,
            body: Bytes::new(),
            error: Some(TransferError::HttpStatus(status)),
        }
    }
}

/// Notification delivered to the submit callback from [`RequestQueue::pump`].
///
/// Per message the order is `Connecting`, zero or more `Progress`, then
/// exactly one `Done`; nothing follows `Done`.
///
/// [`RequestQueue::pump`]: crate::RequestQueue::pump
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Connecting,
    Progress { fetched: u64, total: u64 },
    Done(TransferResult),
}

/// Callback invoked on the pumping thread for every delivered event.
pub type EventCallback = Box<dyn FnMut(TransferEvent) + Send>;

/// State shared between a [`RequestHandle`] and the worker.
#[derive(Debug)]
pub(crate) struct MessageShared {
    pub(crate) id: MessageId,
    pub(crate) group: GroupId,
    pub(crate) tag: String,
    abort: AtomicBool,
}

impl MessageShared {
    pub(crate) fn new(id: MessageId, group: GroupId, tag: String) -> Self {
        Self {
            id,
            group,
            tag,
            abort: AtomicBool::new(false),
        }
    }

    /// Set-once, monotonic.
    pub(crate) fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Handle to a submitted message, used to abort it.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    pub(crate) shared: Arc<MessageShared>,
}

impl RequestHandle {
    pub fn id(&self) -> MessageId {
        self.shared.id
    }

    pub fn group(&self) -> GroupId {
        self.shared.group
    }

    pub fn tag(&self) -> &str {
        &self.shared.tag
    }

    /// Whether an abort has been requested for this message. The terminal
    /// result still arrives through the normal pump path.
    pub fn abort_requested(&self) -> bool {
        self.shared.abort_requested()
    }
}
