//! One in-flight transfer.
//!
//! A [`Transfer`] owns the request while it runs on the worker: it feeds
//! state notes into the pump, sinks the body to memory or disk, and
//! reconciles the outcome with the response cache (304 substitution,
//! store-on-success).

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::cache::{self, CacheEntry, ResponseCache};
use crate::error::TransferError;
use crate::message::{GroupId, MessageId, Method, Request, TransferResult, TransferState};
use crate::queue::PumpState;
use crate::transport::{TransferSink, Transport, TransportRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Terminal result of a transfer plus whether it spends the group's failure
/// budget. Aborts and fail-fast rejections never do.
pub(crate) struct TransferOutcome {
    pub result: TransferResult,
    pub counts_as_failure: bool,
}

impl TransferOutcome {
    fn ok(result: TransferResult) -> Self {
        Self {
            result,
            counts_as_failure: false,
        }
    }

    fn failed(error: TransferError) -> Self {
        Self {
            counts_as_failure: error.counts_as_failure(),
            result: TransferResult::failure(error),
        }
    }

    pub(crate) fn aborted() -> Self {
        Self::failed(TransferError::Aborted)
    }
}

pub(crate) struct Transfer {
    id: MessageId,
    group: GroupId,
    request: Request,
    /// Stale cache entry whose validators were attached; substituted back in
    /// on a 304.
    cached: Option<CacheEntry>,
    pump: Arc<PumpState>,
    headers: Vec<String>,
    file: Option<tokio::fs::File>,
    buf: BytesMut,
    running_noted: bool,
}

impl Transfer {
    pub(crate) fn new(
        id: MessageId,
        group: GroupId,
        request: Request,
        cached: Option<CacheEntry>,
        pump: Arc<PumpState>,
    ) -> Self {
        Self {
            id,
            group,
            request,
            cached,
            pump,
            headers: Vec::new(),
            file: None,
            buf: BytesMut::new(),
            running_noted: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        transport: &dyn Transport,
        cache: Option<&ResponseCache>,
    ) -> TransferOutcome {
        // The download file opens before the network is touched, so a bad
        // path fails without a request on the wire.
        if let Some(path) = self.request.download_file.clone() {
            match tokio::fs::File::create(&path).await {
                Ok(file) => self.file = Some(file),
                Err(error) => {
                    return TransferOutcome::failed(TransferError::Io {
                        path: path.display().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        let mut headers = self.request.headers.clone();
        if let Some(entry) = &self.cached {
            headers.extend(entry.validation_headers());
        }
        let transport_request = TransportRequest {
            url: self.request.url.clone(),
            method: self.request.method.clone(),
            headers,
            body: self.request.body.clone(),
            upload_file: self.request.upload_file.clone(),
            connect_timeout: self.request.connect_timeout,
        };

        let status = match transport.execute(transport_request, &mut self).await {
            Ok(status) => status,
            Err(error) => {
                warn!(url = %self.request.url, error = %error, "Transfer failed");
                return TransferOutcome::failed(error);
            }
        };

        if let Some(file) = self.file.as_mut() {
            if let Err(error) = file.flush().await {
                return TransferOutcome::failed(TransferError::Io {
                    path: self.download_path(),
                    message: error.to_string(),
                });
            }
        }

        self.finish(status, cache)
    }

    /// Reconcile the raw transport status with the cache and the request's
    /// error policy.
    fn finish(mut self, status: u16, cache: Option<&ResponseCache>) -> TransferOutcome {
        let now = cache::unix_now();
        let headers = std::mem::take(&mut self.headers);

        if status == 304 {
            if let Some(entry) = self.cached.take() {
                debug!(url = %self.request.url, "Not modified, serving revalidated cache entry");
                if let Some(cache) = cache {
                    cache.touch(&entry, now);
                }
                return TransferOutcome::ok(TransferResult::success(200, headers, entry.body));
            }
        }

        if self.request.fail_on_http_error && status >= 400 {
            return TransferOutcome {
                counts_as_failure: true,
                result: TransferResult::http_failure(status, headers),
            };
        }

        let body = if self.file.is_some() {
            Bytes::new()
        } else {
            self.buf.split().freeze()
        };

        if status == 200 && self.cacheable() {
            if let Some(cache) = cache {
                cache.store(&self.request.url, &headers, &body, now);
            }
        }

        TransferOutcome::ok(TransferResult::success(status, headers, body))
    }

    fn cacheable(&self) -> bool {
        self.request.allow_caching
            && self.request.method == Method::Get
            && self.request.download_file.is_none()
    }

    fn download_path(&self) -> String {
        self.request
            .download_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransferSink for Transfer {
    fn on_header(&mut self, line: &str) {
        if !self.running_noted {
            self.running_noted = true;
            self.pump
                .note(self.group, self.id, TransferState::Running, 0, 0);
        }
        self.headers.push(line.to_string());
    }

    fn on_progress(&mut self, transferred: u64, total: u64) {
        self.pump.note(
            self.group,
            self.id,
            TransferState::Progress,
            transferred,
            total,
        );
    }

    async fn on_body(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        match self.file.as_mut() {
            Some(file) => file.write_all(&chunk).await.map_err(|error| TransferError::Io {
                path: self
                    .request
                    .download_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                message: error.to_string(),
            }),
            None => {
                self.buf.extend_from_slice(&chunk);
                Ok(())
            }
        }
    }
}
