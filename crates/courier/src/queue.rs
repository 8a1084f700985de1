//! Client-facing request queue.
//!
//! `RequestQueue` owns the dedicated I/O worker thread and the shared pump
//! state. Callers submit requests from any thread, then call [`pump`] on
//! whichever thread should receive callbacks; no callback ever fires from
//! the I/O thread.
//!
//! [`pump`]: RequestQueue::pump

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{self, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{CourierError, TransferError};
use crate::message::{
    EventCallback, GroupId, MessageId, MessageShared, Method, Request, RequestHandle,
    TransferEvent, TransferResult, TransferState,
};
use crate::transport::{HttpTransport, Transport};
use crate::worker::{Command, Job, Worker};

/// One admission-control domain: a concurrency cap and a failure budget,
/// independent of other groups.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub name: String,
    /// Upper bound on concurrently running transfers in this group.
    pub max_concurrent: usize,
    /// Disable the group for new submissions after this many genuine
    /// failures. `None` = unlimited.
    pub max_failures_before_disabled: Option<u32>,
    /// Cap on terminal completions delivered per [`RequestQueue::pump`]
    /// call, so a burst cannot monopolize the caller's tick. `None` =
    /// unlimited.
    pub max_completions_per_pump: Option<usize>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrent: 4,
            max_failures_before_disabled: None,
            max_completions_per_pump: None,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_failure_budget(mut self, max_failures: u32) -> Self {
        self.max_failures_before_disabled = Some(max_failures);
        self
    }

    pub fn with_max_completions_per_pump(mut self, max_completions: usize) -> Self {
        self.max_completions_per_pump = Some(max_completions);
        self
    }
}

/// Event state shared between the worker and pumping threads.
///
/// The lock is held only for queue splicing; callbacks are always invoked
/// with the lock released.
pub(crate) struct PumpState {
    groups: Mutex<Vec<GroupPump>>,
}

#[derive(Default)]
struct GroupPump {
    /// Messages with an undrained event, in arrival order.
    ready: VecDeque<MessageId>,
    entries: HashMap<MessageId, PumpEntry>,
}

struct PumpEntry {
    /// Taken while its callback runs outside the lock.
    callback: Option<EventCallback>,
    state: TransferState,
    fetched: u64,
    total: u64,
    /// An undrained entry sits in `ready`; further notes overwrite the
    /// snapshot in place instead of queueing twice.
    queued: bool,
    connecting_delivered: bool,
    last_progress: Option<(u64, u64)>,
    done: Option<TransferResult>,
}

struct Delivery {
    group: GroupId,
    id: MessageId,
    callback: EventCallback,
    events: Vec<TransferEvent>,
    terminal: bool,
}

impl PumpState {
    fn new(group_count: usize) -> Self {
        let mut groups = Vec::with_capacity(group_count);
        groups.resize_with(group_count, GroupPump::default);
        Self {
            groups: Mutex::new(groups),
        }
    }

    fn register(&self, group: GroupId, id: MessageId, callback: EventCallback) {
        let mut groups = self.groups.lock();
        groups[group].entries.insert(
            id,
            PumpEntry {
                callback: Some(callback),
                state: TransferState::Pending,
                fetched: 0,
                total: 0,
                queued: false,
                connecting_delivered: false,
                last_progress: None,
                done: None,
            },
        );
    }

    /// Record a best-effort state notification, coalescing with any
    /// undrained one.
    pub(crate) fn note(
        &self,
        group: GroupId,
        id: MessageId,
        state: TransferState,
        fetched: u64,
        total: u64,
    ) {
        let mut groups = self.groups.lock();
        let Some(entry) = groups[group].entries.get_mut(&id) else {
            return;
        };
        if entry.done.is_some() {
            return;
        }
        if state > entry.state {
            entry.state = state;
        }
        entry.fetched = fetched;
        entry.total = total;
        if !entry.queued {
            entry.queued = true;
            groups[group].ready.push_back(id);
        }
    }

    /// Record the terminal result. Idempotent: a second completion for the
    /// same message is dropped, so exactly one `Done` is ever delivered.
    pub(crate) fn complete(&self, group: GroupId, id: MessageId, result: TransferResult) {
        let mut groups = self.groups.lock();
        let Some(entry) = groups[group].entries.get_mut(&id) else {
            return;
        };
        if entry.done.is_some() {
            return;
        }
        entry.done = Some(result);
        if !entry.queued {
            entry.queued = true;
            groups[group].ready.push_back(id);
        }
    }

    /// Drain undrained events, respecting each group's per-pump completion
    /// cap, and invoke callbacks outside the lock.
    fn pump(&self, limits: &[Option<usize>]) {
        let mut deliveries: Vec<Delivery> = Vec::new();
        {
            let mut groups = self.groups.lock();
            for (group_index, group) in groups.iter_mut().enumerate() {
                let limit = limits.get(group_index).copied().flatten();
                let mut done_count = 0usize;
                let mut deferred: VecDeque<MessageId> = VecDeque::new();

                while let Some(id) = group.ready.pop_front() {
                    let Some(entry) = group.entries.get_mut(&id) else {
                        continue;
                    };
                    let terminal = entry.done.is_some();
                    if terminal && limit.is_some_and(|cap| done_count >= cap) {
                        deferred.push_back(id);
                        continue;
                    }
                    let Some(callback) = entry.callback.take() else {
                        // A nested pump already holds this callback.
                        deferred.push_back(id);
                        continue;
                    };

                    entry.queued = false;
                    let mut events = Vec::new();
                    if !entry.connecting_delivered && entry.state >= TransferState::Connecting {
                        entry.connecting_delivered = true;
                        events.push(TransferEvent::Connecting);
                    }
                    let snapshot = (entry.fetched, entry.total);
                    if snapshot != (0, 0) && entry.last_progress != Some(snapshot) {
                        entry.last_progress = Some(snapshot);
                        events.push(TransferEvent::Progress {
                            fetched: snapshot.0,
                            total: snapshot.1,
                        });
                    }
                    if terminal {
                        done_count += 1;
                        let result = entry
                            .done
                            .clone()
                            .unwrap_or_else(|| TransferResult::failure(TransferError::Aborted));
                        events.push(TransferEvent::Done(result));
                        group.entries.remove(&id);
                    }

                    deliveries.push(Delivery {
                        group: group_index,
                        id,
                        callback,
                        events,
                        terminal,
                    });
                }

                // Deferred completions stay queued for the next pump.
                group.ready = deferred;
            }
        }

        let mut callbacks_to_restore = Vec::new();
        for mut delivery in deliveries {
            for event in delivery.events.drain(..) {
                (delivery.callback)(event);
            }
            if !delivery.terminal {
                callbacks_to_restore.push((delivery.group, delivery.id, delivery.callback));
            }
        }

        if !callbacks_to_restore.is_empty() {
            let mut groups = self.groups.lock();
            for (group, id, callback) in callbacks_to_restore {
                if let Some(entry) = groups[group].entries.get_mut(&id) {
                    entry.callback = Some(callback);
                }
            }
        }
    }
}

/// The request queue: submission API, admission control and completion
/// delivery. Owns the `courier-io` worker thread for its whole lifetime.
pub struct RequestQueue {
    groups: Vec<GroupConfig>,
    cache: Option<Arc<ResponseCache>>,
    pump: Arc<PumpState>,
    failures: Arc<Vec<AtomicU32>>,
    tx: mpsc::UnboundedSender<Command>,
    worker: Option<std::thread::JoinHandle<()>>,
    next_id: AtomicU64,
}

impl RequestQueue {
    /// Build the reqwest transport from `config`, open the cache if
    /// configured, and start the worker thread.
    pub fn new(config: ClientConfig, groups: Vec<GroupConfig>) -> Result<Self, CourierError> {
        let cache = match &config.cache {
            Some(cache_config) => Some(Arc::new(ResponseCache::open(cache_config)?)),
            None => None,
        };
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(transport, cache, groups)
    }

    /// Start a queue over any transport implementation. This is the seam
    /// used by tests and by embedders with their own engines.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        cache: Option<Arc<ResponseCache>>,
        groups: Vec<GroupConfig>,
    ) -> Result<Self, CourierError> {
        let pump = Arc::new(PumpState::new(groups.len()));
        let failures: Arc<Vec<AtomicU32>> =
            Arc::new(groups.iter().map(|_| AtomicU32::new(0)).collect());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker::new(
            transport,
            cache.clone(),
            groups.iter().map(|g| g.max_concurrent).collect(),
            Arc::clone(&failures),
            Arc::clone(&pump),
            rx,
        );
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = std::thread::Builder::new()
            .name("courier-io".to_string())
            .spawn(move || runtime.block_on(worker.run()))?;

        Ok(Self {
            groups,
            cache,
            pump,
            failures,
            tx,
            worker: Some(thread),
            next_id: AtomicU64::new(1),
        })
    }

    /// Submit a request to a group. The callback is invoked only from
    /// [`pump`], and receives exactly one terminal [`TransferEvent::Done`].
    ///
    /// [`pump`]: RequestQueue::pump
    pub fn submit(
        &self,
        request: Request,
        group: GroupId,
        callback: impl FnMut(TransferEvent) + Send + 'static,
    ) -> RequestHandle {
        assert!(group < self.groups.len(), "unknown group index {group}");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(MessageShared::new(id, group, request.tag.clone()));
        let handle = RequestHandle {
            shared: Arc::clone(&shared),
        };
        self.pump.register(group, id, Box::new(callback));

        // Fail fast once the group's failure budget is spent: nothing is
        // enqueued and no transfer is ever created.
        if self.is_group_disabled(group) {
            debug!(group = %self.groups[group].name, url = %request.url, "Group disabled, failing fast");
            self.pump
                .complete(group, id, TransferResult::failure(TransferError::GroupDisabled));
            return handle;
        }

        // A fresh cache hit bypasses the network entirely but is still
        // delivered through the pump, so callers see one delivery path.
        let mut cached = None;
        if request.allow_caching
            && request.method == Method::Get
            && request.download_file.is_none()
        {
            if let Some(cache) = &self.cache {
                if let Some(entry) = cache.lookup(&request.url) {
                    if entry.is_stale(cache::unix_now()) {
                        cached = Some(entry);
                    } else {
                        debug!(url = %request.url, "Serving fresh response from cache");
                        let result = TransferResult::success(
                            200,
                            entry.headers.clone(),
                            entry.body.clone(),
                        );
                        self.pump.complete(group, id, result);
                        return handle;
                    }
                }
            }
        }

        let job = Box::new(Job {
            id,
            group,
            request,
            shared,
            cached,
        });
        if self.tx.send(Command::Submit(job)).is_err() {
            warn!("Request queue worker is gone, failing submission");
            self.pump.complete(
                group,
                id,
                TransferResult::failure(TransferError::TransportInit(
                    "request queue is shut down".to_string(),
                )),
            );
        }
        handle
    }

    /// Request cancellation of one message. Returns immediately; the
    /// terminal aborted `Done` arrives through [`pump`]. Safe to call more
    /// than once and after completion.
    ///
    /// [`pump`]: RequestQueue::pump
    pub fn abort(&self, handle: &RequestHandle) {
        handle.shared.request_abort();
        let _ = self.tx.send(Command::Abort {
            group: handle.group(),
            id: handle.id(),
        });
    }

    /// Request cancellation of every pending or running message in `group`
    /// whose tag matches. A matching message that already completed keeps
    /// the result it produced, even if its `Done` has not been drained yet.
    pub fn abort_by_tag(&self, tag: &str, group: GroupId) {
        let _ = self.tx.send(Command::AbortTag {
            group,
            tag: tag.to_string(),
        });
    }

    /// Drain completion events and invoke callbacks on the calling thread.
    /// Must be called regularly (e.g. once per UI tick) or completions
    /// never surface.
    pub fn pump(&self) {
        let limits: Vec<Option<usize>> = self
            .groups
            .iter()
            .map(|g| g.max_completions_per_pump)
            .collect();
        self.pump.pump(&limits);
    }

    /// Whether the group's failure budget is exhausted; submissions to a
    /// disabled group fail fast without reaching the network.
    pub fn is_group_disabled(&self, group: GroupId) -> bool {
        match self.groups[group].max_failures_before_disabled {
            Some(cap) if cap > 0 => self.failures[group].load(Ordering::Relaxed) >= cap,
            _ => false,
        }
    }

    /// The response cache, when one is configured.
    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(thread) = self.worker.take() {
            if thread.join().is_err() {
                warn!("Request queue worker panicked during shutdown");
            }
        }
    }
}
