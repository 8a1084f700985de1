//! The I/O worker.
//!
//! A single actor loop on the `courier-io` thread: it owns per-group pending
//! queues and running transfers, multiplexes them on a current-thread
//! runtime, and reports every outcome back through the pump. It is the only
//! code that touches the transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheEntry, ResponseCache};
use crate::error::TransferError;
use crate::message::{GroupId, MessageId, MessageShared, Request, TransferResult, TransferState};
use crate::queue::PumpState;
use crate::transfer::{Transfer, TransferOutcome};
use crate::transport::Transport;

/// How often the worker runs the cache eviction sweep. The interval's first
/// tick fires immediately, so a sweep also runs at startup.
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

pub(crate) enum Command {
    Submit(Box<Job>),
    Abort { group: GroupId, id: MessageId },
    AbortTag { group: GroupId, tag: String },
    Shutdown,
}

pub(crate) struct Job {
    pub id: MessageId,
    pub group: GroupId,
    pub request: Request,
    pub shared: Arc<MessageShared>,
    /// Stale cache entry to revalidate, when one exists.
    pub cached: Option<CacheEntry>,
}

struct RunningTransfer {
    token: CancellationToken,
    tag: String,
}

struct WorkerGroup {
    max_concurrent: usize,
    pending: VecDeque<Box<Job>>,
    running: HashMap<MessageId, RunningTransfer>,
}

struct Reaped {
    group: GroupId,
    id: MessageId,
    outcome: TransferOutcome,
}

pub(crate) struct Worker {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<ResponseCache>>,
    groups: Vec<WorkerGroup>,
    failures: Arc<Vec<AtomicU32>>,
    pump: Arc<PumpState>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        cache: Option<Arc<ResponseCache>>,
        concurrency: Vec<usize>,
        failures: Arc<Vec<AtomicU32>>,
        pump: Arc<PumpState>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let groups = concurrency
            .into_iter()
            .map(|max_concurrent| WorkerGroup {
                max_concurrent,
                pending: VecDeque::new(),
                running: HashMap::new(),
            })
            .collect();
        Self {
            transport,
            cache,
            groups,
            failures,
            pump,
            rx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Request queue worker started");

        let mut cleanup = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut active: FuturesUnordered<LocalBoxFuture<'static, Reaped>> =
            FuturesUnordered::new();
        let mut shutting_down = false;

        loop {
            if !shutting_down {
                self.start_pending(&mut active);
            }

            tokio::select! {
                biased;

                command = self.rx.recv() => match command {
                    Some(Command::Submit(job)) => {
                        if shutting_down {
                            self.pump.complete(
                                job.group,
                                job.id,
                                TransferResult::failure(TransferError::Aborted),
                            );
                        } else {
                            self.groups[job.group].pending.push_back(job);
                        }
                    }
                    Some(Command::Abort { group, id }) => self.handle_abort(group, id),
                    Some(Command::AbortTag { group, tag }) => self.handle_abort_tag(group, &tag),
                    Some(Command::Shutdown) | None => {
                        shutting_down = true;
                        self.shutdown();
                    }
                },

                Some(reaped) = active.next(), if !active.is_empty() => {
                    self.reap(reaped);
                }

                _ = cleanup.tick(), if self.cache.is_some() => {
                    if let Some(cache) = &self.cache {
                        cache.cleanup();
                    }
                }
            }

            if shutting_down && active.is_empty() {
                break;
            }
        }

        info!("Request queue worker stopped");
    }

    /// Move pending jobs into flight, in group order, up to each group's
    /// concurrency cap.
    fn start_pending(&mut self, active: &mut FuturesUnordered<LocalBoxFuture<'static, Reaped>>) {
        for group_index in 0..self.groups.len() {
            loop {
                let group = &mut self.groups[group_index];
                if group.running.len() >= group.max_concurrent {
                    break;
                }
                let Some(job) = group.pending.pop_front() else {
                    break;
                };

                // Aborted while still queued: finalize without ever touching
                // the network.
                if job.shared.abort_requested() {
                    self.pump.complete(
                        job.group,
                        job.id,
                        TransferResult::failure(TransferError::Aborted),
                    );
                    continue;
                }

                let token = CancellationToken::new();
                group.running.insert(
                    job.id,
                    RunningTransfer {
                        token: token.clone(),
                        tag: job.shared.tag.clone(),
                    },
                );

                let transport = Arc::clone(&self.transport);
                let cache = self.cache.clone();
                let pump = Arc::clone(&self.pump);
                active.push(
                    async move {
                        let Job {
                            id,
                            group,
                            request,
                            shared: _,
                            cached,
                        } = *job;
                        pump.note(group, id, TransferState::Connecting, 0, 0);
                        let transfer =
                            Transfer::new(id, group, request, cached, Arc::clone(&pump));
                        let outcome = tokio::select! {
                            biased;
                            _ = token.cancelled() => TransferOutcome::aborted(),
                            outcome = transfer.run(transport.as_ref(), cache.as_deref()) => outcome,
                        };
                        Reaped { group, id, outcome }
                    }
                    .boxed_local(),
                );
            }
        }
    }

    fn reap(&mut self, reaped: Reaped) {
        let Reaped { group, id, outcome } = reaped;
        if let Some(worker_group) = self.groups.get_mut(group) {
            worker_group.running.remove(&id);
        }
        if !outcome.result.success && outcome.counts_as_failure {
            let failures = self.failures[group].fetch_add(1, Ordering::Relaxed) + 1;
            debug!(group, failures, "Transfer counted against the failure budget");
        }
        self.pump.complete(group, id, outcome.result);
    }

    fn handle_abort(&mut self, group_index: GroupId, id: MessageId) {
        let Some(group) = self.groups.get_mut(group_index) else {
            return;
        };
        if let Some(position) = group.pending.iter().position(|job| job.id == id) {
            if let Some(job) = group.pending.remove(position) {
                self.pump.complete(
                    job.group,
                    job.id,
                    TransferResult::failure(TransferError::Aborted),
                );
            }
            return;
        }
        // Running (or already finished): cancelling a finished transfer is a
        // no-op because the pump ignores a second completion.
        if let Some(running) = group.running.get(&id) {
            running.token.cancel();
        }
    }

    fn handle_abort_tag(&mut self, group_index: GroupId, tag: &str) {
        let Some(group) = self.groups.get_mut(group_index) else {
            return;
        };

        let mut kept = VecDeque::with_capacity(group.pending.len());
        let mut aborted = Vec::new();
        while let Some(job) = group.pending.pop_front() {
            if job.shared.tag == tag {
                job.shared.request_abort();
                aborted.push((job.group, job.id));
            } else {
                kept.push_back(job);
            }
        }
        group.pending = kept;

        for running in group.running.values() {
            if running.tag == tag {
                running.token.cancel();
            }
        }

        for (group, id) in aborted {
            self.pump
                .complete(group, id, TransferResult::failure(TransferError::Aborted));
        }
    }

    /// Drop every queued job and cancel everything in flight.
    fn shutdown(&mut self) {
        debug!("Request queue worker shutting down");
        for group in &mut self.groups {
            while let Some(job) = group.pending.pop_front() {
                self.pump.complete(
                    job.group,
                    job.id,
                    TransferResult::failure(TransferError::Aborted),
                );
            }
            for running in group.running.values() {
                running.token.cancel();
            }
        }
    }
}
