//! Decode worker queue.
//!
//! - Bounded worker pool pulling from one FIFO of pending requests
//! - Requests are deduplicated by item identity, never by index
//! - Pending requests can be promoted to the front or cancelled
//! - Results are delivered inline on the worker or through a `CallbackExecutor`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use super::decoder::ThumbnailDecoder;
use super::executor::{CallbackExecutor, InlineExecutor};
use crate::error::GridError;
use crate::models::ItemRef;
use crate::tiles::raster::RasterTile;

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 1;

/// Maximum number of worker threads.
pub const MAX_WORKERS: usize = 4;

/// Completion callback; receives `None` when the decode failed.
pub type DecodeCallback = Box<dyn FnOnce(Option<RasterTile>) + Send + 'static>;

/// What `request_decode` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Appended (or prepended) as a new pending request.
    Queued,
    /// Replaced an existing pending request for the item and moved it to the front.
    Promoted,
    /// A request for the item is already pending; this callback was dropped.
    AlreadyPending,
    /// The item is being decoded right now; this callback was dropped.
    InFlight,
}

impl RequestOutcome {
    /// Whether the supplied callback will eventually be invoked.
    pub fn accepted(self) -> bool {
        matches!(self, RequestOutcome::Queued | RequestOutcome::Promoted)
    }
}

struct WorkItem {
    item: ItemRef,
    tag: usize,
    callback: DecodeCallback,
    deliver_async: bool,
}

impl WorkItem {
    fn is_for(&self, item: &ItemRef) -> bool {
        Arc::ptr_eq(&self.item, item)
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    in_flight: Vec<ItemRef>,
    done: bool,
}

impl QueueState {
    fn pending_position(&self, item: &ItemRef) -> Option<usize> {
        self.pending.iter().position(|w| w.is_for(item))
    }

    fn is_in_flight(&self, item: &ItemRef) -> bool {
        self.in_flight.iter().any(|i| Arc::ptr_eq(i, item))
    }
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    decoder: Arc<dyn ThumbnailDecoder>,
    executor: Arc<dyn CallbackExecutor>,
    /// Bumped on every stop; marshaled callbacks from an older run are dropped.
    generation: AtomicU64,
    active: AtomicUsize,
}

/// Worker queue decoding thumbnails off the caller's thread.
pub struct DecodeQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DecodeQueue {
    /// Create a stopped queue. Callbacks requested with `deliver_async` run on
    /// `executor`.
    pub fn new(decoder: Arc<dyn ThumbnailDecoder>, executor: Arc<dyn CallbackExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                available: Condvar::new(),
                decoder,
                executor,
                generation: AtomicU64::new(0),
                active: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `thread_count` workers. No-op if the queue is already running.
    pub fn start(&self, thread_count: usize) -> Result<(), GridError> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        let num_workers = thread_count.clamp(1, MAX_WORKERS);
        self.shared.state.lock().done = false;

        for worker_id in 0..num_workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("decode-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    error!(worker_id, error = ?source, "Failed to spawn decode worker");
                    drop(workers);
                    self.stop();
                    return Err(GridError::Spawn {
                        name: format!("decode-worker-{}", worker_id),
                        source,
                    });
                }
            }
        }

        debug!(num_workers, "Started decode worker queue");
        Ok(())
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Pending requests are kept and will be served after the next `start`.
    /// No callback fires once this returns.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();

        {
            let mut state = self.shared.state.lock();
            state.done = true;
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.available.notify_all();
        }

        if workers.is_empty() {
            return;
        }

        debug!("Stopping decode worker queue");
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("Decode worker panicked");
            }
        }
        debug!("Decode worker queue stopped");
    }

    /// Ask for `item` to be decoded; `callback` gets the result.
    ///
    /// Never blocks on decode work. If the item is already in flight, or
    /// already pending without `priority_front`, the new callback is dropped.
    pub fn request_decode(
        &self,
        item: ItemRef,
        tag: usize,
        callback: DecodeCallback,
        priority_front: bool,
        deliver_async: bool,
    ) -> RequestOutcome {
        let mut state = self.shared.state.lock();

        if state.is_in_flight(&item) {
            trace!(path = ?item.path, tag, "Request already in flight");
            return RequestOutcome::InFlight;
        }

        let work = WorkItem {
            item,
            tag,
            callback,
            deliver_async,
        };

        match state.pending_position(&work.item) {
            Some(pos) if priority_front => {
                state.pending.remove(pos);
                state.pending.push_front(work);
                RequestOutcome::Promoted
            }
            Some(_) => RequestOutcome::AlreadyPending,
            None => {
                if priority_front {
                    state.pending.push_front(work);
                } else {
                    state.pending.push_back(work);
                }
                self.shared.available.notify_all();
                RequestOutcome::Queued
            }
        }
    }

    /// Move a pending request for `item` to the front. Returns whether one existed.
    pub fn promote(&self, item: &ItemRef) -> bool {
        let mut state = self.shared.state.lock();
        match state.pending_position(item) {
            Some(pos) => {
                if let Some(work) = state.pending.remove(pos) {
                    state.pending.push_front(work);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a pending request for `item`.
    ///
    /// Returns false if there was none or it is already being decoded; an
    /// in-flight decode still completes and fires its callback.
    pub fn cancel(&self, item: &ItemRef) -> bool {
        let mut state = self.shared.state.lock();
        match state.pending_position(item) {
            Some(pos) => {
                state.pending.remove(pos);
                trace!(path = ?item.path, "Cancelled pending decode");
                true
            }
            None => false,
        }
    }

    /// Drop every pending request. In-flight decodes are unaffected.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if dropped > 0 {
            debug!(dropped, "Cancelled all pending decode requests");
        }
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Number of workers currently decoding.
    pub fn active_worker_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Check if there is work pending or in progress.
    pub fn is_busy(&self) -> bool {
        let state = self.shared.state.lock();
        !state.pending.is_empty() || !state.in_flight.is_empty()
    }
}

impl Drop for DecodeQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker_id, "Decode worker started");

    loop {
        let work = {
            let mut state = shared.state.lock();
            loop {
                if state.done {
                    debug!(worker_id, "Decode worker stopped");
                    return;
                }
                if let Some(work) = state.pending.pop_front() {
                    state.in_flight.push(Arc::clone(&work.item));
                    break work;
                }
                shared.available.wait(&mut state);
            }
        };

        let generation = shared.generation.load(Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::Relaxed);

        trace!(worker_id, path = ?work.item.path, tag = work.tag, "Decoding");
        let result = match shared.decoder.decode(&work.item) {
            Ok(raster) => Some(raster),
            Err(e) => {
                warn!(path = ?work.item.path, error = %e, "Failed to decode thumbnail");
                None
            }
        };

        shared.active.fetch_sub(1, Ordering::Relaxed);

        let done = {
            let mut state = shared.state.lock();
            state.in_flight.retain(|i| !Arc::ptr_eq(i, &work.item));
            state.done
        };
        if done {
            debug!(worker_id, "Decode worker stopped");
            return;
        }

        let WorkItem {
            callback,
            deliver_async,
            ..
        } = work;

        if deliver_async {
            let shared_gen = Arc::clone(&shared);
            shared.executor.submit(Box::new(move || {
                if shared_gen.generation.load(Ordering::SeqCst) == generation {
                    callback(result);
                } else {
                    trace!("Dropping decode callback from a stopped run");
                }
            }));
        } else {
            callback(result);
        }
    }
}

/// Builder for DecodeQueue with configuration options.
pub struct DecodeQueueBuilder {
    workers: usize,
    executor: Option<Arc<dyn CallbackExecutor>>,
}

impl DecodeQueueBuilder {
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            executor: None,
        }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build and start the queue.
    pub fn build(self, decoder: Arc<dyn ThumbnailDecoder>) -> Result<DecodeQueue, GridError> {
        let executor = self.executor.unwrap_or_else(|| Arc::new(InlineExecutor));
        let queue = DecodeQueue::new(decoder, executor);
        queue.start(self.workers)?;
        Ok(queue)
    }
}

impl Default for DecodeQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
