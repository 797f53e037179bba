//! Where decode callbacks run when a request asks to be delivered
//! on the owner's thread.

use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{trace, warn};

/// A unit of callback work.
pub type CallbackJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs callbacks in some designated context (a UI thread, an event loop...).
pub trait CallbackExecutor: Send + Sync {
    fn submit(&self, job: CallbackJob);
}

/// Runs each job immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn submit(&self, job: CallbackJob) {
        job();
    }
}

/// Hands jobs to whichever thread owns the paired [`CallbackPump`].
#[derive(Clone)]
pub struct ChannelExecutor {
    tx: Sender<CallbackJob>,
}

/// Receiving half of a [`ChannelExecutor`], drained by the owner's thread.
pub struct CallbackPump {
    rx: Receiver<CallbackJob>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, CallbackPump) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, CallbackPump { rx })
    }
}

impl CallbackExecutor for ChannelExecutor {
    fn submit(&self, job: CallbackJob) {
        if self.tx.send(job).is_err() {
            warn!("Callback pump dropped, discarding decode callback");
        }
    }
}

impl CallbackPump {
    /// Run every queued job without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "Ran decode callbacks");
        }
        ran
    }

    /// Wait up to `timeout` for the first job, then drain the rest.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.run_pending()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
