//! Progress and batch notifications for batch resolution

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::error;

use crate::version::error::SinkError;
use crate::version::types::ResolvedPackage;

/// Receiver of resolution notifications.
///
/// Both callbacks are optional. A callback that returns an error or panics is
/// disabled for the rest of the batch call; resolution itself continues.
pub trait ResolveSink: Send + Sync {
    /// Called once per requested name after its result is available.
    fn on_progress(
        &self,
        _package_name: &str,
        _completed: usize,
        _total: usize,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called with buffered results, see [`BATCH_SIZE`](crate::config::BATCH_SIZE).
    fn on_batch_ready(&self, _batch: Vec<ResolvedPackage>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ResolveSink for NoopSink {}

/// Notification forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveEvent {
    Progress {
        package_name: String,
        completed: usize,
        total: usize,
    },
    BatchReady(Vec<ResolvedPackage>),
}

/// Sink that forwards notifications into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<ResolveEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<ResolveEvent>) -> Self {
        Self { sender }
    }
}

impl ResolveSink for ChannelSink {
    fn on_progress(
        &self,
        package_name: &str,
        completed: usize,
        total: usize,
    ) -> Result<(), SinkError> {
        self.sender
            .send(ResolveEvent::Progress {
                package_name: package_name.to_string(),
                completed,
                total,
            })
            .map_err(|_| SinkError::Closed)
    }

    fn on_batch_ready(&self, batch: Vec<ResolvedPackage>) -> Result<(), SinkError> {
        self.sender
            .send(ResolveEvent::BatchReady(batch))
            .map_err(|_| SinkError::Closed)
    }
}

/// Wraps a caller's sink for the duration of one batch call, disabling each
/// callback independently after its first failure.
pub(crate) struct GuardedSink<'a> {
    inner: &'a dyn ResolveSink,
    progress_enabled: AtomicBool,
    batch_enabled: AtomicBool,
}

impl<'a> GuardedSink<'a> {
    pub(crate) fn new(inner: &'a dyn ResolveSink) -> Self {
        Self {
            inner,
            progress_enabled: AtomicBool::new(true),
            batch_enabled: AtomicBool::new(true),
        }
    }

    pub(crate) fn progress(&self, package_name: &str, completed: usize, total: usize) {
        if !self.progress_enabled.load(Ordering::Relaxed) {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_progress(package_name, completed, total)
        }));
        if let Some(reason) = failure_reason(result) {
            error!("Progress callback failed, disabling it: {}", reason);
            self.progress_enabled.store(false, Ordering::Relaxed);
        }
    }

    pub(crate) fn batch_ready(&self, batch: Vec<ResolvedPackage>) {
        if batch.is_empty() || !self.batch_enabled.load(Ordering::Relaxed) {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| self.inner.on_batch_ready(batch)));
        if let Some(reason) = failure_reason(result) {
            error!("Batch callback failed, disabling it: {}", reason);
            self.batch_enabled.store(false, Ordering::Relaxed);
        }
    }
}

fn failure_reason(result: std::thread::Result<Result<(), SinkError>>) -> Option<String> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(
            panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string()),
        ),
    }
}

/// Buffers results until `size` items are pending or `idle` has elapsed since
/// the first pending item.
pub(crate) struct Batcher {
    size: usize,
    idle: Duration,
    pending: Vec<ResolvedPackage>,
    deadline: Option<Instant>,
}

impl Batcher {
    pub(crate) fn new(size: usize, idle: Duration) -> Self {
        Self {
            size: size.max(1),
            idle,
            pending: Vec::new(),
            deadline: None,
        }
    }

    /// Add a result, returning a full batch when the size limit is reached.
    pub(crate) fn push(&mut self, item: ResolvedPackage) -> Option<Vec<ResolvedPackage>> {
        if self.pending.is_empty() {
            self.deadline = Some(Instant::now() + self.idle);
        }
        self.pending.push(item);

        if self.pending.len() >= self.size {
            Some(self.take())
        } else {
            None
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn take(&mut self) -> Vec<ResolvedPackage> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }
}
