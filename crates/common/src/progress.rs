//! Byte-count progress reporting for non-interactive destinations
//!
//! A [`ProgressMeter`] wraps the reader of a transfer in a [`CountingReader`]
//! and runs a detached interval task that reports the fraction transferred.
//! The task is stopped through a watch channel when the transfer ends, so no
//! report is ever emitted after completion.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default interval between two progress reports
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// A point-in-time view of a transfer's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Set on the last report, after the transfer ended
    pub done: bool,
}

impl ProgressSnapshot {
    /// Transferred fraction in `[0, 1]`; an empty transfer counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64).min(1.0)
    }
}

/// Destination for progress reports
pub trait ProgressSink: Send + Sync + 'static {
    fn report(&self, snapshot: ProgressSnapshot);
}

/// Emits each report as a `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&self, snapshot: ProgressSnapshot) {
        tracing::info!(
            transferred = snapshot.transferred_bytes,
            total = snapshot.total_bytes,
            percent = format!("{:.1}", snapshot.fraction() * 100.0),
            done = snapshot.done,
            "progress"
        );
    }
}

#[derive(Debug)]
struct ProgressState {
    total_bytes: u64,
    transferred_bytes: AtomicU64,
}

impl ProgressState {
    fn snapshot(&self, done: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            total_bytes: self.total_bytes,
            transferred_bytes: self.transferred_bytes.load(Ordering::Acquire),
            done,
        }
    }
}

/// Reader adapter that adds every byte it yields to a shared counter
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    state: Arc<ProgressState>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = (buf.filled().len() - before) as u64;
            self.state
                .transferred_bytes
                .fetch_add(read, Ordering::AcqRel);
        }
        poll
    }
}

/// Periodic reporter for one transfer
pub struct ProgressMeter {
    state: Arc<ProgressState>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressMeter {
    /// Start reporting on a transfer of `total_bytes`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(total_bytes: u64, interval: Duration, sink: Arc<dyn ProgressSink>) -> Self {
        let state = Arc::new(ProgressState {
            total_bytes,
            transferred_bytes: AtomicU64::new(0),
        });
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task_state = state.clone();
        let task_sink = sink.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        task_sink.report(task_state.snapshot(false));
                    }
                }
            }
        });

        Self {
            state,
            stop_tx,
            handle,
            sink,
        }
    }

    /// Wrap the transfer's reader so its bytes are counted.
    pub fn wrap<R>(&self, reader: R) -> CountingReader<R> {
        CountingReader {
            inner: reader,
            state: self.state.clone(),
        }
    }

    /// Current count, without stopping the meter.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot(false)
    }

    /// Stop the reporting task and emit one final report.
    ///
    /// Safe to call whether or not the task is still running.
    pub async fn finish(self) -> ProgressSnapshot {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::debug!("progress task ended abnormally: {}", e);
        }
        let last = self.state.snapshot(true);
        self.sink.report(last);
        last
    }
}
