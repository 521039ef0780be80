use crate::error::{Error, Result};
use crate::models::StreamConfig;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Frames buffered per subscriber before a slow client starts skipping.
const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Callback-style camera capability.
///
/// Each lifecycle method receives a [`Completion`] that the driver must
/// resolve exactly once, either from within the call or later from a
/// worker of its own. Frames are pushed into the [`FrameSink`] handed to
/// [`CameraDriver::start`].
pub trait CameraDriver: Send + 'static {
    fn start(&mut self, config: &StreamConfig, frames: FrameSink, ready: Completion);
    fn pause(&mut self, done: Completion);
    fn resume(&mut self, done: Completion);
    fn stop(&mut self, done: Completion);
}

/// One-shot completion signal for a camera operation.
pub struct Completion {
    tx: oneshot::Sender<Result<()>>,
}

impl Completion {
    pub(crate) fn new() -> (Self, PendingOperation) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, PendingOperation { rx })
    }

    pub fn succeed(self) {
        let _ = self.tx.send(Ok(()));
    }

    pub fn fail(self, reason: impl std::fmt::Display) {
        let _ = self.tx.send(Err(Error::CameraError(reason.to_string())));
    }

    pub fn complete(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}

/// Receiving half of a [`Completion`].
pub(crate) struct PendingOperation {
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingOperation {
    /// Waits for the driver's completion, bounded by `timeout` when set.
    pub(crate) async fn wait(self, operation: &'static str, timeout: Option<Duration>) -> Result<()> {
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| Error::Timeout(operation, limit))?,
            None => self.rx.await,
        };
        outcome.map_err(|_| {
            Error::CameraError(format!("driver dropped the {} completion", operation))
        })?
    }
}

/// Shared frame event source. Cloning yields another handle to the same
/// channel; every subscriber sees every frame sent after it subscribed.
#[derive(Clone)]
pub struct FrameSource {
    tx: broadcast::Sender<Bytes>,
    emitted: Arc<AtomicU64>,
}

impl FrameSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            tx,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            source: self.clone(),
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle given to a camera driver.
#[derive(Clone)]
pub struct FrameSink {
    source: FrameSource,
}

impl FrameSink {
    /// Publishes one encoded frame; returns how many subscribers got it.
    pub fn push(&self, frame: impl Into<Bytes>) -> usize {
        self.source.emitted.fetch_add(1, Ordering::Relaxed);
        self.source.tx.send(frame.into()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_resolves_once() {
        let (done, pending) = Completion::new();
        done.succeed();
        assert!(pending.wait("start", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_completion_failure_is_camera_error() {
        let (done, pending) = Completion::new();
        done.fail("sensor unplugged");
        let err = pending.wait("pause", None).await.unwrap_err();
        assert!(err.is_camera());
        assert!(err.to_string().contains("sensor unplugged"));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_camera_error() {
        let (done, pending) = Completion::new();
        drop(done);
        assert!(pending.wait("stop", None).await.unwrap_err().is_camera());
    }

    #[tokio::test]
    async fn test_pending_times_out() {
        let (_done, pending) = Completion::new();
        let err = pending
            .wait("resume", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout("resume", _)));
    }

    #[tokio::test]
    async fn test_sink_fans_out_to_subscribers() {
        let source = FrameSource::new();
        let mut a = source.subscribe();
        let mut b = source.subscribe();
        let sink = source.sink();

        assert_eq!(sink.push(vec![1u8, 2, 3]), 2);
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(source.frames_emitted(), 1);
    }

    #[test]
    fn test_push_without_subscribers() {
        let source = FrameSource::new();
        assert_eq!(source.sink().push(Bytes::from_static(b"x")), 0);
        assert_eq!(source.subscriber_count(), 0);
    }
}
