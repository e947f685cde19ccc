//! StreamingSupervisor: per-device screenshot loops and the frame cache.
//!
//! Each streaming device gets one tokio task that repeats:
//!
//! ```text
//! capture (bounded) ─► encode ─► cache ─► publish screenshot_frame
//!        │ failure                                        │
//!        └──────────────► publish screenshot_error ───────┤
//!                                                   sleep(interval)
//! ```
//!
//! The loop owns a `CancellationToken` checked before every capture, raced
//! against the capture and the sleep, and checked again before publishing,
//! so a stopped stream emits nothing after `stop` returns.
//!
//! The cache keeps the most recent successful frame per device.  It is only
//! written on success; a failed or timed-out capture leaves the previous
//! frame in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atv_core::{DeviceId, Frame, RemoteError, StreamEvent};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::capture::encoder::FrameEncoder;
use crate::infrastructure::capture::{CaptureError, ScreenCapture};

/// Default number of events buffered per subscriber before it lags.
pub const EVENT_BUFFER: usize = 64;

/// Destination of stream events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: StreamEvent);
}

/// Fans events out to every subscriber.  A subscriber that falls more than
/// the buffer size behind skips the oldest events instead of blocking the
/// stream.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StreamEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

#[async_trait]
impl EventSink for EventBroadcaster {
    async fn publish(&self, event: StreamEvent) {
        if self.sender.send(event).is_err() {
            debug!("stream event dropped: no subscribers");
        }
    }
}

struct Shared {
    capture: Arc<dyn ScreenCapture>,
    encoder: Arc<dyn FrameEncoder>,
    cache: Mutex<HashMap<DeviceId, Frame>>,
    capture_timeout: Duration,
    stream_quality: u8,
}

impl Shared {
    /// One bounded capture, encoded off the runtime threads, cached on
    /// success.
    async fn capture_frame(&self, id: &DeviceId, quality: u8) -> Result<Frame, CaptureError> {
        let png = timeout(self.capture_timeout, self.capture.capture(id))
            .await
            .map_err(|_| CaptureError::Timeout(self.capture_timeout))??;

        let encoder = Arc::clone(&self.encoder);
        let image = tokio::task::spawn_blocking(move || encoder.encode(&png, quality))
            .await
            .map_err(|e| CaptureError::Io(std::io::Error::other(e)))??;

        let frame = Frame::now(image);
        self.cache.lock().await.insert(id.clone(), frame.clone());
        Ok(frame)
    }
}

struct StreamingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamingTask {
    async fn shutdown(self, id: &DeviceId) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(device = %id, "streaming task ended abnormally: {e}");
        }
    }
}

pub struct StreamingSupervisor {
    shared: Arc<Shared>,
    tasks: Mutex<HashMap<DeviceId, StreamingTask>>,
}

impl StreamingSupervisor {
    /// `stream_quality` is the JPEG quality used by streaming loops.
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        encoder: Arc<dyn FrameEncoder>,
        capture_timeout: Duration,
        stream_quality: u8,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                capture,
                encoder,
                cache: Mutex::new(HashMap::new()),
                capture_timeout,
                stream_quality: stream_quality.clamp(1, 100),
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts streaming `id` to `sink`, replacing any running stream for it.
    pub async fn start(&self, id: &DeviceId, sink: Arc<dyn EventSink>, interval: Duration) {
        if self.stop(id).await {
            info!(device = %id, "replacing running stream");
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_stream(
            Arc::clone(&self.shared),
            id.clone(),
            sink,
            interval,
            cancel.clone(),
        ));

        let displaced = self
            .tasks
            .lock()
            .await
            .insert(id.clone(), StreamingTask { cancel, handle });
        if let Some(old) = displaced {
            old.shutdown(id).await;
        }
    }

    /// Cancels the stream for `id` and waits for its task to exit.
    /// Returns `false` when no stream was running.
    pub async fn stop(&self, id: &DeviceId) -> bool {
        let task = self.tasks.lock().await.remove(id);
        match task {
            Some(task) => {
                task.shutdown(id).await;
                info!(device = %id, "stream stopped");
                true
            }
            None => false,
        }
    }

    /// Captures a single frame at `quality`.  Returns `Ok(None)` when the
    /// capture fails; the cache is left untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidQuality`] when `quality` is outside
    /// `1..=100`.
    pub async fn capture_once(&self, id: &DeviceId, quality: u8) -> Result<Option<Frame>, RemoteError> {
        if !(1..=100).contains(&quality) {
            return Err(RemoteError::InvalidQuality(quality));
        }
        match self.shared.capture_frame(id, quality).await {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!(device = %id, "screenshot failed: {e}");
                Ok(None)
            }
        }
    }

    pub async fn cached(&self, id: &DeviceId) -> Option<Frame> {
        self.shared.cache.lock().await.get(id).cloned()
    }

    /// Identifiers with a running stream, sorted.
    pub async fn active_streams(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every stream, then shuts the capture tunnel down.
    pub async fn cleanup(&self) {
        let drained: Vec<_> = self.tasks.lock().await.drain().collect();
        for (id, task) in drained {
            task.shutdown(&id).await;
        }
        self.shared.capture.shutdown().await;
    }
}

async fn run_stream(
    shared: Arc<Shared>,
    id: DeviceId,
    sink: Arc<dyn EventSink>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(device = %id, ?interval, "stream started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = shared.capture_frame(&id, shared.stream_quality) => result,
        };
        if cancel.is_cancelled() {
            break;
        }

        let event = match result {
            Ok(frame) => StreamEvent::frame(&id, &frame),
            Err(e) => {
                debug!(device = %id, "stream capture failed: {e}");
                StreamEvent::error(&id, format!("Failed to capture screenshot: {e}"))
            }
        };
        sink.publish(event).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(device = %id, "stream loop exited");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::encoder::MockFrameEncoder;
    use crate::infrastructure::capture::mock::{CaptureStep, MockCapture};
    use tokio::sync::broadcast::error::TryRecvError;

    fn supervisor_with(capture: &MockCapture, encoder: MockFrameEncoder) -> StreamingSupervisor {
        StreamingSupervisor::new(
            Arc::new(capture.clone()),
            Arc::new(encoder),
            Duration::from_secs(5),
            85,
        )
    }

    fn echo_encoder() -> MockFrameEncoder {
        let mut encoder = MockFrameEncoder::new();
        encoder
            .expect_encode()
            .returning(|png, quality| Ok(format!("jpeg:{}:q{quality}", png.len())));
        encoder
    }

    #[tokio::test]
    async fn test_capture_once_caches_encoded_frame() {
        // Arrange
        let capture = MockCapture::new();
        capture.push(CaptureStep::Png(vec![0; 3]));
        let supervisor = supervisor_with(&capture, echo_encoder());
        let id = DeviceId::from("tv");

        // Act
        let frame = supervisor.capture_once(&id, 40).await.unwrap().unwrap();

        // Assert
        assert_eq!(frame.image, "jpeg:3:q40");
        assert_eq!(supervisor.cached(&id).await, Some(frame));
    }

    #[tokio::test]
    async fn test_capture_once_rejects_out_of_range_quality() {
        let capture = MockCapture::new();
        let supervisor = supervisor_with(&capture, MockFrameEncoder::new());
        let id = DeviceId::from("tv");

        assert_eq!(
            supervisor.capture_once(&id, 0).await,
            Err(RemoteError::InvalidQuality(0))
        );
        assert_eq!(
            supervisor.capture_once(&id, 101).await,
            Err(RemoteError::InvalidQuality(101))
        );
        assert_eq!(capture.capture_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_capture_keeps_previous_frame() {
        let capture = MockCapture::new();
        capture.push(CaptureStep::Png(vec![1]));
        capture.push(CaptureStep::Fail("device locked".to_string()));
        let supervisor = supervisor_with(&capture, echo_encoder());
        let id = DeviceId::from("tv");

        let first = supervisor.capture_once(&id, 85).await.unwrap();
        let second = supervisor.capture_once(&id, 85).await.unwrap();

        assert!(second.is_none());
        assert_eq!(supervisor.cached(&id).await, first);
    }

    #[tokio::test]
    async fn test_encoder_failure_is_not_cached() {
        let capture = MockCapture::new();
        capture.push(CaptureStep::Png(vec![1]));
        let mut encoder = MockFrameEncoder::new();
        encoder.expect_encode().times(1).returning(|_, _| {
            Err(CaptureError::Failed {
                status: "n/a".to_string(),
                stderr: "corrupt".to_string(),
            })
        });
        let supervisor = supervisor_with(&capture, encoder);
        let id = DeviceId::from("tv");

        assert_eq!(supervisor.capture_once(&id, 85).await, Ok(None));
        assert_eq!(supervisor.cached(&id).await, None);
    }

    #[tokio::test]
    async fn test_stream_publishes_frames_and_errors_then_stops() {
        // Arrange
        let capture = MockCapture::new();
        capture.push(CaptureStep::Png(vec![1, 2]));
        capture.push(CaptureStep::Fail("boom".to_string()));
        capture.always(CaptureStep::Png(vec![3]));
        let supervisor = supervisor_with(&capture, echo_encoder());
        let broadcaster = EventBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        let id = DeviceId::from("tv");

        // Act
        supervisor
            .start(&id, Arc::new(broadcaster.clone()), Duration::from_millis(5))
            .await;
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(supervisor.stop(&id).await);

        // Assert
        assert!(matches!(first, StreamEvent::ScreenshotFrame { ref image, .. } if image == "jpeg:2:q85"));
        assert!(matches!(second, StreamEvent::ScreenshotError { .. }));
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(supervisor.active_streams().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_stream_returns_false() {
        let capture = MockCapture::new();
        let supervisor = supervisor_with(&capture, MockFrameEncoder::new());
        assert!(!supervisor.stop(&DeviceId::from("tv")).await);
    }

    #[tokio::test]
    async fn test_cleanup_stops_streams_and_shuts_down_capture() {
        let capture = MockCapture::new();
        capture.always(CaptureStep::Fail("idle".to_string()));
        let supervisor = supervisor_with(&capture, MockFrameEncoder::new());
        let sink = Arc::new(EventBroadcaster::default());
        for name in ["a", "b"] {
            supervisor
                .start(&DeviceId::from(name), sink.clone(), Duration::from_millis(5))
                .await;
        }

        supervisor.cleanup().await;

        assert!(supervisor.active_streams().await.is_empty());
        assert_eq!(capture.shutdowns(), 1);
    }

    #[test]
    fn test_publish_without_subscribers_completes_immediately() {
        let broadcaster = EventBroadcaster::new(1);
        let event = StreamEvent::error(&DeviceId::from("tv"), "nobody listening");

        let mut publish = tokio_test::task::spawn(broadcaster.publish(event));

        tokio_test::assert_ready!(publish.poll());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_lags_instead_of_blocking() {
        // Arrange
        let broadcaster = EventBroadcaster::new(2);
        let mut rx = broadcaster.subscribe();
        let id = DeviceId::from("tv");

        // Act: publish more than the buffer holds without reading.
        for n in 0..3 {
            let mut publish =
                tokio_test::task::spawn(broadcaster.publish(StreamEvent::error(&id, format!("{n}"))));
            tokio_test::assert_ready!(publish.poll());
        }

        // Assert
        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(1)));
        assert_eq!(rx.try_recv(), Ok(StreamEvent::error(&id, "1")));
    }
}
