//! Integration tests for screenshot capture and streaming.
//!
//! A scripted [`MockCapture`] stands in for the capture tool; frames go
//! through the real [`JpegFrameEncoder`].  These verify:
//!
//! - Captured frames are downscaled and re-encoded as base64 JPEG.
//! - The cache only ever moves forward: failures and timeouts leave the last
//!   good frame in place.
//! - At most one streaming loop runs per device; starting again replaces it.
//! - Capture failures inside a stream become error events and the loop keeps
//!   running.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use atv_core::{DeviceId, StreamEvent};
use atv_remote::application::stream_screens::{EventBroadcaster, StreamingSupervisor};
use atv_remote::infrastructure::capture::encoder::JpegFrameEncoder;
use atv_remote::infrastructure::capture::mock::{CaptureStep, MockCapture};
use atv_remote::infrastructure::device::mock::MockTransport;
use atv_remote::infrastructure::service::RemoteService;
use atv_remote::infrastructure::storage::config::AppConfig;
use atv_remote::infrastructure::storage::credentials::CredentialStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::sync::broadcast;

/// A solid-colour PNG of the given size.
fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 90, 200])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn supervisor(capture: &MockCapture, capture_timeout: Duration) -> StreamingSupervisor {
    StreamingSupervisor::new(
        Arc::new(capture.clone()),
        Arc::new(JpegFrameEncoder::new(800)),
        capture_timeout,
        85,
    )
}

fn service(capture: &MockCapture) -> (tempfile::TempDir, RemoteService) {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::open(dir.path().join("credentials.json"), None);
    let service = RemoteService::new(
        AppConfig::default(),
        store,
        Arc::new(MockTransport::new()),
        Arc::new(capture.clone()),
        Arc::new(JpegFrameEncoder::new(800)),
    );
    (dir, service)
}

async fn next_event(rx: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no event within 10s")
        .expect("event channel closed")
}

// ── Single captures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_screenshot_is_downscaled_jpeg() {
    // Arrange
    let capture = MockCapture::new();
    capture.push(CaptureStep::Png(png(1920, 1080)));
    let (_dir, service) = service(&capture);
    let id = DeviceId::from("living-room");

    // Act
    let result = service.capture_screenshot(&id, Some(70)).await;

    // Assert
    assert!(result.success, "capture failed: {:?}", result.error);
    let shot = result.data.unwrap();
    assert_eq!(shot.device_id, id);
    let jpeg = BASE64.decode(&shot.image).unwrap();
    assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (800, 450));

    let cached = service.cached_screenshot(&id).await.data.unwrap();
    assert_eq!(cached, shot);
}

#[tokio::test]
async fn test_screenshot_rejects_out_of_range_quality() {
    let capture = MockCapture::new();
    let (_dir, service) = service(&capture);

    let result = service.capture_screenshot(&DeviceId::from("tv"), Some(0)).await;

    assert_eq!(
        result.error.as_deref(),
        Some("quality must be between 1 and 100, got 0")
    );
    assert_eq!(capture.capture_count(), 0);
}

#[tokio::test]
async fn test_screenshot_reports_missing_capture_tool() {
    let capture = MockCapture::new();
    capture.set_available(false);
    let (_dir, service) = service(&capture);

    let result = service.capture_screenshot(&DeviceId::from("tv"), None).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("unavailable"));
    assert_eq!(capture.capture_count(), 0);
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_capture_timeout_leaves_cached_frame_unchanged() {
    // Arrange: one good frame, then a capture that never answers.
    let capture = MockCapture::new();
    capture.push(CaptureStep::Png(png(64, 36)));
    capture.push(CaptureStep::Hang);
    let supervisor = supervisor(&capture, Duration::from_millis(100));
    let id = DeviceId::from("tv");
    let good = supervisor.capture_once(&id, 85).await.unwrap().unwrap();

    // Act
    let timed_out = supervisor.capture_once(&id, 85).await.unwrap();

    // Assert
    assert_eq!(timed_out, None);
    assert_eq!(supervisor.cached(&id).await, Some(good));
}

#[tokio::test]
async fn test_cache_only_moves_forward() {
    let capture = MockCapture::new();
    capture.push(CaptureStep::Png(png(64, 36)));
    capture.push(CaptureStep::Fail("device locked".to_string()));
    capture.push(CaptureStep::Png(png(64, 36)));
    let supervisor = supervisor(&capture, Duration::from_secs(5));
    let id = DeviceId::from("tv");

    let first = supervisor.capture_once(&id, 85).await.unwrap().unwrap();
    assert_eq!(supervisor.capture_once(&id, 85).await.unwrap(), None);
    assert_eq!(supervisor.cached(&id).await.as_ref(), Some(&first));
    let second = supervisor.capture_once(&id, 85).await.unwrap().unwrap();

    assert!(second.captured_at >= first.captured_at);
    assert_eq!(supervisor.cached(&id).await, Some(second));
}

#[tokio::test]
async fn test_cache_is_per_device() {
    let capture = MockCapture::new();
    capture.push(CaptureStep::Png(png(64, 36)));
    let supervisor = supervisor(&capture, Duration::from_secs(5));

    supervisor.capture_once(&DeviceId::from("tv"), 85).await.unwrap();

    assert!(supervisor.cached(&DeviceId::from("tv")).await.is_some());
    assert_eq!(supervisor.cached(&DeviceId::from("bedroom")).await, None);
}

// ── Streaming ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restarting_stream_replaces_running_loop() {
    // Arrange
    let capture = MockCapture::new();
    capture.always(CaptureStep::Png(png(64, 36)));
    let supervisor = supervisor(&capture, Duration::from_secs(5));
    let events = EventBroadcaster::new(16);
    let mut rx = events.subscribe();
    let id = DeviceId::from("tv");

    // Act
    supervisor.start(&id, Arc::new(events.clone()), Duration::from_millis(20)).await;
    supervisor.start(&id, Arc::new(events.clone()), Duration::from_millis(20)).await;

    // Assert: one loop, still producing frames.
    assert_eq!(supervisor.active_streams().await, vec![id.clone()]);
    assert!(matches!(next_event(&mut rx).await, StreamEvent::ScreenshotFrame { .. }));

    // Stopping ends capture activity for good.
    assert!(supervisor.stop(&id).await);
    assert!(supervisor.active_streams().await.is_empty());
    let after_stop = capture.capture_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(capture.capture_count(), after_stop);
    assert!(!supervisor.stop(&id).await);
}

#[tokio::test]
async fn test_stream_reports_failures_and_keeps_running() {
    let capture = MockCapture::new();
    capture.always(CaptureStep::Fail("no device".to_string()));
    let supervisor = supervisor(&capture, Duration::from_secs(5));
    let events = EventBroadcaster::new(16);
    let mut rx = events.subscribe();
    let id = DeviceId::from("tv");

    supervisor.start(&id, Arc::new(events.clone()), Duration::from_millis(10)).await;

    for _ in 0..2 {
        match next_event(&mut rx).await {
            StreamEvent::ScreenshotError { device_id, message } => {
                assert_eq!(device_id, id);
                assert!(message.starts_with("Failed to capture screenshot"));
            }
            other => panic!("expected an error event, got {other:?}"),
        }
    }
    assert_eq!(supervisor.cached(&id).await, None);
    supervisor.cleanup().await;
}

#[tokio::test]
async fn test_stream_keeps_last_frame_through_failure_and_timeout() {
    // Arrange: a good frame, then a failure, then a capture that never answers.
    let capture = MockCapture::new();
    capture.push(CaptureStep::Png(png(64, 36)));
    capture.push(CaptureStep::Fail("device locked".to_string()));
    capture.push(CaptureStep::Hang);
    let supervisor = supervisor(&capture, Duration::from_millis(200));
    let events = EventBroadcaster::new(16);
    let mut rx = events.subscribe();
    let id = DeviceId::from("tv");

    // Act
    supervisor.start(&id, Arc::new(events.clone()), Duration::from_millis(10)).await;
    let streamed = match next_event(&mut rx).await {
        StreamEvent::ScreenshotFrame { image, .. } => image,
        other => panic!("expected a frame event, got {other:?}"),
    };
    let failed = next_event(&mut rx).await;
    let timed_out = next_event(&mut rx).await;

    // Assert
    for event in [failed, timed_out] {
        assert!(matches!(event, StreamEvent::ScreenshotError { .. }), "got {event:?}");
    }
    assert_eq!(supervisor.cached(&id).await.unwrap().image, streamed);
    assert!(supervisor.stop(&id).await);
}

#[tokio::test]
async fn test_service_stream_reaches_subscribers_and_shuts_down() {
    // Arrange
    let capture = MockCapture::new();
    capture.always(CaptureStep::Png(png(64, 36)));
    let (_dir, service) = service(&capture);
    let mut rx = service.subscribe();
    let id = DeviceId::from("tv");

    // Act
    assert!(service.start_stream(&id, Some(Duration::from_millis(20))).await.success);
    let event = next_event(&mut rx).await;

    // Assert
    assert_eq!(event.device_id(), &id);
    assert!(event.to_json().contains("\"screenshot_frame\""));
    assert!(service.cached_screenshot(&id).await.success);

    service.shutdown().await;
    assert_eq!(capture.shutdowns(), 1);
    assert!(service.stop_stream(&id).await.success);
}
