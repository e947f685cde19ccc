//! Scripted screen capture for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atv_core::DeviceId;

use super::{CaptureError, ScreenCapture};

/// One scripted capture outcome.
#[derive(Debug, Clone)]
pub enum CaptureStep {
    Png(Vec<u8>),
    Fail(String),
    /// Never completes within any realistic capture timeout.
    Hang,
}

#[derive(Default)]
struct MockCaptureState {
    /// Consumed front to back; once empty, `fallback` answers.
    script: VecDeque<CaptureStep>,
    fallback: Option<CaptureStep>,
    delay: Option<Duration>,
    available: bool,
    captures: u32,
    channel_pairs: Vec<DeviceId>,
    tunnel_starts: u32,
    shutdowns: u32,
}

/// A mock implementation of [`ScreenCapture`].  Cloning shares state.
#[derive(Clone)]
pub struct MockCapture {
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCapture {
    /// A capture double whose tool is available and which fails every
    /// capture until scripted otherwise.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCaptureState {
                available: true,
                ..MockCaptureState::default()
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockCaptureState) -> R) -> R {
        let mut state = self.state.lock().expect("lock poisoned");
        f(&mut state)
    }

    /// Queues outcomes for the next captures, in order.
    pub fn push(&self, step: CaptureStep) {
        self.with_state(|s| s.script.push_back(step));
    }

    /// Outcome used once the queue is exhausted.
    pub fn always(&self, step: CaptureStep) {
        self.with_state(|s| s.fallback = Some(step));
    }

    /// Every capture sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.with_state(|s| s.delay = Some(delay));
    }

    pub fn set_available(&self, available: bool) {
        self.with_state(|s| s.available = available);
    }

    pub fn capture_count(&self) -> u32 {
        self.with_state(|s| s.captures)
    }

    pub fn channel_pairs(&self) -> Vec<DeviceId> {
        self.with_state(|s| s.channel_pairs.clone())
    }

    pub fn tunnel_starts(&self) -> u32 {
        self.with_state(|s| s.tunnel_starts)
    }

    pub fn shutdowns(&self) -> u32 {
        self.with_state(|s| s.shutdowns)
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScreenCapture for MockCapture {
    async fn capture(&self, _device: &DeviceId) -> Result<Vec<u8>, CaptureError> {
        let (step, delay) = self.with_state(|s| {
            s.captures += 1;
            let step = s
                .script
                .pop_front()
                .or_else(|| s.fallback.clone())
                .unwrap_or_else(|| CaptureStep::Fail("no capture scripted".to_string()));
            (step, s.delay)
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match step {
            CaptureStep::Png(bytes) => Ok(bytes),
            CaptureStep::Fail(stderr) => Err(CaptureError::Failed {
                status: "exit status: 1".to_string(),
                stderr,
            }),
            CaptureStep::Hang => std::future::pending().await,
        }
    }

    async fn is_available(&self) -> bool {
        self.with_state(|s| s.available)
    }

    async fn pair_channel(&self, device: &DeviceId) -> Result<(), CaptureError> {
        self.with_state(|s| {
            if !s.available {
                return Err(CaptureError::ToolUnavailable("mock tool disabled".to_string()));
            }
            s.channel_pairs.push(device.clone());
            Ok(())
        })
    }

    async fn start_tunnel(&self) -> Result<(), CaptureError> {
        self.with_state(|s| s.tunnel_starts += 1);
        Ok(())
    }

    async fn shutdown(&self) {
        self.with_state(|s| s.shutdowns += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_is_consumed_before_fallback() {
        // Arrange
        let capture = MockCapture::new();
        capture.push(CaptureStep::Png(vec![1]));
        capture.always(CaptureStep::Png(vec![2]));
        let id = DeviceId::from("dev");

        // Act
        let first = capture.capture(&id).await.unwrap();
        let second = capture.capture(&id).await.unwrap();

        // Assert
        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![2]);
        assert_eq!(capture.capture_count(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_capture_fails() {
        let capture = MockCapture::new();
        let result = capture.capture(&DeviceId::from("dev")).await;
        assert!(matches!(result, Err(CaptureError::Failed { .. })));
    }
}
