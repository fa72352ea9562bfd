//! Shared capture-device ownership.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    CaptureConstraints, CaptureDevice, LocalTrack, MediaError, MediaStreamHandle, PhysicalStream,
    TrackKind,
};

/// Backoff for a busy capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first request.
    pub max_retries: u32,
    /// Delay before the first retry; later retries grow linearly.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1500),
        }
    }
}

/// Running device requests. Usually one; a kind stopped on its own and
/// reopened later adds a second request covering just that kind.
#[derive(Default)]
struct DeviceState {
    physical: Vec<Arc<dyn PhysicalStream>>,
    ref_count: usize,
    handles: HashSet<Uuid>,
}

impl DeviceState {
    fn is_capturing(&self, kind: TrackKind) -> bool {
        self.physical.iter().any(|p| p.is_capturing(kind))
    }

    fn stop_all(&mut self) -> bool {
        let running = !self.physical.is_empty();
        for physical in self.physical.drain(..) {
            physical.stop();
        }
        running
    }
}

/// Owns the physical capture device and hands out reference-counted clones.
///
/// The device lock is held for the whole acquisition, retries included, so
/// a concurrent `acquire` waits for the in-flight request and then reuses
/// its stream instead of asking the platform twice.
pub struct StreamManager {
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    retry: RetryPolicy,
    state: Mutex<DeviceState>,
}

impl StreamManager {
    pub fn new(device: Arc<dyn CaptureDevice>, retry: RetryPolicy) -> Self {
        Self::with_constraints(device, CaptureConstraints::default(), retry)
    }

    pub fn with_constraints(
        device: Arc<dyn CaptureDevice>,
        constraints: CaptureConstraints,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            device,
            constraints,
            retry,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Get a fresh clone of the capture stream, opening the device if needed.
    pub async fn acquire(&self) -> Result<MediaStreamHandle, MediaError> {
        let mut state = self.state.lock().await;
        state.physical.retain(|p| p.is_active());

        let missing = CaptureConstraints {
            video: self.constraints.video && !state.is_capturing(TrackKind::Video),
            audio: self.constraints.audio && !state.is_capturing(TrackKind::Audio),
            ..self.constraints.clone()
        };
        if missing.video || missing.audio {
            let physical = self.open_with_retry(&missing).await?;
            state.physical.push(physical);
        } else {
            debug!(refs = state.ref_count, "Reusing running capture device");
        }

        let tracks = state
            .physical
            .iter()
            .flat_map(|p| p.clone_stream().tracks().to_vec())
            .filter(LocalTrack::is_live)
            .collect();
        let handle = MediaStreamHandle::new(tracks);
        state.ref_count += 1;
        state.handles.insert(handle.id());

        debug!(refs = state.ref_count, handle = %handle.id(), "Capture stream acquired");
        Ok(handle)
    }

    /// Stop a handle's tracks and drop its reference. The device stops with
    /// the last reference.
    pub async fn release(&self, handle: MediaStreamHandle) {
        let mut state = self.state.lock().await;

        handle.stop();
        if !state.handles.remove(&handle.id()) {
            warn!(handle = %handle.id(), "Released a handle this manager does not own");
            return;
        }

        state.ref_count = state.ref_count.saturating_sub(1);
        debug!(refs = state.ref_count, "Capture stream released");

        if state.ref_count == 0 && state.stop_all() {
            info!("Capture device stopped, no references left");
        }
    }

    /// Stop the device now, whatever the reference count. References stay
    /// counted; the next `acquire` reopens the device.
    pub async fn force_stop_physical(&self) {
        let mut state = self.state.lock().await;

        if state.stop_all() {
            info!(refs = state.ref_count, "Capture device force-stopped");
        }
    }

    /// Stop one kind of device track (the camera, say) whatever the
    /// reference count, leaving the rest running. The next `acquire` reopens
    /// just that kind.
    pub async fn force_stop_kind(&self, kind: TrackKind) {
        let state = self.state.lock().await;

        for physical in &state.physical {
            physical.stop_kind(kind);
        }
        info!(kind = %kind, refs = state.ref_count, "Capture track force-stopped");
    }

    pub async fn ref_count(&self) -> usize {
        self.state.lock().await.ref_count
    }

    /// Whether the device is currently running.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.physical.iter().any(|p| p.is_active())
    }

    /// Whether a device track of `kind` is currently running.
    pub async fn is_capturing(&self, kind: TrackKind) -> bool {
        self.state.lock().await.is_capturing(kind)
    }

    async fn open_with_retry(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn PhysicalStream>, MediaError> {
        let mut attempt = 0u32;

        loop {
            match self.device.open(constraints).await {
                Ok(physical) => {
                    info!(retries = attempt, "Capture device opened");
                    return Ok(physical);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Capture device busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(error = %err, retries = attempt, "Capture device request failed");
                    return Err(err);
                }
            }
        }
    }
}
