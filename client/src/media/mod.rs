//! Local Media
//!
//! Capture-device abstraction and the logical tracks handed out to peers.

mod manager;
mod synthetic;

pub use manager::{RetryPolicy, StreamManager};
pub use synthetic::SyntheticCapture;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Capture-layer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The platform denied camera/microphone permission.
    #[error("Capture permission denied")]
    DeviceUnavailable,
    /// No camera or microphone is present.
    #[error("No capture device found")]
    DeviceNotFound,
    /// Another process holds the device exclusively.
    #[error("Capture device is busy")]
    DeviceBusy,
    #[error("Capture failed: {0}")]
    Other(String),
}

impl MediaError {
    /// Whether the acquisition should be retried after a delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DeviceBusy)
    }

    /// Actionable text for the person in front of the camera.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceUnavailable => {
                "Camera and microphone access was denied. Allow access in your system settings and try again.".into()
            }
            Self::DeviceNotFound => {
                "No camera or microphone was found. Connect a device and try again.".into()
            }
            Self::DeviceBusy => {
                "Your camera is being used by another application. Close it and try again.".into()
            }
            Self::Other(reason) => format!("Could not start your camera: {reason}"),
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Requested capture settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 48000,
            channel_count: 1,
        }
    }
}

#[derive(Debug)]
struct TrackState {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
    source: Option<Arc<TrackState>>,
}

impl TrackState {
    fn is_live(&self) -> bool {
        !self.ended.load(Ordering::Acquire) && self.source.as_ref().is_none_or(|s| s.is_live())
    }
}

/// A single capture track.
///
/// Cloning a `LocalTrack` shares the same track. Use [`LocalTrack::derive`]
/// for an independent clone bound to the same device.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    inner: Arc<TrackState>,
}

impl LocalTrack {
    /// Create a device-level track.
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackState {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
                source: None,
            }),
        }
    }

    /// Independent clone of this track. The clone has its own enabled
    /// flag and stop, but ends whenever this track ends.
    #[must_use]
    pub fn derive(&self) -> Self {
        Self {
            inner: Arc::new(TrackState {
                id: format!("{}-{}", self.inner.kind, Uuid::now_v7()),
                kind: self.inner.kind,
                enabled: AtomicBool::new(self.is_enabled()),
                ended: AtomicBool::new(false),
                source: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the track still carries media from a running device.
    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::Release);
    }

    /// Whether two handles refer to the same track.
    pub fn same_track(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// One logical consumer's view of the capture device.
#[derive(Debug)]
pub struct MediaStreamHandle {
    id: Uuid,
    tracks: Vec<LocalTrack>,
}

impl MediaStreamHandle {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tracks,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.track(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.track(TrackKind::Video)
    }

    /// Enable or disable every track of a kind.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub(crate) fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A running capture device.
pub trait PhysicalStream: Send + Sync {
    /// Whether any device track is still running.
    fn is_active(&self) -> bool;

    /// Whether a device track of `kind` is still running.
    fn is_capturing(&self, kind: TrackKind) -> bool;

    /// Hand out an independent clone of every device track.
    fn clone_stream(&self) -> MediaStreamHandle;

    /// Stop the device tracks of one kind, leaving the others running.
    fn stop_kind(&self, kind: TrackKind);

    /// Stop the device. Every clone ends with it.
    fn stop(&self);
}

/// Platform capture backend.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request the device. Each call is one platform request.
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn PhysicalStream>, MediaError>;
}

/// [`PhysicalStream`] backed by a fixed set of device tracks.
#[derive(Debug)]
pub struct CapturedStream {
    tracks: Vec<LocalTrack>,
}

impl CapturedStream {
    pub const fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    /// Device tracks matching the constraints.
    pub fn from_constraints(constraints: &CaptureConstraints) -> Self {
        let mut tracks = Vec::with_capacity(2);
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, format!("camera-{}", Uuid::now_v7())));
        }
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, format!("mic-{}", Uuid::now_v7())));
        }
        Self::new(tracks)
    }
}

impl PhysicalStream for CapturedStream {
    fn is_active(&self) -> bool {
        self.tracks.iter().any(LocalTrack::is_live)
    }

    fn is_capturing(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == kind && t.is_live())
    }

    fn clone_stream(&self) -> MediaStreamHandle {
        MediaStreamHandle::new(self.tracks.iter().map(LocalTrack::derive).collect())
    }

    fn stop_kind(&self, kind: TrackKind) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.stop();
        }
    }

    fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
