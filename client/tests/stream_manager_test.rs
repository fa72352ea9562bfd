//! Shared capture-device integration tests.
//!
//! Run with: `cargo test --test stream_manager_test`

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::ScriptedCapture;
use lc_client::media::{MediaError, RetryPolicy, StreamManager, TrackKind};
use tokio::time::Instant;

fn manager(device: Arc<ScriptedCapture>) -> StreamManager {
    StreamManager::new(device, RetryPolicy::default())
}

#[tokio::test]
async fn test_consumers_share_one_device() {
    let device = ScriptedCapture::new();
    let streams = manager(device.clone());

    let call = streams.acquire().await.unwrap();
    let preview = streams.acquire().await.unwrap();
    let recorder = streams.acquire().await.unwrap();

    assert_eq!(device.opens(), 1);
    assert_eq!(streams.ref_count().await, 3);

    streams.release(preview).await;
    streams.release(call).await;
    assert!(streams.is_active().await);
    assert!(recorder.tracks().iter().all(|t| t.is_live()));

    streams.release(recorder).await;
    assert_eq!(streams.ref_count().await, 0);
    assert!(!streams.is_active().await);
}

#[tokio::test]
async fn test_clone_toggles_are_independent() {
    let streams = manager(ScriptedCapture::new());

    let call = streams.acquire().await.unwrap();
    let preview = streams.acquire().await.unwrap();

    call.set_enabled(TrackKind::Video, false);

    assert!(!call.video_track().unwrap().is_enabled());
    assert!(preview.video_track().unwrap().is_enabled());
}

#[tokio::test]
async fn test_concurrent_acquires_open_device_once() {
    let device = ScriptedCapture::new();
    let streams = Arc::new(manager(device.clone()));

    let (a, b) = tokio::join!(streams.acquire(), streams.acquire());
    a.unwrap();
    b.unwrap();

    assert_eq!(device.opens(), 1);
    assert_eq!(streams.ref_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_busy_device_recovers_on_third_attempt() {
    let device = ScriptedCapture::failing_with(vec![MediaError::DeviceBusy, MediaError::DeviceBusy]);
    let streams = manager(device.clone());

    let started = Instant::now();
    let handle = streams.acquire().await.unwrap();

    assert_eq!(device.opens(), 3);
    assert!(handle.video_track().is_some());
    // 1.5s before the first retry, 3s before the second.
    assert!(started.elapsed() >= Duration::from_millis(4500));
}

#[tokio::test]
async fn test_missing_device_fails_fast() {
    let device = ScriptedCapture::failing_with(vec![MediaError::DeviceNotFound]);
    let streams = manager(device.clone());

    let err = streams.acquire().await.unwrap_err();

    assert_eq!(err, MediaError::DeviceNotFound);
    assert_eq!(device.opens(), 1);
    assert!(err.user_message().contains("camera"));
}

#[tokio::test]
async fn test_force_stop_then_reacquire() {
    let device = ScriptedCapture::new();
    let streams = manager(device.clone());

    let call = streams.acquire().await.unwrap();
    streams.force_stop_physical().await;

    assert!(!streams.is_active().await);
    assert!(call.tracks().iter().all(|t| !t.is_live()));
    assert_eq!(streams.ref_count().await, 1);

    let fresh = streams.acquire().await.unwrap();
    assert_eq!(device.opens(), 2);
    assert!(fresh.video_track().unwrap().is_live());

    streams.release(call).await;
    assert!(streams.is_active().await);
    assert_eq!(streams.ref_count().await, 1);
}
