//! Capture backend with no hardware behind it.
//!
//! Used by the headless binary so a node can join a room and negotiate
//! without a camera.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CaptureConstraints, CaptureDevice, CapturedStream, MediaError, PhysicalStream};

/// Opens a silent, blank device on every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticCapture;

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn PhysicalStream>, MediaError> {
        if !constraints.video && !constraints.audio {
            return Err(MediaError::Other("no track kind requested".into()));
        }

        debug!(
            video = constraints.video,
            audio = constraints.audio,
            "Opening synthetic capture"
        );
        Ok(Arc::new(CapturedStream::from_constraints(constraints)))
    }
}
