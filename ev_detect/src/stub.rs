//! ABOUTME: Deterministic detector adapter for tests: a FIFO script of canned detections
//! ABOUTME: Never decodes the JPEG it's handed; purely a scripted stand-in for the black box

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use ev_core::Result;

use crate::{DetectorAdapter, RawDetection};

/// Replays a pre-loaded FIFO queue of detection batches, one per `infer` call.
/// Once the queue is empty, every subsequent call returns no detections.
#[derive(Default)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Vec<RawDetection>>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one frame's worth of detections to be returned on the next `infer` call.
    pub fn push(&self, detections: Vec<RawDetection>) {
        self.script.lock().unwrap().push_back(detections);
    }
}

#[async_trait]
impl DetectorAdapter for ScriptedDetector {
    async fn infer(&self, _frame_id: &str, _image: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}
