//! ABOUTME: Detector adapter (C3): wraps the black-box detector contract
//! ABOUTME: Normalizes raw detections to the invariants every engine assumes

pub mod stub;

pub use stub::ScriptedDetector;

use async_trait::async_trait;
use ev_core::Result;
use serde::{Deserialize, Serialize};

/// A single detection, already clamped/normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub cls_id: u32,
    pub name: String,
    pub conf: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub track_id: Option<i64>,
}

impl Detection {
    /// `((x1+x2)/2,(y1+y2)/2)`, the representative point for all geometry engines.
    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// A raw detection as produced by the upstream black-box detector, before
/// normalization. Boxes may be out of order or out of bounds; confidence may
/// be out of `[0,1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub cls_id: u32,
    pub name: String,
    pub conf: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub track_id: Option<i64>,
}

/// Detections for a single frame, after normalization.
#[derive(Debug, Clone, Default)]
pub struct DetectionsMessage {
    pub detections: Vec<Detection>,
}

/// Normalize raw detector output per 4.3: clamp boxes to the image, reorder
/// so `x1<=x2, y1<=y2`, clamp confidence to `[0,1]`, strip track IDs when
/// tracking is disabled, and drop duplicate `track_id`s (keep first).
pub fn normalize(
    raw: Vec<RawDetection>,
    width: u32,
    height: u32,
    tracking_enabled: bool,
) -> DetectionsMessage {
    let w = width as f64;
    let h = height as f64;
    let mut seen_track_ids = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for d in raw {
        let track_id = if tracking_enabled { d.track_id } else { None };
        if let Some(tid) = track_id {
            if !seen_track_ids.insert(tid) {
                continue;
            }
        }

        let (mut x1, mut x2) = (d.x1.clamp(0.0, w), d.x2.clamp(0.0, w));
        let (mut y1, mut y2) = (d.y1.clamp(0.0, h), d.y2.clamp(0.0, h));
        if x1 > x2 {
            std::mem::swap(&mut x1, &mut x2);
        }
        if y1 > y2 {
            std::mem::swap(&mut y1, &mut y2);
        }

        out.push(Detection {
            cls_id: d.cls_id,
            name: d.name,
            conf: d.conf.clamp(0.0, 1.0),
            x1,
            y1,
            x2,
            y2,
            track_id,
        });
    }

    DetectionsMessage { detections: out }
}

/// Contract for the black-box detector: `infer(F) -> DetectionsMessage`, where
/// `frame_id` is carried through so adapters that key off it (logging,
/// request correlation, scripted test fixtures) don't need a side channel.
#[async_trait]
pub trait DetectorAdapter: Send + Sync {
    async fn infer(&self, frame_id: &str, image: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(track_id: Option<i64>) -> RawDetection {
        RawDetection {
            cls_id: 0,
            name: "person".into(),
            conf: 1.5,
            x1: -10.0,
            y1: 5.0,
            x2: 50.0,
            y2: -5.0,
            track_id,
        }
    }

    #[test]
    fn clamps_box_and_reorders() {
        let msg = normalize(vec![raw(Some(1))], 40, 40, true);
        let d = &msg.detections[0];
        assert_eq!(d.x1, 0.0);
        assert_eq!(d.x2, 40.0);
        assert_eq!(d.y1, 0.0);
        assert_eq!(d.y2, 5.0);
        assert_eq!(d.conf, 1.0);
    }

    #[test]
    fn drops_duplicate_track_id_keeping_first() {
        let mut first = raw(Some(1));
        first.name = "first".into();
        let mut second = raw(Some(1));
        second.name = "second".into();
        let msg = normalize(vec![first, second], 100, 100, true);
        assert_eq!(msg.detections.len(), 1);
        assert_eq!(msg.detections[0].name, "first");
    }

    #[test]
    fn strips_track_id_when_tracking_disabled() {
        let msg = normalize(vec![raw(Some(1))], 100, 100, false);
        assert_eq!(msg.detections[0].track_id, None);
    }

    #[test]
    fn centroid_is_box_center() {
        let d = Detection {
            cls_id: 0,
            name: "x".into(),
            conf: 1.0,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 20.0,
            track_id: None,
        };
        assert_eq!(d.centroid(), (5.0, 10.0));
    }
}
