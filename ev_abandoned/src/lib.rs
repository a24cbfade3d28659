//! ABOUTME: Abandoned-object engine (C7): per-object-track association state machine
//! ABOUTME: Watches/CandidateAssociation/Associated/Abandoning/Emitted with ROI gating

use ev_detect::Detection;
use ev_protocol::{Event, Severity};
use std::collections::HashMap;

pub const TRACK_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct AbandonedConfig {
    pub enabled: bool,
    /// Object classes watched for abandonment. Must not include "person".
    pub object_classes: Vec<String>,
    pub roi_name: Option<String>,
    pub roi: Option<(f64, f64, f64, f64)>,
    pub associate_max_distance_px: f64,
    pub associate_min_ms: u64,
    pub abandon_delay_ms: u64,
    pub stationary_max_move_px: Option<f64>,
    pub event_cooldown_ms: u64,
}

impl Default for AbandonedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            object_classes: Vec::new(),
            roi_name: None,
            roi: None,
            associate_max_distance_px: 100.0,
            associate_min_ms: 1_000,
            abandon_delay_ms: 2_000,
            stationary_max_move_px: Some(30.0),
            event_cooldown_ms: 5_000,
        }
    }
}

fn in_roi(roi: &(f64, f64, f64, f64), x: f64, y: f64) -> bool {
    let (x1, y1, x2, y2) = *roi;
    x >= x1 && x <= x2 && y >= y1 && y <= y2
}

#[derive(Debug, Clone, Copy)]
struct Abandonment {
    person_id: i64,
    started_ts_ms: u64,
    reference_point: (f64, f64),
    emitted: bool,
}

#[derive(Debug, Clone, Default)]
struct ObjectTrackState {
    class_name: String,
    candidate: Option<(i64, u64)>,
    associated: Option<(i64, u64)>,
    abandonment: Option<Abandonment>,
    last_event_ts_ms: Option<u64>,
    last_seen_ts_ms: u64,
}

#[derive(Debug, Default)]
pub struct AbandonedEngine {
    tracks: HashMap<i64, ObjectTrackState>,
}

impl AbandonedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, config: &AbandonedConfig, ts_ms: u64, detections: &[Detection]) -> Vec<Event> {
        if !config.enabled {
            return Vec::new();
        }
        let mut events = Vec::new();

        let people: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.name == "person" && d.track_id.is_some())
            .collect();

        for det in detections {
            let Some(track_id) = det.track_id else { continue };
            if !config.object_classes.iter().any(|c| c == &det.name) {
                continue;
            }
            let (ox, oy) = det.centroid();

            if let Some(roi) = &config.roi {
                if !in_roi(roi, ox, oy) {
                    self.tracks.remove(&track_id);
                    continue;
                }
            }

            let state = self.tracks.entry(track_id).or_insert_with(|| ObjectTrackState {
                class_name: det.name.clone(),
                ..Default::default()
            });
            state.last_seen_ts_ms = ts_ms;

            let nearest = people
                .iter()
                .filter_map(|p| {
                    let (px, py) = p.centroid();
                    let d = ((px - ox).powi(2) + (py - oy).powi(2)).sqrt();
                    if d <= config.associate_max_distance_px {
                        Some((p.track_id.unwrap(), d))
                    } else {
                        None
                    }
                })
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

            if let Some((person_id, _)) = nearest {
                match state.candidate {
                    Some((cid, since)) if cid == person_id => {
                        if ts_ms.saturating_sub(since) >= config.associate_min_ms {
                            state.associated = Some((person_id, since));
                            state.abandonment = None;
                        }
                    }
                    _ => {
                        state.candidate = Some((person_id, ts_ms));
                    }
                }
            } else {
                state.candidate = None;
                if let Some((person_id, since)) = state.associated {
                    if state.abandonment.is_none() {
                        state.abandonment = Some(Abandonment {
                            person_id,
                            started_ts_ms: ts_ms,
                            reference_point: (ox, oy),
                            emitted: false,
                        });
                    }
                    let _ = since;
                }
            }

            if let Some(ab) = state.abandonment {
                let mut reset = false;
                if let Some(max_move) = config.stationary_max_move_px {
                    let (rx, ry) = ab.reference_point;
                    let moved = ((ox - rx).powi(2) + (oy - ry).powi(2)).sqrt();
                    if moved > max_move {
                        state.abandonment = None;
                        reset = true;
                    }
                }
                if !reset {
                    let duration = ts_ms.saturating_sub(ab.started_ts_ms);
                    let cooldown_ok = match state.last_event_ts_ms {
                        Some(last) => ts_ms.saturating_sub(last) >= config.event_cooldown_ms,
                        None => true,
                    };
                    if !ab.emitted && duration >= config.abandon_delay_ms && cooldown_ok {
                        state.last_event_ts_ms = Some(ts_ms);
                        state.abandonment = Some(Abandonment { emitted: true, ..ab });
                        events.push(Event {
                            name: "abandoned_object".to_string(),
                            severity: Severity::High,
                            data: serde_json::json!({
                                "object_track_id": track_id,
                                "object_class": state.class_name,
                                "person_track_id": ab.person_id,
                                "roi": config.roi_name,
                                "abandon_ms": duration,
                            }),
                        });
                    }
                }
            }
        }

        self.tracks
            .retain(|_, t| ts_ms.saturating_sub(t.last_seen_ts_ms) < TRACK_TTL_MS);
        events
    }
}
