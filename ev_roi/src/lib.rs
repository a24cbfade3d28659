//! ABOUTME: ROI/Line engine (C4): per-track region inside/outside state
//! ABOUTME: Debounced transitions, dwell thresholds, line-side crossings

use ev_detect::Detection;
use ev_protocol::{Event, Severity};
use std::collections::{BTreeMap, HashMap};

/// Per-engine, per-track TTL after which unseen state is garbage-collected.
pub const TRACK_TTL_MS: u64 = 30_000;
const LINE_SIDE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct RoiRegion {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub dwell_threshold_ms: Option<u64>,
}

impl RoiRegion {
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

#[derive(Debug, Clone)]
pub struct RoiLine {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Sign of the 2D cross product `(x2-x1)(Py-y1) - (y2-y1)(Px-x1)`. `None` when
/// the point is within `epsilon` of the line (undefined side).
fn line_side(line: &RoiLine, px: f64, py: f64) -> Option<Side> {
    let cross = (line.x2 - line.x1) * (py - line.y1) - (line.y2 - line.y1) * (px - line.x1);
    if cross > LINE_SIDE_EPSILON {
        Some(Side::A)
    } else if cross < -LINE_SIDE_EPSILON {
        Some(Side::B)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RoiConfig {
    pub enabled: bool,
    pub regions: BTreeMap<String, RoiRegion>,
    pub lines: BTreeMap<String, RoiLine>,
    pub dwell_default_threshold_ms: u64,
    pub transition_min_ms: u64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            regions: BTreeMap::new(),
            lines: BTreeMap::new(),
            dwell_default_threshold_ms: 5_000,
            transition_min_ms: 250,
        }
    }
}

impl RoiConfig {
    fn dwell_threshold_ms(&self, region: &RoiRegion) -> u64 {
        region.dwell_threshold_ms.unwrap_or(self.dwell_default_threshold_ms)
    }
}

#[derive(Debug, Clone, Default)]
struct PendingTransition {
    candidate_inside: bool,
    since_ts_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct RegionState {
    committed_inside: bool,
    pending: Option<PendingTransition>,
    enter_ts_ms: Option<u64>,
    dwell_emitted: bool,
}

#[derive(Debug, Clone)]
struct LineState {
    last_side: Option<Side>,
}

#[derive(Debug, Clone, Default)]
struct TrackState {
    regions: HashMap<String, RegionState>,
    lines: HashMap<String, LineState>,
    last_seen_ts_ms: u64,
}

/// Owns all per-track ROI/line state for one connection.
#[derive(Debug, Default)]
pub struct RoiEngine {
    tracks: HashMap<i64, TrackState>,
}

impl RoiEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one frame's detections, returning events in per-track insertion order.
    pub fn process(&mut self, config: &RoiConfig, ts_ms: u64, detections: &[Detection]) -> Vec<Event> {
        if !config.enabled {
            return Vec::new();
        }
        let mut events = Vec::new();

        for det in detections {
            let Some(track_id) = det.track_id else { continue };
            let (cx, cy) = det.centroid();
            let track = self.tracks.entry(track_id).or_default();
            track.last_seen_ts_ms = ts_ms;

            for (name, region) in &config.regions {
                let state = track.regions.entry(name.clone()).or_default();
                let observed_inside = region.contains(cx, cy);
                Self::apply_region_transition(
                    state,
                    config,
                    region,
                    name,
                    track_id,
                    observed_inside,
                    ts_ms,
                    &mut events,
                );
            }

            for (name, line) in &config.lines {
                let side = line_side(line, cx, cy);
                let Some(side) = side else { continue };
                let state = track
                    .lines
                    .entry(name.clone())
                    .or_insert(LineState { last_side: None });
                if let Some(prev) = state.last_side {
                    if prev != side {
                        events.push(Event {
                            name: "line_cross".to_string(),
                            severity: Severity::Medium,
                            data: serde_json::json!({
                                "line": name,
                                "direction": format!("{}->{}", side_str(prev), side_str(side)),
                            }),
                        });
                    }
                }
                state.last_side = Some(side);
            }
        }

        self.evict_stale(ts_ms);
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_region_transition(
        state: &mut RegionState,
        config: &RoiConfig,
        region: &RoiRegion,
        region_name: &str,
        track_id: i64,
        observed_inside: bool,
        ts_ms: u64,
        events: &mut Vec<Event>,
    ) {
        if config.transition_min_ms == 0 {
            if observed_inside != state.committed_inside {
                Self::commit_transition(state, region_name, observed_inside, ts_ms, events);
            }
        } else {
            match &state.pending {
                None => {
                    if observed_inside != state.committed_inside {
                        state.pending = Some(PendingTransition {
                            candidate_inside: observed_inside,
                            since_ts_ms: ts_ms,
                        });
                    }
                }
                Some(pending) => {
                    if observed_inside == state.committed_inside {
                        state.pending = None;
                    } else if observed_inside == pending.candidate_inside {
                        if ts_ms.saturating_sub(pending.since_ts_ms) >= config.transition_min_ms {
                            state.pending = None;
                            Self::commit_transition(state, region_name, observed_inside, ts_ms, events);
                        }
                    } else {
                        // Candidate flipped direction: restart the debounce window.
                        state.pending = Some(PendingTransition {
                            candidate_inside: observed_inside,
                            since_ts_ms: ts_ms,
                        });
                    }
                }
            }
        }

        if state.committed_inside {
            if let Some(enter_ts) = state.enter_ts_ms {
                let dwell_ms = ts_ms.saturating_sub(enter_ts);
                if !state.dwell_emitted && dwell_ms >= config.dwell_threshold_ms(region) {
                    state.dwell_emitted = true;
                    events.push(Event {
                        name: "roi_dwell".to_string(),
                        severity: Severity::Medium,
                        data: serde_json::json!({ "roi": region_name, "dwell_ms": dwell_ms }),
                    });
                }
            }
        }
        let _ = track_id;
    }

    fn commit_transition(
        state: &mut RegionState,
        region_name: &str,
        now_inside: bool,
        ts_ms: u64,
        events: &mut Vec<Event>,
    ) {
        state.committed_inside = now_inside;
        if now_inside {
            state.enter_ts_ms = Some(ts_ms);
            state.dwell_emitted = false;
            events.push(Event {
                name: "roi_enter".to_string(),
                severity: Severity::Low,
                data: serde_json::json!({ "roi": region_name }),
            });
        } else {
            state.enter_ts_ms = None;
            events.push(Event {
                name: "roi_exit".to_string(),
                severity: Severity::Low,
                data: serde_json::json!({ "roi": region_name }),
            });
        }
    }

    fn evict_stale(&mut self, now_ts_ms: u64) {
        self.tracks
            .retain(|_, t| now_ts_ms.saturating_sub(t.last_seen_ts_ms) < TRACK_TTL_MS);
    }
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::A => "A",
        Side::B => "B",
    }
}
