//! ABOUTME: Motion engine (C5): per-track velocity history and cooldown-gated events
//! ABOUTME: sudden_motion on speed spikes, track_stop on sustained low speed

use ev_detect::Detection;
use ev_protocol::{Event, Severity};
use std::collections::{HashMap, VecDeque};

pub const TRACK_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub enabled: bool,
    pub history_frames: usize,
    pub sudden_motion_speed_px_s: f64,
    pub stop_speed_px_s: f64,
    pub stop_duration_ms: u64,
    pub event_cooldown_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            history_frames: 5,
            sudden_motion_speed_px_s: 400.0,
            stop_speed_px_s: 5.0,
            stop_duration_ms: 1_000,
            event_cooldown_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    ts_ms: u64,
    x: f64,
    y: f64,
}

fn speed(a: &Sample, b: &Sample) -> Option<f64> {
    let delta_t_ms = b.ts_ms as i64 - a.ts_ms as i64;
    if delta_t_ms <= 0 {
        return None;
    }
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let dist = (dx * dx + dy * dy).sqrt();
    Some(dist / (delta_t_ms as f64 / 1000.0))
}

#[derive(Debug, Clone, Default)]
struct TrackMotionState {
    history: VecDeque<Sample>,
    stop_start_ts_ms: Option<u64>,
    stop_emitted_this_window: bool,
    last_emit_ts_ms: HashMap<&'static str, u64>,
    last_seen_ts_ms: u64,
}

impl TrackMotionState {
    fn cooldown_ok(&self, event: &'static str, ts_ms: u64, cooldown_ms: u64) -> bool {
        match self.last_emit_ts_ms.get(event) {
            Some(last) => ts_ms.saturating_sub(*last) >= cooldown_ms,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct MotionEngine {
    tracks: HashMap<i64, TrackMotionState>,
}

impl MotionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, config: &MotionConfig, ts_ms: u64, detections: &[Detection]) -> Vec<Event> {
        if !config.enabled {
            return Vec::new();
        }
        let mut events = Vec::new();

        for det in detections {
            let Some(track_id) = det.track_id else { continue };
            let (x, y) = det.centroid();
            let state = self.tracks.entry(track_id).or_default();
            state.last_seen_ts_ms = ts_ms;

            state.history.push_back(Sample { ts_ms, x, y });
            while state.history.len() > config.history_frames.max(2) {
                state.history.pop_front();
            }

            let len = state.history.len();
            let v_now = if len >= 2 {
                speed(&state.history[len - 2], &state.history[len - 1])
            } else {
                None
            };
            let v_prev = if len >= 4 {
                speed(&state.history[len - 4], &state.history[len - 3])
            } else {
                None
            };

            let Some(v_now) = v_now else { continue };
            let delta_v = v_prev.map(|p| (v_now - p).abs()).unwrap_or(0.0);

            if (v_now >= config.sudden_motion_speed_px_s || delta_v >= config.sudden_motion_speed_px_s)
                && state.cooldown_ok("sudden_motion", ts_ms, config.event_cooldown_ms)
            {
                state.last_emit_ts_ms.insert("sudden_motion", ts_ms);
                events.push(Event {
                    name: "sudden_motion".to_string(),
                    severity: Severity::Medium,
                    data: serde_json::json!({
                        "track_id": track_id,
                        "speed_px_s": v_now,
                        "delta_speed_px_s": delta_v,
                    }),
                });
            }

            if v_now <= config.stop_speed_px_s {
                if state.stop_start_ts_ms.is_none() {
                    state.stop_start_ts_ms = Some(ts_ms);
                    state.stop_emitted_this_window = false;
                }
                let window_started = state.stop_start_ts_ms.unwrap();
                let duration = ts_ms.saturating_sub(window_started);
                if !state.stop_emitted_this_window
                    && duration >= config.stop_duration_ms
                    && state.cooldown_ok("track_stop", ts_ms, config.event_cooldown_ms)
                {
                    state.stop_emitted_this_window = true;
                    state.last_emit_ts_ms.insert("track_stop", ts_ms);
                    events.push(Event {
                        name: "track_stop".to_string(),
                        severity: Severity::Low,
                        data: serde_json::json!({ "track_id": track_id, "stop_duration_ms": duration }),
                    });
                }
            } else {
                state.stop_start_ts_ms = None;
                state.stop_emitted_this_window = false;
            }
        }

        self.tracks
            .retain(|_, t| ts_ms.saturating_sub(t.last_seen_ts_ms) < TRACK_TTL_MS);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(track_id: i64, cx: f64, cy: f64) -> Detection {
        Detection { cls_id: 0, name: "person".into(), conf: 1.0, x1: cx, y1: cy, x2: cx, y2: cy, track_id: Some(track_id) }
    }

    fn config() -> MotionConfig {
        MotionConfig {
            enabled: true,
            history_frames: 5,
            sudden_motion_speed_px_s: 100.0,
            stop_speed_px_s: 5.0,
            stop_duration_ms: 500,
            event_cooldown_ms: 1_000,
        }
    }

    #[test]
    fn emits_sudden_motion_on_speed_spike() {
        let config = config();
        let mut engine = MotionEngine::new();
        engine.process(&config, 0, &[det(1, 0.0, 0.0)]);
        let events = engine.process(&config, 100, &[det(1, 50.0, 0.0)]); // 500 px/s
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "sudden_motion");
    }

    #[test]
    fn cooldown_suppresses_repeat_emission() {
        let config = config();
        let mut engine = MotionEngine::new();
        engine.process(&config, 0, &[det(1, 0.0, 0.0)]);
        engine.process(&config, 100, &[det(1, 50.0, 0.0)]);
        let events = engine.process(&config, 150, &[det(1, 100.0, 0.0)]);
        assert!(events.is_empty(), "within cooldown window, should not re-emit");
    }

    #[test]
    fn emits_track_stop_after_sustained_low_speed() {
        let config = config();
        let mut engine = MotionEngine::new();
        engine.process(&config, 0, &[det(1, 0.0, 0.0)]);
        engine.process(&config, 100, &[det(1, 1.0, 0.0)]);
        let events = engine.process(&config, 600, &[det(1, 1.0, 0.0)]);
        assert!(events.iter().any(|e| e.name == "track_stop"));
    }

    #[test]
    fn resets_stop_window_on_speed_increase() {
        let config = config();
        let mut engine = MotionEngine::new();
        engine.process(&config, 0, &[det(1, 0.0, 0.0)]);
        engine.process(&config, 100, &[det(1, 1.0, 0.0)]);
        engine.process(&config, 200, &[det(1, 50.0, 0.0)]); // fast move resets stop window
        let events = engine.process(&config, 700, &[det(1, 50.5, 0.0)]);
        assert!(!events.iter().any(|e| e.name == "track_stop"));
    }

    #[test]
    fn undefined_speed_when_non_positive_delta_t() {
        let config = config();
        let mut engine = MotionEngine::new();
        engine.process(&config, 100, &[det(1, 0.0, 0.0)]);
        let events = engine.process(&config, 100, &[det(1, 500.0, 0.0)]);
        assert!(events.is_empty());
    }
}
