//! ABOUTME: Collision engine (C6): per-pair distance/closing-speed state
//! ABOUTME: All-pairs scan each frame, cooldown-gated near_collision emission

use ev_detect::Detection;
use ev_protocol::{Event, Severity};
use std::collections::{HashMap, HashSet};

pub const PAIR_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct CollisionConfig {
    pub enabled: bool,
    /// Canonical (lexicographically sorted) class-name pairs eligible for collision checks.
    pub pairs: HashSet<(String, String)>,
    pub distance_px: f64,
    pub closing_speed_px_s: f64,
    pub pair_cooldown_ms: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pairs: HashSet::new(),
            distance_px: 90.0,
            closing_speed_px_s: 120.0,
            pair_cooldown_ms: 1_500,
        }
    }
}

fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn pair_key(a: i64, b: i64) -> (i64, i64) {
    (a.min(b), a.max(b))
}

#[derive(Debug, Clone, Default)]
struct PairState {
    last_distance_px: Option<f64>,
    last_ts_ms: Option<u64>,
    last_event_ts_ms: Option<u64>,
    last_seen_ts_ms: u64,
}

#[derive(Debug, Default)]
pub struct CollisionEngine {
    pairs: HashMap<(i64, i64), PairState>,
}

impl CollisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, config: &CollisionConfig, ts_ms: u64, detections: &[Detection]) -> Vec<Event> {
        if !config.enabled {
            return Vec::new();
        }
        let mut events = Vec::new();
        let samples: Vec<&Detection> = detections.iter().filter(|d| d.track_id.is_some()).collect();

        for i in 0..samples.len() {
            for j in (i + 1)..samples.len() {
                let a = samples[i];
                let b = samples[j];
                let (a_tid, b_tid) = (a.track_id.unwrap(), b.track_id.unwrap());
                if a_tid == b_tid {
                    continue;
                }
                let canon = canonical_pair(&a.name, &b.name);
                if !config.pairs.contains(&canon) {
                    continue;
                }

                let key = pair_key(a_tid, b_tid);
                let (ax, ay) = a.centroid();
                let (bx, by) = b.centroid();
                let d = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();

                let state = self.pairs.entry(key).or_default();
                let closing_speed = match (state.last_distance_px, state.last_ts_ms) {
                    (Some(prev_d), Some(prev_ts)) => {
                        let delta_t_ms = ts_ms as i64 - prev_ts as i64;
                        if delta_t_ms > 0 {
                            (prev_d - d) / (delta_t_ms as f64 / 1000.0)
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                };

                let cooldown_ok = match state.last_event_ts_ms {
                    Some(last) => ts_ms.saturating_sub(last) >= config.pair_cooldown_ms,
                    None => true,
                };

                if d <= config.distance_px && closing_speed >= config.closing_speed_px_s && cooldown_ok {
                    state.last_event_ts_ms = Some(ts_ms);
                    let (a_track_id, b_track_id) = (key.0, key.1);
                    let (a_class, b_class) = if a_tid == a_track_id {
                        (a.name.clone(), b.name.clone())
                    } else {
                        (b.name.clone(), a.name.clone())
                    };
                    events.push(Event {
                        name: "near_collision".to_string(),
                        severity: Severity::High,
                        data: serde_json::json!({
                            "a_track_id": a_track_id,
                            "b_track_id": b_track_id,
                            "a_class": a_class,
                            "b_class": b_class,
                            "distance_px": d,
                            "closing_speed_px_s": closing_speed,
                        }),
                    });
                }

                // Always update, regardless of whether the event fired.
                state.last_distance_px = Some(d);
                state.last_ts_ms = Some(ts_ms);
                state.last_seen_ts_ms = ts_ms;
            }
        }

        self.pairs
            .retain(|_, s| ts_ms.saturating_sub(s.last_seen_ts_ms) < PAIR_TTL_MS);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(track_id: i64, name: &str, cx: f64, cy: f64) -> Detection {
        Detection { cls_id: 0, name: name.into(), conf: 1.0, x1: cx, y1: cy, x2: cx, y2: cy, track_id: Some(track_id) }
    }

    fn config() -> CollisionConfig {
        let mut pairs = HashSet::new();
        pairs.insert(("person".to_string(), "person".to_string()));
        CollisionConfig { enabled: true, pairs, distance_px: 50.0, closing_speed_px_s: 100.0, pair_cooldown_ms: 1_000 }
    }

    #[test]
    fn s3_near_collision_sequence() {
        let config = config();
        let mut engine = CollisionEngine::new();

        let e0 = engine.process(&config, 0, &[det(1, "person", 0.0, 0.0), det(2, "person", 200.0, 0.0)]);
        assert!(e0.is_empty());

        let e100 = engine.process(&config, 100, &[det(1, "person", 0.0, 0.0), det(2, "person", 90.0, 0.0)]);
        assert!(e100.is_empty(), "distance 90 > 50, no emission yet");

        let e200 = engine.process(&config, 200, &[det(1, "person", 0.0, 0.0), det(2, "person", 40.0, 0.0)]);
        assert_eq!(e200.len(), 1);
        assert_eq!(e200[0].name, "near_collision");

        let e300 = engine.process(&config, 300, &[det(1, "person", 0.0, 0.0), det(2, "person", 10.0, 0.0)]);
        assert!(e300.is_empty(), "within pair_cooldown_ms, no second emission");
    }

    #[test]
    fn ignores_pairs_not_in_configured_set() {
        let config = config();
        let mut engine = CollisionEngine::new();
        let events = engine.process(&config, 0, &[det(1, "car", 0.0, 0.0), det(2, "car", 5.0, 0.0)]);
        assert!(events.is_empty());
    }

    #[test]
    fn updates_state_even_when_not_emitting() {
        let config = config();
        let mut engine = CollisionEngine::new();
        engine.process(&config, 0, &[det(1, "person", 0.0, 0.0), det(2, "person", 500.0, 0.0)]);
        assert_eq!(engine.pairs.len(), 1);
        let state = engine.pairs.values().next().unwrap();
        assert_eq!(state.last_distance_px, Some(500.0));
    }
}
