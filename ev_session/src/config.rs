//! ABOUTME: Translates validated ev_config settings into each engine's runtime config (C9)
//! ABOUTME: Named-ROI resolution for the abandoned engine lives here, not in ev_config or ev_abandoned

use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    Drop,
    Latest,
}

impl BusyPolicy {
    fn from_setting(value: &str) -> Self {
        match value {
            "latest" => BusyPolicy::Latest,
            _ => BusyPolicy::Drop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub busy_policy: BusyPolicy,
}

/// Everything the connection scheduler needs to drive C4-C7 for one connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tracking: TrackingConfig,
    pub roi: ev_roi::RoiConfig,
    pub motion: ev_motion::MotionConfig,
    pub collision: ev_collision::CollisionConfig,
    pub abandoned: ev_abandoned::AbandonedConfig,
}

fn build_roi_config(cfg: &ev_config::RoiConfig) -> ev_roi::RoiConfig {
    let regions = cfg
        .regions
        .iter()
        .map(|(name, r)| {
            (
                name.clone(),
                ev_roi::RoiRegion {
                    x1: r.x1,
                    y1: r.y1,
                    x2: r.x2,
                    y2: r.y2,
                    dwell_threshold_ms: r.dwell_threshold_ms,
                },
            )
        })
        .collect();
    let lines = cfg
        .lines
        .iter()
        .map(|(name, l)| (name.clone(), ev_roi::RoiLine { x1: l.x1, y1: l.y1, x2: l.x2, y2: l.y2 }))
        .collect();

    ev_roi::RoiConfig {
        enabled: cfg.enabled,
        regions,
        lines,
        dwell_default_threshold_ms: cfg.dwell.default_threshold_ms,
        transition_min_ms: cfg.transitions.min_transition_ms,
    }
}

fn build_motion_config(cfg: &ev_config::MotionConfig) -> ev_motion::MotionConfig {
    ev_motion::MotionConfig {
        enabled: cfg.enabled,
        history_frames: cfg.history_frames,
        sudden_motion_speed_px_s: cfg.sudden_motion_speed_px_s,
        stop_speed_px_s: cfg.stop_speed_px_s,
        stop_duration_ms: cfg.stop_duration_ms,
        event_cooldown_ms: cfg.event_cooldown_ms,
    }
}

fn build_collision_config(cfg: &ev_config::CollisionConfig) -> ev_collision::CollisionConfig {
    let pairs: HashSet<(String, String)> = cfg
        .pairs
        .iter()
        .map(|(a, b)| if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) })
        .collect();

    ev_collision::CollisionConfig {
        enabled: cfg.enabled,
        pairs,
        distance_px: cfg.distance_px,
        closing_speed_px_s: cfg.closing_speed_px_s,
        pair_cooldown_ms: cfg.pair_cooldown_ms,
    }
}

/// Resolve the abandoned engine's `roi: Option<String>` setting against the
/// ROI module's named regions, since the abandoned engine itself only knows
/// about raw bounds, not names.
fn build_abandoned_config(cfg: &ev_config::AbandonedConfig, roi: &ev_config::RoiConfig) -> ev_abandoned::AbandonedConfig {
    let roi_bounds = cfg.roi.as_ref().and_then(|name| roi.regions.get(name)).map(|r| (r.x1, r.y1, r.x2, r.y2));

    ev_abandoned::AbandonedConfig {
        enabled: cfg.enabled,
        object_classes: cfg.object_classes.clone(),
        roi_name: cfg.roi.clone(),
        roi: roi_bounds,
        associate_max_distance_px: cfg.associate_max_distance_px,
        associate_min_ms: cfg.associate_min_ms,
        abandon_delay_ms: cfg.abandon_delay_ms,
        stationary_max_move_px: cfg.stationary_max_move_px,
        event_cooldown_ms: cfg.event_cooldown_ms,
    }
}

pub fn build_session_config(cfg: &ev_config::Config) -> SessionConfig {
    SessionConfig {
        tracking: TrackingConfig {
            enabled: cfg.tracking.enabled,
            busy_policy: BusyPolicy::from_setting(&cfg.tracking.busy_policy),
        },
        roi: build_roi_config(&cfg.roi),
        motion: build_motion_config(&cfg.motion),
        collision: build_collision_config(&cfg.collision),
        abandoned: build_abandoned_config(&cfg.abandoned, &cfg.roi),
    }
}

pub fn build_insights_config(cfg: &ev_config::Config) -> ev_insights::InsightsConfig {
    ev_insights::InsightsConfig {
        enabled: cfg.insights.enabled,
        assets_dir: PathBuf::from(&cfg.insights.assets_dir),
        max_clips: cfg.insights.assets.max_clips as usize,
        max_age_hours: cfg.insights.assets.max_age_hours as u64,
        timeout_ms: cfg.insights.timeout_ms,
        max_frames: cfg.insights.max_frames as usize,
        pre_frames: cfg.insights.pre_frames as usize,
        post_frames: cfg.insights.post_frames as usize,
        insight_cooldown_ms: cfg.insights.insight_cooldown_ms,
        downsample: ev_insights::DownsampleConfig {
            enabled: cfg.insights.downsample.enabled,
            max_dim: cfg.insights.downsample.max_dim,
            jpeg_quality: cfg.insights.downsample.jpeg_quality,
        },
    }
}

pub fn build_surprise_config(cfg: &ev_config::SurpriseConfig) -> ev_insights::SurpriseConfig {
    ev_insights::SurpriseConfig {
        enabled: cfg.enabled,
        threshold: cfg.threshold,
        cooldown_ms: cfg.cooldown_ms,
        weights: cfg.weights.clone(),
    }
}
