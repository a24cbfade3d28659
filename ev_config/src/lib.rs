//! ABOUTME: Layered, validated settings tree for every recognized component option (C10)
//! ABOUTME: `Config::load()` is fail-fast: invalid values never reach request time

use config::{Config as ConfigBuilder, Environment, File};
use ev_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub tracking: TrackingConfig,
    #[validate(nested)]
    pub roi: RoiConfig,
    #[validate(nested)]
    pub motion: MotionConfig,
    #[validate(nested)]
    pub collision: CollisionConfig,
    #[validate(nested)]
    pub abandoned: AbandonedConfig,
    #[validate(nested)]
    pub insights: InsightsConfig,
    #[validate(nested)]
    pub surprise: SurpriseConfig,
    #[validate(nested)]
    pub obs: ObsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1:8080".to_string() }
    }
}

fn validate_busy_policy(value: &str) -> std::result::Result<(), validator::ValidationError> {
    match value {
        "drop" | "latest" => Ok(()),
        _ => Err(validator::ValidationError::new("busy_policy_invalid")),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TrackingConfig {
    pub enabled: bool,
    #[validate(custom(function = "validate_busy_policy"))]
    pub busy_policy: String,
    pub persist: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { enabled: false, busy_policy: "drop".to_string(), persist: false }
    }
}

fn validate_regions(
    regions: &BTreeMap<String, RoiRegionSetting>,
) -> std::result::Result<(), validator::ValidationError> {
    for region in regions.values() {
        if region.x1 >= region.x2 || region.y1 >= region.y2 {
            return Err(validator::ValidationError::new("region_bounds"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoiRegionSetting {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub dwell_threshold_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoiLineSetting {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RoiDwellConfig {
    pub default_threshold_ms: u64,
}

impl Default for RoiDwellConfig {
    fn default() -> Self {
        Self { default_threshold_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RoiTransitionsConfig {
    pub min_transition_ms: u64,
}

impl Default for RoiTransitionsConfig {
    fn default() -> Self {
        Self { min_transition_ms: 250 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct RoiConfig {
    pub enabled: bool,
    #[validate(custom(function = "validate_regions"))]
    pub regions: BTreeMap<String, RoiRegionSetting>,
    pub lines: BTreeMap<String, RoiLineSetting>,
    #[validate(nested)]
    pub dwell: RoiDwellConfig,
    #[validate(nested)]
    pub transitions: RoiTransitionsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MotionConfig {
    pub enabled: bool,
    #[validate(range(min = 2))]
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

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CollisionConfig {
    pub enabled: bool,
    pub pairs: Vec<(String, String)>,
    pub distance_px: f64,
    pub closing_speed_px_s: f64,
    pub pair_cooldown_ms: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pairs: Vec::new(),
            distance_px: 90.0,
            closing_speed_px_s: 120.0,
            pair_cooldown_ms: 1_500,
        }
    }
}

fn validate_object_classes(classes: &[String]) -> std::result::Result<(), validator::ValidationError> {
    if classes.iter().any(|c| c == "person") {
        return Err(validator::ValidationError::new("object_classes_contains_person"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AbandonedConfig {
    pub enabled: bool,
    #[validate(custom(function = "validate_object_classes"))]
    pub object_classes: Vec<String>,
    pub roi: Option<String>,
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
            roi: None,
            associate_max_distance_px: 100.0,
            associate_min_ms: 1_000,
            abandon_delay_ms: 2_000,
            stationary_max_move_px: Some(30.0),
            event_cooldown_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AssetsConfig {
    #[validate(range(min = 1))]
    pub max_clips: u32,
    #[validate(range(min = 1))]
    pub max_age_hours: u32,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { max_clips: 100, max_age_hours: 24 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DownsampleConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub max_dim: u32,
    #[validate(range(min = 1, max = 100))]
    pub jpeg_quality: u8,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self { enabled: true, max_dim: 640, jpeg_quality: 80 }
    }
}

#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct InsightsConfig {
    pub enabled: bool,
    #[validate(length(min = 1))]
    pub agent_url: String,
    pub agent_auth_token: Option<String>,
    #[validate(length(min = 1))]
    pub assets_dir: String,
    #[validate(nested)]
    pub assets: AssetsConfig,
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    #[validate(range(min = 1, max = 6))]
    pub max_frames: u32,
    pub pre_frames: u32,
    pub post_frames: u32,
    pub insight_cooldown_ms: u64,
    #[validate(nested)]
    pub downsample: DownsampleConfig,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agent_url: "http://127.0.0.1:9100/v1/insight".to_string(),
            agent_auth_token: None,
            assets_dir: "./data/clips".to_string(),
            assets: AssetsConfig::default(),
            timeout_ms: 5_000,
            max_frames: 6,
            pre_frames: 2,
            post_frames: 2,
            insight_cooldown_ms: 10_000,
            downsample: DownsampleConfig::default(),
        }
    }
}

impl fmt::Debug for InsightsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsightsConfig")
            .field("enabled", &self.enabled)
            .field("agent_url", &self.agent_url)
            .field("agent_auth_token", &self.agent_auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("assets_dir", &self.assets_dir)
            .field("assets", &self.assets)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_frames", &self.max_frames)
            .field("pre_frames", &self.pre_frames)
            .field("post_frames", &self.post_frames)
            .field("insight_cooldown_ms", &self.insight_cooldown_ms)
            .field("downsample", &self.downsample)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SurpriseConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub cooldown_ms: u64,
    pub weights: HashMap<String, f64>,
}

impl Default for SurpriseConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        // Inherited from the original weighting scheme; inert unless an engine
        // in this deployment emits a `scene_change` event.
        weights.insert("scene_change".to_string(), 5.0);
        Self { enabled: false, threshold: 10.0, cooldown_ms: 10_000, weights }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ObsConfig {
    pub log_format: String,
    pub log_level: String,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self { log_format: "pretty".to_string(), log_level: "info".to_string() }
    }
}

impl Config {
    /// Load configuration from defaults, `config/settings.yaml`,
    /// `config/settings.local.yaml` (if present), then `EV_`-prefixed
    /// environment variables, validating the result before returning.
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        builder = builder
            .set_default("server.bind_addr", "127.0.0.1:8080")?
            .set_default("tracking.enabled", false)?
            .set_default("tracking.busy_policy", "drop")?
            .set_default("tracking.persist", false)?
            .set_default("roi.enabled", false)?
            .set_default("roi.dwell.default_threshold_ms", 5_000)?
            .set_default("roi.transitions.min_transition_ms", 250)?
            .set_default("motion.enabled", false)?
            .set_default("motion.history_frames", 5)?
            .set_default("motion.sudden_motion_speed_px_s", 400.0)?
            .set_default("motion.stop_speed_px_s", 5.0)?
            .set_default("motion.stop_duration_ms", 1_000)?
            .set_default("motion.event_cooldown_ms", 2_000)?
            .set_default("collision.enabled", false)?
            .set_default("collision.distance_px", 90.0)?
            .set_default("collision.closing_speed_px_s", 120.0)?
            .set_default("collision.pair_cooldown_ms", 1_500)?
            .set_default("abandoned.enabled", false)?
            .set_default("abandoned.associate_max_distance_px", 100.0)?
            .set_default("abandoned.associate_min_ms", 1_000)?
            .set_default("abandoned.abandon_delay_ms", 2_000)?
            .set_default("abandoned.stationary_max_move_px", 30.0)?
            .set_default("abandoned.event_cooldown_ms", 5_000)?
            .set_default("insights.enabled", false)?
            .set_default("insights.agent_url", "http://127.0.0.1:9100/v1/insight")?
            .set_default("insights.assets_dir", "./data/clips")?
            .set_default("insights.assets.max_clips", 100)?
            .set_default("insights.assets.max_age_hours", 24)?
            .set_default("insights.timeout_ms", 5_000)?
            .set_default("insights.max_frames", 6)?
            .set_default("insights.pre_frames", 2)?
            .set_default("insights.post_frames", 2)?
            .set_default("insights.insight_cooldown_ms", 10_000)?
            .set_default("insights.downsample.enabled", true)?
            .set_default("insights.downsample.max_dim", 640)?
            .set_default("insights.downsample.jpeg_quality", 80)?
            .set_default("surprise.enabled", false)?
            .set_default("surprise.threshold", 10.0)?
            .set_default("surprise.cooldown_ms", 10_000)?
            .set_default("surprise.weights.scene_change", 5.0)?
            .set_default("obs.log_format", "pretty")?
            .set_default("obs.log_level", "info")?;

        builder = builder.add_source(File::with_name("config/settings").required(false));
        builder = builder.add_source(File::with_name("config/settings.local").required(false));
        builder = builder.add_source(
            Environment::with_prefix("EV")
                .try_parsing(true)
                .separator("__"),
        );

        let built = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build config: {e}")))?;

        let parsed: Config = built
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize config: {e}")))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("config validation failed: {e}")))?;

        Ok(parsed)
    }
}
