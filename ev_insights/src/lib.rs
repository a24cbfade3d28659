//! ABOUTME: Surprise scoring, clip assembly, asset persistence and the vision-agent call (C8)
//! ABOUTME: Stateless with respect to any single connection's scheduling; cooldowns are the only state

pub mod assets;
pub mod downsample;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use ev_agent::{AgentError, AgentFrame, AgentRequest, VisionAgentClient};
use ev_protocol::{Event, ErrorCode};
use ev_stream::{BufferedFrame, FrameBuffer};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SurpriseConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub cooldown_ms: u64,
    pub weights: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct DownsampleConfig {
    pub enabled: bool,
    pub max_dim: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct InsightsConfig {
    pub enabled: bool,
    pub assets_dir: PathBuf,
    pub max_clips: usize,
    pub max_age_hours: u64,
    pub timeout_ms: u64,
    pub max_frames: usize,
    pub pre_frames: usize,
    pub post_frames: usize,
    pub insight_cooldown_ms: u64,
    pub downsample: DownsampleConfig,
}

/// `score = sum(weight(event.name))`, 0 for any event name absent from `weights` (4.8).
pub fn score_surprise(events: &[Event], weights: &HashMap<String, f64>) -> f64 {
    events
        .iter()
        .map(|event| weights.get(&event.name).copied().unwrap_or(0.0))
        .sum()
}

#[derive(Debug, Clone)]
pub struct InsightOutcome {
    pub clip_id: String,
    pub trigger_frame_id: String,
    pub ts_ms: u64,
    pub summary: ev_agent::AgentSummary,
    pub usage: ev_agent::AgentUsage,
}

fn map_agent_error(err: AgentError) -> ErrorCode {
    match err {
        AgentError::Timeout => ErrorCode::VisionAgentTimeout,
        AgentError::Unreachable(_) => ErrorCode::VisionAgentUnreachable,
        AgentError::Http { .. } => ErrorCode::VisionAgentError,
        AgentError::InvalidResponse(_) => ErrorCode::VisionAgentInvalidResponse,
    }
}

/// Owns the surprise/insight cooldown clocks and the clip-assembly/agent-call
/// pipeline. One instance per connection; in-flight gating (at most one
/// manual and one auto insight task concurrently) is the scheduler's job, not
/// this coordinator's -- it is a property of how many tasks call into it, not
/// of its own state.
pub struct InsightCoordinator {
    config: InsightsConfig,
    surprise: SurpriseConfig,
    client: Arc<dyn VisionAgentClient>,
    last_insight_ts: Mutex<Option<u64>>,
    last_surprise_trigger_ts: Mutex<Option<u64>>,
}

impl InsightCoordinator {
    pub fn new(config: InsightsConfig, surprise: SurpriseConfig, client: Arc<dyn VisionAgentClient>) -> Self {
        Self {
            config,
            surprise,
            client,
            last_insight_ts: Mutex::new(None),
            last_surprise_trigger_ts: Mutex::new(None),
        }
    }

    pub fn score(&self, events: &[Event]) -> f64 {
        score_surprise(events, &self.surprise.weights)
    }

    /// Decide whether a just-processed frame's score should schedule an
    /// auto-insight. Claims the surprise-cooldown slot on success so a caller
    /// never needs to re-check before spawning the auto-insight task.
    pub async fn should_auto_trigger(&self, score: f64, now_ms: u64) -> bool {
        if !self.surprise.enabled || score < self.surprise.threshold {
            return false;
        }
        let mut last_surprise = self.last_surprise_trigger_ts.lock().await;
        if let Some(prev) = *last_surprise {
            if now_ms.saturating_sub(prev) < self.surprise.cooldown_ms {
                return false;
            }
        }
        let last_insight = self.last_insight_ts.lock().await;
        if let Some(prev) = *last_insight {
            if now_ms.saturating_sub(prev) < self.config.insight_cooldown_ms {
                return false;
            }
        }
        *last_surprise = Some(now_ms);
        true
    }

    /// Manual (`insight_test`) trigger: use the buffer's most recent frame.
    pub async fn manual_insight(&self, buffer: &FrameBuffer, now_ms: u64) -> Result<InsightOutcome, ErrorCode> {
        if !self.config.enabled {
            return Err(ErrorCode::InsightsDisabled);
        }
        self.check_insight_cooldown(now_ms).await?;
        let trigger = buffer.latest().await.ok_or(ErrorCode::NoTriggerFrame)?;
        self.assemble_and_run(buffer, trigger, now_ms).await
    }

    /// Auto trigger with an already-known trigger frame; cooldown/threshold
    /// gating was already performed by [`Self::should_auto_trigger`].
    pub async fn auto_insight(
        &self,
        buffer: &FrameBuffer,
        trigger: BufferedFrame,
        now_ms: u64,
    ) -> Result<InsightOutcome, ErrorCode> {
        if !self.config.enabled {
            return Err(ErrorCode::InsightsDisabled);
        }
        self.assemble_and_run(buffer, trigger, now_ms).await
    }

    async fn check_insight_cooldown(&self, now_ms: u64) -> Result<(), ErrorCode> {
        let last_insight = self.last_insight_ts.lock().await;
        if let Some(prev) = *last_insight {
            if now_ms.saturating_sub(prev) < self.config.insight_cooldown_ms {
                return Err(ErrorCode::InsightCooldown);
            }
        }
        Ok(())
    }

    async fn assemble_and_run(
        &self,
        buffer: &FrameBuffer,
        trigger: BufferedFrame,
        now_ms: u64,
    ) -> Result<InsightOutcome, ErrorCode> {
        let max_frames = self.config.max_frames.clamp(1, 6);
        let pre_frames = self.config.pre_frames.min(max_frames - 1);
        let post_frames = self.config.post_frames.min(max_frames - 1);

        let pre = buffer.collect_pre(trigger.seq(), pre_frames).await;
        let post = buffer
            .await_post(trigger.seq(), post_frames, Duration::from_millis(self.config.timeout_ms))
            .await;

        let mut clip_frames: Vec<BufferedFrame> = Vec::with_capacity(pre.len() + 1 + post.len());
        clip_frames.extend(pre);
        clip_frames.push(trigger.clone());
        clip_frames.extend(post);
        clip_frames.truncate(max_frames);

        if clip_frames.is_empty() {
            return Err(ErrorCode::NoClipFrames);
        }

        let clip_id = ulid::Ulid::new().to_string();
        let mut agent_frames = Vec::with_capacity(clip_frames.len());

        for (index, frame) in clip_frames.iter().enumerate() {
            let jpeg: Vec<u8> = if self.config.downsample.enabled {
                downsample::downsample_jpeg(&frame.data, self.config.downsample.max_dim, self.config.downsample.jpeg_quality)?
            } else {
                frame.data.to_vec()
            };

            assets::write_clip_frame(&self.config.assets_dir, &clip_id, index, &frame.metadata.frame_id, &jpeg).await?;

            agent_frames.push(AgentFrame {
                frame_id: frame.metadata.frame_id.clone(),
                ts_ms: frame.metadata.ts_ms,
                mime: "image/jpeg".to_string(),
                image_b64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
            });
        }

        assets::prune_assets(&self.config.assets_dir, &clip_id, self.config.max_clips, self.config.max_age_hours).await;

        let request = AgentRequest {
            clip_id: clip_id.clone(),
            trigger_frame_id: trigger.metadata.frame_id.clone(),
            frames: agent_frames,
        };

        let response = self
            .client
            .request_insight(request, Duration::from_millis(self.config.timeout_ms))
            .await
            .map_err(map_agent_error)?;

        *self.last_insight_ts.lock().await = Some(now_ms);

        Ok(InsightOutcome {
            clip_id,
            trigger_frame_id: trigger.metadata.frame_id.clone(),
            ts_ms: now_ms,
            summary: response.summary,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ev_agent::StubAgentClient;
    use ev_protocol::Severity;

    fn test_config(assets_dir: PathBuf) -> InsightsConfig {
        InsightsConfig {
            enabled: true,
            assets_dir,
            max_clips: 10,
            max_age_hours: 24,
            timeout_ms: 200,
            max_frames: 6,
            pre_frames: 2,
            post_frames: 1,
            insight_cooldown_ms: 5000,
            downsample: DownsampleConfig {
                enabled: false,
                max_dim: 640,
                jpeg_quality: 80,
            },
        }
    }

    fn test_surprise() -> SurpriseConfig {
        let mut weights = HashMap::new();
        weights.insert("near_collision".to_string(), 5.0);
        SurpriseConfig {
            enabled: true,
            threshold: 5.0,
            cooldown_ms: 10_000,
            weights,
        }
    }

    fn sample_jpeg() -> Bytes {
        let img = image::RgbImage::from_pixel(20, 20, image::Rgb([10, 20, 30]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(buffer)
    }

    fn temp_assets_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ev-insights-lib-test-{}", ulid::Ulid::new()))
    }

    #[test]
    fn scores_only_weighted_event_names() {
        let mut weights = HashMap::new();
        weights.insert("near_collision".to_string(), 5.0);
        let events = vec![
            Event { name: "near_collision".to_string(), severity: Severity::High, data: serde_json::json!({}) },
            Event { name: "roi_enter".to_string(), severity: Severity::Low, data: serde_json::json!({}) },
        ];
        assert_eq!(score_surprise(&events, &weights), 5.0);
    }

    #[tokio::test]
    async fn manual_insight_fails_without_trigger_frame() {
        let dir = temp_assets_dir();
        let coordinator = InsightCoordinator::new(
            test_config(dir.clone()),
            test_surprise(),
            Arc::new(StubAgentClient::default()),
        );
        let buffer = FrameBuffer::new();
        let err = coordinator.manual_insight(&buffer, 0).await.unwrap_err();
        assert_eq!(err, ErrorCode::NoTriggerFrame);
    }

    #[tokio::test]
    async fn manual_insight_succeeds_and_persists_assets() {
        let dir = temp_assets_dir();
        let coordinator = InsightCoordinator::new(
            test_config(dir.clone()),
            test_surprise(),
            Arc::new(StubAgentClient::default()),
        );
        let buffer = FrameBuffer::new();
        buffer.add(sample_jpeg(), "f1".into(), 0, 20, 20).await;

        let outcome = coordinator.manual_insight(&buffer, 1000).await.unwrap();
        assert_eq!(outcome.trigger_frame_id, "f1");
        assert!(outcome.summary.one_liner.contains("f1"));

        let clip_dir = dir.join(&outcome.clip_id);
        assert!(clip_dir.exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn manual_insight_honors_cooldown() {
        let dir = temp_assets_dir();
        let coordinator = InsightCoordinator::new(
            test_config(dir.clone()),
            test_surprise(),
            Arc::new(StubAgentClient::default()),
        );
        let buffer = FrameBuffer::new();
        buffer.add(sample_jpeg(), "f1".into(), 0, 20, 20).await;

        coordinator.manual_insight(&buffer, 1000).await.unwrap();
        let err = coordinator.manual_insight(&buffer, 2000).await.unwrap_err();
        assert_eq!(err, ErrorCode::InsightCooldown);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn should_auto_trigger_respects_threshold_and_surprise_cooldown() {
        let dir = temp_assets_dir();
        let coordinator = InsightCoordinator::new(
            test_config(dir.clone()),
            test_surprise(),
            Arc::new(StubAgentClient::default()),
        );
        assert!(!coordinator.should_auto_trigger(4.9, 0).await);
        assert!(coordinator.should_auto_trigger(5.0, 0).await);
        assert!(!coordinator.should_auto_trigger(5.0, 5000).await);
        assert!(coordinator.should_auto_trigger(5.0, 11_000).await);
    }
}
