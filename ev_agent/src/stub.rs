//! ABOUTME: Deterministic vision-agent client for tests and offline operation
//! ABOUTME: No network calls; returns a canned response keyed on the request's trigger frame

use async_trait::async_trait;
use std::time::Duration;

use crate::{AgentError, AgentRequest, AgentResponse, AgentSummary, AgentUsage, VisionAgentClient};

/// Always-available vision-agent client returning a fixed, deterministic summary.
#[derive(Debug, Default)]
pub struct StubAgentClient;

#[async_trait]
impl VisionAgentClient for StubAgentClient {
    async fn request_insight(
        &self,
        request: AgentRequest,
        _timeout: Duration,
    ) -> Result<AgentResponse, AgentError> {
        tracing::debug!(clip_id = %request.clip_id, frames = request.frames.len(), "stub vision agent responding");
        Ok(AgentResponse {
            summary: AgentSummary {
                one_liner: format!("Activity observed around frame {}", request.trigger_frame_id),
                tts_response: None,
                what_changed: vec!["scene_change".to_string()],
                severity: "info".to_string(),
                tags: vec!["stub".to_string()],
            },
            usage: AgentUsage {
                input_tokens: request.frames.len() as u64 * 100,
                output_tokens: 32,
                cost_usd: 0.0,
            },
        })
    }
}
