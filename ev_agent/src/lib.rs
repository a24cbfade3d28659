//! ABOUTME: Vision-agent HTTP contract (C8 external call): request/response types and client trait
//! ABOUTME: `ReqwestAgentClient` (feature `agent_online`) talks to a real endpoint; `StubAgentClient` is always available

#[cfg(feature = "agent_online")]
pub mod reqwest_client;
pub mod stub;

#[cfg(feature = "agent_online")]
pub use reqwest_client::ReqwestAgentClient;
pub use stub::StubAgentClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One frame of a clip, as sent to the external vision agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentFrame {
    pub frame_id: String,
    pub ts_ms: u64,
    pub mime: String,
    pub image_b64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub clip_id: String,
    pub trigger_frame_id: String,
    pub frames: Vec<AgentFrame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSummary {
    pub one_liner: String,
    #[serde(default)]
    pub tts_response: Option<String>,
    pub what_changed: Vec<String>,
    pub severity: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponse {
    pub summary: AgentSummary,
    pub usage: AgentUsage,
}

/// Failure taxonomy for a vision-agent call, mirroring the wire error codes
/// `VISION_AGENT_*` (4.8/7) without depending on the protocol crate.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("vision agent request timed out")]
    Timeout,
    #[error("vision agent unreachable: {0}")]
    Unreachable(String),
    #[error("vision agent returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("vision agent response was malformed: {0}")]
    InvalidResponse(String),
}

/// Contract for the external vision-agent HTTP endpoint (6. EXTERNAL INTERFACES).
#[async_trait]
pub trait VisionAgentClient: Send + Sync {
    async fn request_insight(
        &self,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentError>;
}

/// Build a client for the configured agent: the real `reqwest`-backed
/// implementation when `agent_online` is enabled and online mode is
/// requested, the deterministic stub otherwise (tests, offline operation).
#[cfg(feature = "agent_online")]
pub fn create_client(agent_url: String, auth_token: Option<String>, use_online: bool) -> Box<dyn VisionAgentClient> {
    if use_online {
        Box::new(ReqwestAgentClient::new(agent_url, auth_token))
    } else {
        Box::new(StubAgentClient::default())
    }
}

#[cfg(not(feature = "agent_online"))]
pub fn create_client(_agent_url: String, _auth_token: Option<String>, _use_online: bool) -> Box<dyn VisionAgentClient> {
    tracing::warn!("agent_online feature not compiled in, falling back to stub vision-agent client");
    Box::new(StubAgentClient::default())
}
