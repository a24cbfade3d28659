//! ABOUTME: reqwest-backed vision-agent client with bearer auth and bounded retries
//! ABOUTME: Maps transport/HTTP/decode failures onto AgentError for the insight coordinator

use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{AgentError, AgentRequest, AgentResponse, VisionAgentClient};

const MAX_RETRIES: u32 = 2;

/// Talks to a real vision-agent HTTP endpoint (6. EXTERNAL INTERFACES).
pub struct ReqwestAgentClient {
    client: Client,
    agent_url: String,
    auth_token: Option<String>,
}

impl ReqwestAgentClient {
    pub fn new(agent_url: String, auth_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            agent_url,
            auth_token,
        }
    }

    async fn send_once(&self, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse, AgentError> {
        let mut builder = self
            .client
            .post(&self.agent_url)
            .timeout(timeout)
            .json(request);

        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                AgentError::Timeout
            } else {
                AgentError::Unreachable(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<serde_json::Value>().await {
                Ok(body) => body
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
                Err(_) => "unreadable error body".to_string(),
            };
            return Err(AgentError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<AgentResponse>()
            .await
            .map_err(|err| AgentError::InvalidResponse(err.to_string()))
    }
}

#[async_trait::async_trait]
impl VisionAgentClient for ReqwestAgentClient {
    async fn request_insight(
        &self,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentError> {
        let mut last_error = AgentError::Unreachable("no attempts made".to_string());

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (1 << attempt.min(5)));
                debug!(attempt, ?delay, "retrying vision agent request");
                sleep(delay).await;
            }

            match self.send_once(&request, timeout).await {
                Ok(response) => return Ok(response),
                Err(AgentError::Timeout) => return Err(AgentError::Timeout),
                Err(err @ AgentError::Http { status, .. }) if status < 500 => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "vision agent request attempt failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentFrame, VisionAgentClient};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn client_stores_configured_url_and_token() {
        let client = ReqwestAgentClient::new("http://localhost:9999/insight".to_string(), Some("tok".to_string()));
        assert_eq!(client.agent_url, "http://localhost:9999/insight");
        assert_eq!(client.auth_token.as_deref(), Some("tok"));
    }

    fn sample_request() -> AgentRequest {
        AgentRequest {
            clip_id: "clip-1".to_string(),
            trigger_frame_id: "f1".to_string(),
            frames: vec![AgentFrame {
                frame_id: "f1".to_string(),
                ts_ms: 0,
                mime: "image/jpeg".to_string(),
                image_b64: "".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn sends_bearer_auth_and_parses_a_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/insight"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": {
                    "one_liner": "a person entered",
                    "what_changed": ["presence"],
                    "severity": "info",
                    "tags": []
                },
                "usage": {"input_tokens": 10, "output_tokens": 5, "cost_usd": 0.01}
            })))
            .mount(&server)
            .await;

        let client = ReqwestAgentClient::new(format!("{}/insight", server.uri()), Some("tok".to_string()));
        let response = client.request_insight(sample_request(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.summary.one_liner, "a person entered");
    }

    #[tokio::test]
    async fn retries_a_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/insight"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/insight"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": {"one_liner": "ok", "what_changed": [], "severity": "info", "tags": []},
                "usage": {"input_tokens": 1, "output_tokens": 1, "cost_usd": 0.0}
            })))
            .mount(&server)
            .await;

        let client = ReqwestAgentClient::new(format!("{}/insight", server.uri()), None);
        let response = client.request_insight(sample_request(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.summary.one_liner, "ok");
    }

    #[tokio::test]
    async fn does_not_retry_a_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/insight"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "bad clip"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestAgentClient::new(format!("{}/insight", server.uri()), None);
        let err = client.request_insight(sample_request(), Duration::from_secs(1)).await.unwrap_err();
        match err {
            AgentError::Http { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad clip");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
