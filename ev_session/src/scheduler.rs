//! ABOUTME: Per-connection ingress loop (C9): envelope/command dispatch, busy policy, shutdown
//! ABOUTME: All outbound writes are serialized through a single `OutboundSink`, never interleaved

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use ev_detect::DetectorAdapter;
use ev_insights::InsightCoordinator;
use ev_protocol::{decode_command, decode_envelope, ErrorCode, OutboundMessage, PROTOCOL_VERSION};
use ev_stream::FrameBuffer;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::{BusyPolicy, SessionConfig};
use crate::worker::{message_for_code, spawn_inference_worker, PendingFrame, Slot, WorkerCtx};

/// Transport-level inbound message, decoupled from any specific WebSocket crate.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Binary(Bytes),
    Text(String),
}

/// Abstracts the outbound half of the connection. The scheduler is the only
/// caller that matters for ordering: concurrent tasks (worker, manual/auto
/// insight) all send through the same `Arc<dyn OutboundSink>`, and it is the
/// sink implementation's job to guarantee writes are never interleaved
/// (5. CONCURRENCY & RESOURCE MODEL's "send mutex").
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, text: String);
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns one connection's engines (via the worker context), pending slot, and
/// in-flight task bookkeeping. Never shared across connections.
pub struct ConnectionScheduler {
    ctx: Arc<WorkerCtx>,
    slot: Arc<Slot>,
    worker_running: Arc<AtomicBool>,
    manual_insight_inflight: Arc<AtomicBool>,
    manual_handle: Mutex<Option<JoinHandle<()>>>,
    role: String,
}

impl ConnectionScheduler {
    pub fn new(
        config: SessionConfig,
        detector: Arc<dyn DetectorAdapter>,
        insights: Arc<InsightCoordinator>,
        buffer: Arc<FrameBuffer>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerCtx::new(config, detector, insights, buffer, sink)),
            slot: Arc::new(Slot::default()),
            worker_running: Arc::new(AtomicBool::new(false)),
            manual_insight_inflight: Arc::new(AtomicBool::new(false)),
            manual_handle: Mutex::new(None),
            role: "server".to_string(),
        }
    }

    /// Drive the connection until `inbound` closes, then cancel every
    /// spawned task and return. Swallows cancellation: a task mid-HTTP-call
    /// is aborted without writing further messages (5. CONCURRENCY & RESOURCE MODEL).
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        self.send_hello().await;

        let worker_handle = spawn_inference_worker(self.ctx.clone(), self.slot.clone(), self.worker_running.clone());

        while let Some(message) = inbound.recv().await {
            match message {
                InboundMessage::Binary(payload) => self.handle_binary(payload).await,
                InboundMessage::Text(text) => self.handle_text(text).await,
            }
        }

        worker_handle.abort();
        let _ = worker_handle.await;

        if let Some(handle) = self.manual_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn send_hello(&self) {
        self.ctx
            .sink
            .send(
                OutboundMessage::Hello {
                    v: PROTOCOL_VERSION,
                    role: self.role.clone(),
                    ts_ms: now_ms(),
                }
                .to_json(),
            )
            .await;
    }

    async fn handle_binary(&self, payload: Bytes) {
        let decoded = match decode_envelope(&payload) {
            Ok(decoded) => decoded,
            Err(code) => {
                self.send_error(code, None).await;
                return;
            }
        };

        let seq = self
            .ctx
            .buffer
            .add(
                decoded.image.clone(),
                decoded.meta.frame_id.clone(),
                decoded.meta.ts_ms,
                decoded.meta.width,
                decoded.meta.height,
            )
            .await;

        let pending = PendingFrame {
            seq,
            image: decoded.image,
            frame_id: decoded.meta.frame_id,
            ts_ms: decoded.meta.ts_ms,
            width: decoded.meta.width,
            height: decoded.meta.height,
        };

        match self.ctx.config.tracking.busy_policy {
            BusyPolicy::Latest => self.slot.replace(pending),
            BusyPolicy::Drop => {
                let frame_id = pending.frame_id.clone();
                let busy = self.worker_running.load(Ordering::SeqCst);
                if busy || !self.slot.try_fill(pending) {
                    self.send_error(ErrorCode::Busy, Some(frame_id)).await;
                }
            }
        }
    }

    async fn handle_text(&self, text: String) {
        match decode_command(&text) {
            Ok(_command) => self.start_manual_insight().await,
            Err(code) => self.send_error(code, None).await,
        }
    }

    async fn start_manual_insight(&self) {
        if self
            .manual_insight_inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.send_error(ErrorCode::InsightBusy, None).await;
            return;
        }

        let ctx = self.ctx.clone();
        let inflight = self.manual_insight_inflight.clone();
        let now = now_ms();
        let handle = tokio::spawn(async move {
            match ctx.insights.manual_insight(&ctx.buffer, now).await {
                Ok(outcome) => {
                    ctx.sink
                        .send(
                            OutboundMessage::Insight {
                                v: PROTOCOL_VERSION,
                                clip_id: outcome.clip_id,
                                trigger_frame_id: outcome.trigger_frame_id,
                                ts_ms: outcome.ts_ms,
                                summary: ev_protocol::InsightSummary {
                                    one_liner: outcome.summary.one_liner,
                                    tts_response: outcome.summary.tts_response,
                                    what_changed: outcome.summary.what_changed,
                                    severity: outcome.summary.severity,
                                    tags: outcome.summary.tags,
                                },
                                usage: ev_protocol::InsightUsage {
                                    input_tokens: outcome.usage.input_tokens,
                                    output_tokens: outcome.usage.output_tokens,
                                    cost_usd: outcome.usage.cost_usd,
                                },
                            }
                            .to_json(),
                        )
                        .await;
                }
                Err(code) => {
                    // Manual triggers always surface their failure to the client (7.).
                    ctx.sink
                        .send(OutboundMessage::error(code, message_for_code(code), None).to_json())
                        .await;
                }
            }
            inflight.store(false, Ordering::SeqCst);
        });

        *self.manual_handle.lock().await = Some(handle);
    }

    async fn send_error(&self, code: ErrorCode, frame_id: Option<String>) {
        self.ctx
            .sink
            .send(OutboundMessage::error(code, message_for_code(code), frame_id).to_json())
            .await;
    }
}
