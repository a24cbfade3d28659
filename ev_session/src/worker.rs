//! ABOUTME: The single inference worker (C9): pending-slot consumer driving C3 then C4-C7
//! ABOUTME: Owns the only mutable handles on the per-connection engines; never shared elsewhere

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ev_abandoned::AbandonedEngine;
use ev_collision::CollisionEngine;
use ev_detect::{normalize, DetectorAdapter};
use ev_insights::InsightCoordinator;
use ev_motion::MotionEngine;
use ev_protocol::{ErrorCode, Event, OutboundMessage};
use ev_roi::RoiEngine;
use ev_stream::{BufferedFrame, FrameBuffer, FrameMetadata};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::SessionConfig;
use crate::scheduler::OutboundSink;

/// A frame handed from the connection's ingress to the inference worker.
pub(crate) struct PendingFrame {
    pub seq: u64,
    pub image: Bytes,
    pub frame_id: String,
    pub ts_ms: u64,
    pub width: u32,
    pub height: u32,
}

/// The single-entry mailbox (3. DATA MODEL: "Pending slot") through which
/// ingress delivers the next frame to the inference worker.
#[derive(Default)]
pub(crate) struct Slot {
    frame: std::sync::Mutex<Option<PendingFrame>>,
    notify: Notify,
}

impl Slot {
    pub(crate) fn replace(&self, frame: PendingFrame) {
        *self.frame.lock().unwrap() = Some(frame);
        self.notify.notify_one();
    }

    /// Returns `true` if a frame was accepted, `false` if the slot was
    /// already occupied (the caller should report `BUSY`).
    pub(crate) fn try_fill(&self, frame: PendingFrame) -> bool {
        let mut guard = self.frame.lock().unwrap();
        if guard.is_some() {
            return false;
        }
        *guard = Some(frame);
        drop(guard);
        self.notify.notify_one();
        true
    }

    fn take(&self) -> Option<PendingFrame> {
        self.frame.lock().unwrap().take()
    }
}

/// Everything the worker and the spawned insight tasks need, shared via `Arc`.
pub(crate) struct WorkerCtx {
    pub config: SessionConfig,
    pub detector: Arc<dyn DetectorAdapter>,
    pub insights: Arc<InsightCoordinator>,
    pub buffer: Arc<FrameBuffer>,
    pub sink: Arc<dyn OutboundSink>,
    pub roi: Mutex<RoiEngine>,
    pub motion: Mutex<MotionEngine>,
    pub collision: Mutex<CollisionEngine>,
    pub abandoned: Mutex<AbandonedEngine>,
    pub auto_insight_inflight: AtomicBool,
}

impl WorkerCtx {
    pub fn new(
        config: SessionConfig,
        detector: Arc<dyn DetectorAdapter>,
        insights: Arc<InsightCoordinator>,
        buffer: Arc<FrameBuffer>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            config,
            detector,
            insights,
            buffer,
            sink,
            roi: Mutex::new(RoiEngine::new()),
            motion: Mutex::new(MotionEngine::new()),
            collision: Mutex::new(CollisionEngine::new()),
            abandoned: Mutex::new(AbandonedEngine::new()),
            auto_insight_inflight: AtomicBool::new(false),
        }
    }
}

/// Error-code-specific text surfaced to the client. The codes themselves are
/// the stable contract (7. ERROR HANDLING DESIGN); these strings are not.
pub(crate) fn message_for_code(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::InvalidFrameBinary => "malformed frame envelope",
        ErrorCode::InvalidJson => "malformed JSON text message",
        ErrorCode::InvalidImage => "failed to decode JPEG image",
        ErrorCode::InvalidCommand => "malformed command",
        ErrorCode::UnsupportedCommand => "unsupported command",
        ErrorCode::FrameBinaryRequired => "binary frame envelope required",
        ErrorCode::Busy => "inference worker busy",
        ErrorCode::InferenceError => "detector inference failed",
        ErrorCode::InsightsDisabled => "insights are disabled",
        ErrorCode::InsightCooldown => "insight cooldown active",
        ErrorCode::InsightBusy => "a manual insight is already in flight",
        ErrorCode::NoTriggerFrame => "no frame available to trigger an insight",
        ErrorCode::NoClipFrames => "clip assembly produced no frames",
        ErrorCode::InsightAssetWriteFailed => "failed to persist clip asset",
        ErrorCode::InsightDownsampleDecodeFailed => "failed to decode clip frame for downsampling",
        ErrorCode::InsightDownsampleEncodeFailed => "failed to re-encode downsampled clip frame",
        ErrorCode::VisionAgentTimeout => "vision agent request timed out",
        ErrorCode::VisionAgentUnreachable => "vision agent unreachable",
        ErrorCode::VisionAgentError => "vision agent returned an error",
        ErrorCode::VisionAgentInvalidResponse => "vision agent response was malformed",
    }
}

/// Auto-insight failures in these categories are never surfaced to the
/// client (7. ERROR HANDLING DESIGN).
fn is_suppressed_for_auto(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::InsightCooldown | ErrorCode::NoTriggerFrame | ErrorCode::InsightsDisabled
    )
}

fn to_protocol_summary(summary: ev_agent::AgentSummary) -> ev_protocol::InsightSummary {
    ev_protocol::InsightSummary {
        one_liner: summary.one_liner,
        tts_response: summary.tts_response,
        what_changed: summary.what_changed,
        severity: summary.severity,
        tags: summary.tags,
    }
}

fn to_protocol_usage(usage: ev_agent::AgentUsage) -> ev_protocol::InsightUsage {
    ev_protocol::InsightUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cost_usd: usage.cost_usd,
    }
}

/// Runs until its `JoinHandle` is aborted at connection shutdown.
pub(crate) fn spawn_inference_worker(ctx: Arc<WorkerCtx>, slot: Arc<Slot>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = loop {
                if let Some(frame) = slot.take() {
                    break frame;
                }
                slot.notify.notified().await;
            };

            running.store(true, Ordering::SeqCst);
            process_frame(&ctx, frame).await;
            running.store(false, Ordering::SeqCst);
        }
    })
}

async fn process_frame(ctx: &Arc<WorkerCtx>, frame: PendingFrame) {
    if image::load_from_memory_with_format(&frame.image, image::ImageFormat::Jpeg).is_err() {
        send_error(ctx, ErrorCode::InvalidImage, Some(frame.frame_id.clone())).await;
        return;
    }

    let raw = match ctx
        .detector
        .infer(&frame.frame_id, &frame.image, frame.width, frame.height)
        .await
    {
        Ok(raw) => raw,
        Err(err) => {
            warn!(frame_id = %frame.frame_id, error = %err, "detector inference failed");
            send_error(ctx, ErrorCode::InferenceError, Some(frame.frame_id.clone())).await;
            return;
        }
    };

    let normalized = normalize(raw, frame.width, frame.height, ctx.config.tracking.enabled);

    let mut events: Vec<Event> = Vec::new();
    {
        let mut roi = ctx.roi.lock().await;
        events.extend(roi.process(&ctx.config.roi, frame.ts_ms, &normalized.detections));
    }
    {
        let mut motion = ctx.motion.lock().await;
        events.extend(motion.process(&ctx.config.motion, frame.ts_ms, &normalized.detections));
    }
    {
        let mut collision = ctx.collision.lock().await;
        events.extend(collision.process(&ctx.config.collision, frame.ts_ms, &normalized.detections));
    }
    {
        let mut abandoned = ctx.abandoned.lock().await;
        events.extend(abandoned.process(&ctx.config.abandoned, frame.ts_ms, &normalized.detections));
    }

    let outbound = if ctx.config.tracking.enabled {
        OutboundMessage::FrameEvents {
            v: ev_protocol::PROTOCOL_VERSION,
            frame_id: frame.frame_id.clone(),
            ts_ms: frame.ts_ms,
            width: frame.width,
            height: frame.height,
            events: events.clone(),
        }
    } else {
        OutboundMessage::Detections {
            v: ev_protocol::PROTOCOL_VERSION,
            frame_id: frame.frame_id.clone(),
            ts_ms: frame.ts_ms,
            detections: serde_json::to_value(&normalized.detections).unwrap_or(serde_json::Value::Null),
            events: if events.is_empty() { None } else { Some(events.clone()) },
        }
    };
    ctx.sink.send(outbound.to_json()).await;

    if events.is_empty() {
        return;
    }

    let score = ctx.insights.score(&events);
    if !ctx.insights.should_auto_trigger(score, frame.ts_ms).await {
        return;
    }
    if ctx
        .auto_insight_inflight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // Only one auto-insight task may be in flight per connection (4.8).
        return;
    }

    let trigger = BufferedFrame::new(
        frame.image.clone(),
        FrameMetadata {
            frame_id: frame.frame_id.clone(),
            ts_ms: frame.ts_ms,
            seq: frame.seq,
            width: frame.width,
            height: frame.height,
        },
    );
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let now_ms = frame.ts_ms;
        let result = ctx.insights.auto_insight(&ctx.buffer, trigger, now_ms).await;
        match result {
            Ok(outcome) => {
                ctx.sink
                    .send(
                        OutboundMessage::Insight {
                            v: ev_protocol::PROTOCOL_VERSION,
                            clip_id: outcome.clip_id,
                            trigger_frame_id: outcome.trigger_frame_id,
                            ts_ms: outcome.ts_ms,
                            summary: to_protocol_summary(outcome.summary),
                            usage: to_protocol_usage(outcome.usage),
                        }
                        .to_json(),
                    )
                    .await;
            }
            Err(code) => {
                if !is_suppressed_for_auto(code) {
                    send_error(&ctx, code, None).await;
                }
            }
        }
        ctx.auto_insight_inflight.store(false, Ordering::SeqCst);
    });
}

async fn send_error(ctx: &Arc<WorkerCtx>, code: ErrorCode, frame_id: Option<String>) {
    ctx.sink
        .send(OutboundMessage::error(code, message_for_code(code), frame_id).to_json())
        .await;
}
