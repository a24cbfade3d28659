//! ABOUTME: Wire protocol (C1): binary frame envelope decode, JSON message encode
//! ABOUTME: Pure codec with no transport dependency; exercised directly against byte buffers

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Error codes carried on the wire. Distinct from `ev_core::Error`: this is the
/// small, stable vocabulary clients parse, not the internal Rust error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidFrameBinary,
    InvalidJson,
    InvalidImage,
    InvalidCommand,
    UnsupportedCommand,
    FrameBinaryRequired,
    Busy,
    InferenceError,
    InsightsDisabled,
    InsightCooldown,
    InsightBusy,
    NoTriggerFrame,
    NoClipFrames,
    InsightAssetWriteFailed,
    InsightDownsampleDecodeFailed,
    InsightDownsampleEncodeFailed,
    VisionAgentTimeout,
    VisionAgentUnreachable,
    VisionAgentError,
    VisionAgentInvalidResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single derived behavioral event, as emitted by C4-C7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub severity: Severity,
    pub data: serde_json::Value,
}

/// Required metadata fields for an inbound frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub v: u32,
    pub frame_id: String,
    pub ts_ms: u64,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub image_bytes: u32,
}

/// A decoded inbound frame: metadata plus the raw JPEG bytes.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub meta: FrameMeta,
    pub image: Bytes,
}

/// Decode a single binary frame envelope: `u32_BE length || JSON meta || JPEG`.
///
/// Any structural problem is reported as `ErrorCode::InvalidFrameBinary`, per
/// 4.1: short payload, `L=0`, `L > payload.len() - 4`, metadata not UTF-8/JSON,
/// schema mismatch, or a JPEG length mismatch.
pub fn decode_envelope(payload: &[u8]) -> Result<DecodedFrame, ErrorCode> {
    if payload.len() < 4 {
        return Err(ErrorCode::InvalidFrameBinary);
    }
    let len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if len == 0 {
        return Err(ErrorCode::InvalidFrameBinary);
    }
    if len > payload.len().saturating_sub(4) {
        return Err(ErrorCode::InvalidFrameBinary);
    }

    let meta_bytes = &payload[4..4 + len];
    let meta_str = std::str::from_utf8(meta_bytes).map_err(|_| ErrorCode::InvalidFrameBinary)?;
    let meta: FrameMeta =
        serde_json::from_str(meta_str).map_err(|_| ErrorCode::InvalidFrameBinary)?;

    if meta.kind != "frame_binary"
        || meta.v != PROTOCOL_VERSION
        || meta.frame_id.is_empty()
        || meta.mime != "image/jpeg"
        || meta.width < 1
        || meta.height < 1
        || meta.image_bytes < 1
    {
        return Err(ErrorCode::InvalidFrameBinary);
    }

    let image_start = 4 + len;
    let declared = meta.image_bytes as usize;
    if payload.len() - image_start != declared {
        return Err(ErrorCode::InvalidFrameBinary);
    }

    Ok(DecodedFrame {
        meta,
        image: Bytes::copy_from_slice(&payload[image_start..]),
    })
}

/// Inbound text command: the only supported command is `insight_test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// Parse an inbound text message, distinguishing a well-formed unsupported
/// command from malformed JSON/schema.
pub fn decode_command(text: &str) -> Result<CommandMessage, ErrorCode> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ErrorCode::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(ErrorCode::InvalidCommand)?;
    if kind != "command" {
        return Err(ErrorCode::FrameBinaryRequired);
    }
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or(ErrorCode::InvalidCommand)?;
    if name != "insight_test" {
        return Err(ErrorCode::UnsupportedCommand);
    }
    Ok(CommandMessage {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightSummary {
    pub one_liner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_response: Option<String>,
    pub what_changed: Vec<String>,
    pub severity: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Every outbound message, serialized as JSON text. `type` and `v` are always
/// present via `#[serde(tag = "type")]` plus a flattened version field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "hello")]
    Hello { v: u32, role: String, ts_ms: u64 },
    #[serde(rename = "frame_events")]
    FrameEvents {
        v: u32,
        frame_id: String,
        ts_ms: u64,
        width: u32,
        height: u32,
        events: Vec<Event>,
    },
    #[serde(rename = "detections")]
    Detections {
        v: u32,
        frame_id: String,
        ts_ms: u64,
        detections: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        events: Option<Vec<Event>>,
    },
    #[serde(rename = "insight")]
    Insight {
        v: u32,
        clip_id: String,
        trigger_frame_id: String,
        ts_ms: u64,
        summary: InsightSummary,
        usage: InsightUsage,
    },
    #[serde(rename = "error")]
    Error {
        v: u32,
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_id: Option<String>,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","v":1,"code":"INVALID_JSON","message":"serialization failure"}"#
                .to_string()
        })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, frame_id: Option<String>) -> Self {
        OutboundMessage::Error {
            v: PROTOCOL_VERSION,
            code,
            message: message.into(),
            frame_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_meta_json(frame_id: &str, image_bytes: u32) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "frame_binary",
            "v": 1,
            "frame_id": frame_id,
            "ts_ms": 0,
            "mime": "image/jpeg",
            "width": 10,
            "height": 10,
            "image_bytes": image_bytes,
        }))
        .unwrap()
    }

    fn build_envelope(frame_id: &str, jpeg: &[u8]) -> Vec<u8> {
        let meta = make_meta_json(frame_id, jpeg.len() as u32);
        let mut out = Vec::new();
        out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(jpeg);
        out
    }

    #[test]
    fn decodes_well_formed_envelope() {
        let jpeg = b"\xFF\xD8fake\xFF\xD9";
        let payload = build_envelope("f1", jpeg);
        let decoded = decode_envelope(&payload).unwrap();
        assert_eq!(decoded.meta.frame_id, "f1");
        assert_eq!(decoded.image.as_ref(), jpeg);
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(decode_envelope(&[1, 2]), Err(ErrorCode::InvalidFrameBinary));
    }

    #[test]
    fn rejects_zero_length() {
        let payload = [0u8, 0, 0, 0, 1, 2, 3];
        assert_eq!(decode_envelope(&payload), Err(ErrorCode::InvalidFrameBinary));
    }

    #[test]
    fn rejects_length_exceeding_payload() {
        let payload = [0u8, 0, 0, 10, 1, 2, 3];
        assert_eq!(decode_envelope(&payload), Err(ErrorCode::InvalidFrameBinary));
    }

    #[test]
    fn rejects_jpeg_length_mismatch() {
        let mut payload = build_envelope("f1", b"\xFF\xD8\xFF\xD9");
        payload.pop();
        assert_eq!(decode_envelope(&payload), Err(ErrorCode::InvalidFrameBinary));
    }

    #[test]
    fn rejects_non_utf8_metadata() {
        let mut payload = vec![0u8, 0, 0, 2];
        payload.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(decode_envelope(&payload), Err(ErrorCode::InvalidFrameBinary));
    }

    #[test]
    fn decodes_insight_test_command() {
        let cmd = decode_command(r#"{"type":"command","name":"insight_test"}"#).unwrap();
        assert_eq!(cmd.name, "insight_test");
    }

    #[test]
    fn rejects_unsupported_command() {
        let err = decode_command(r#"{"type":"command","name":"reboot"}"#).unwrap_err();
        assert_eq!(err, ErrorCode::UnsupportedCommand);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_command("not json").unwrap_err();
        assert_eq!(err, ErrorCode::InvalidJson);
    }

    #[test]
    fn hello_message_round_trips_through_json() {
        let msg = OutboundMessage::Hello {
            v: PROTOCOL_VERSION,
            role: "server".into(),
            ts_ms: 123,
        };
        let json = msg.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["v"], 1);
    }

    #[test]
    fn error_message_includes_code_and_optional_frame_id() {
        let msg = OutboundMessage::error(ErrorCode::Busy, "worker busy", Some("f1".into()));
        let json = msg.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["code"], "BUSY");
        assert_eq!(value["frame_id"], "f1");
    }
}
