//! ABOUTME: Connection scheduler (C9): per-connection orchestration of C3-C8
//! ABOUTME: Pending-slot inference worker, manual/auto insight tasks, single-writer outbound sink

pub mod config;
mod scheduler;
mod worker;

pub use config::{
    build_insights_config, build_session_config, build_surprise_config, BusyPolicy, SessionConfig,
    TrackingConfig,
};
pub use scheduler::{ConnectionScheduler, InboundMessage, OutboundSink};
