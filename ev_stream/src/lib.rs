//! ABOUTME: Bounded frame buffer (C2) and pre/post-trigger clip assembly
//! ABOUTME: Owned per-connection; no buffer is shared across connections

pub mod frame_buffer;

pub use frame_buffer::{BufferedFrame, Clip, FrameBuffer, FrameMetadata, FRAME_BUFFER_CAPACITY};
