//! ABOUTME: Zero-copy frame buffer management for the per-connection event pipeline
//! ABOUTME: Bounded FIFO of recent JPEG frames with pre/post-trigger clip assembly

use bytes::Bytes;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Capacity of the rolling frame buffer (BufferedFrame, 3. DATA MODEL).
pub const FRAME_BUFFER_CAPACITY: usize = 128;

/// Metadata associated with a buffered frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Opaque client-supplied identifier, not required to be unique.
    pub frame_id: String,
    /// Client-supplied timestamp in milliseconds.
    pub ts_ms: u64,
    /// Monotonically increasing sequence assigned on arrival, starting at 1.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
}

/// A single buffered frame: JPEG bytes shared via `Arc` so that clip assembly
/// and downsampling never copy the underlying bytes, only the handle.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub data: Arc<[u8]>,
    pub metadata: FrameMetadata,
}

impl BufferedFrame {
    pub fn new(data: Bytes, metadata: FrameMetadata) -> Self {
        Self {
            data: Arc::from(&data[..]),
            metadata,
        }
    }

    pub fn from_vec(data: Vec<u8>, metadata: FrameMetadata) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn seq(&self) -> u64 {
        self.metadata.seq
    }
}

/// An ordered selection of buffered frames around a trigger frame (4.8, 3.).
#[derive(Debug, Clone, Default)]
pub struct Clip {
    pub frames: Vec<BufferedFrame>,
}

impl Clip {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

struct Inner {
    frames: VecDeque<BufferedFrame>,
    next_seq: u64,
}

/// Bounded FIFO of capacity [`FRAME_BUFFER_CAPACITY`], keyed by monotonic sequence.
///
/// `add` assigns the next sequence number and notifies any task waiting on
/// `await_post` via an edge-triggered arrival signal that is cleared after
/// each wake, matching the "notify then re-check" idiom used throughout the
/// connection scheduler.
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    arrival: Notify,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(FRAME_BUFFER_CAPACITY),
                next_seq: 1,
            }),
            arrival: Notify::new(),
        }
    }

    /// Append a frame, assigning it the next sequence number, evicting the
    /// oldest entry if the buffer is at capacity.
    pub async fn add(&self, data: Bytes, frame_id: String, ts_ms: u64, width: u32, height: u32) -> u64 {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let metadata = FrameMetadata {
            frame_id,
            ts_ms,
            seq,
            width,
            height,
        };
        let frame = BufferedFrame::new(data, metadata);

        if inner.frames.len() >= FRAME_BUFFER_CAPACITY {
            inner.frames.pop_front();
        }
        inner.frames.push_back(frame);
        drop(inner);

        self.arrival.notify_waiters();
        seq
    }

    /// The most recently added frame, if any.
    pub async fn latest(&self) -> Option<BufferedFrame> {
        self.inner.lock().await.frames.back().cloned()
    }

    /// Up to `pre_frames` entries with `seq < trigger_seq`, in arrival order.
    pub async fn collect_pre(&self, trigger_seq: u64, pre_frames: usize) -> Vec<BufferedFrame> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<BufferedFrame> = inner
            .frames
            .iter()
            .filter(|f| f.seq() < trigger_seq)
            .cloned()
            .collect();
        if matching.len() > pre_frames {
            matching.drain(0..matching.len() - pre_frames);
        }
        matching
    }

    /// Up to `k` entries with `seq > trigger_seq`, currently in the buffer, in arrival order.
    pub async fn collect_post(&self, trigger_seq: u64, k: usize) -> Vec<BufferedFrame> {
        let inner = self.inner.lock().await;
        inner
            .frames
            .iter()
            .filter(|f| f.seq() > trigger_seq)
            .take(k)
            .cloned()
            .collect()
    }

    /// Block until either `k` post-trigger frames are available or `deadline`
    /// elapses, whichever comes first. Uses an edge-triggered notification
    /// cleared after each wake: a spurious wake simply causes a re-check.
    pub async fn await_post(&self, trigger_seq: u64, k: usize, deadline: Duration) -> Vec<BufferedFrame> {
        if k == 0 {
            return Vec::new();
        }
        let start = tokio::time::Instant::now();
        loop {
            let have = self.collect_post(trigger_seq, k).await;
            if have.len() >= k {
                return have;
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                debug!(trigger_seq, k, have = have.len(), "await_post deadline elapsed");
                return have;
            }
            let remaining = deadline - elapsed;
            tokio::select! {
                _ = self.arrival.notified() => {}
                _ = tokio::time::sleep(remaining) => {
                    return self.collect_post(trigger_seq, k).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(n: u8) -> Bytes {
        Bytes::from(vec![0xFF, 0xD8, n, 0xFF, 0xD9])
    }

    #[tokio::test]
    async fn assigns_strictly_increasing_sequence() {
        let buf = FrameBuffer::new();
        let s1 = buf.add(bytes(1), "f1".into(), 0, 10, 10).await;
        let s2 = buf.add(bytes(2), "f2".into(), 100, 10, 10).await;
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[tokio::test]
    async fn evicts_oldest_on_overflow() {
        let buf = FrameBuffer::new();
        for i in 0..(FRAME_BUFFER_CAPACITY as u64 + 10) {
            buf.add(bytes(1), format!("f{i}"), i * 10, 10, 10).await;
        }
        let inner = buf.inner.lock().await;
        assert_eq!(inner.frames.len(), FRAME_BUFFER_CAPACITY);
        assert_eq!(inner.frames.front().unwrap().seq(), 11);
    }

    #[tokio::test]
    async fn collect_pre_returns_last_n_before_trigger() {
        let buf = FrameBuffer::new();
        for i in 0..5u64 {
            buf.add(bytes(1), format!("f{i}"), i * 100, 10, 10).await;
        }
        // trigger at seq=5 (the 5th add), want 2 pre-frames
        let pre = buf.collect_pre(5, 2).await;
        assert_eq!(pre.len(), 2);
        assert_eq!(pre[0].seq(), 3);
        assert_eq!(pre[1].seq(), 4);
    }

    #[tokio::test]
    async fn collect_post_returns_up_to_k_after_trigger() {
        let buf = FrameBuffer::new();
        for i in 0..5u64 {
            buf.add(bytes(1), format!("f{i}"), i * 100, 10, 10).await;
        }
        let post = buf.collect_post(2, 10).await;
        assert_eq!(post.len(), 3);
        assert_eq!(post[0].seq(), 3);
    }

    #[tokio::test]
    async fn await_post_returns_immediately_when_already_available() {
        let buf = FrameBuffer::new();
        for i in 0..3u64 {
            buf.add(bytes(1), format!("f{i}"), i * 100, 10, 10).await;
        }
        let post = buf.await_post(1, 2, Duration::from_millis(50)).await;
        assert_eq!(post.len(), 2);
    }

    #[tokio::test]
    async fn await_post_wakes_on_arrival() {
        let buf = Arc::new(FrameBuffer::new());
        buf.add(bytes(1), "trigger".into(), 0, 10, 10).await;

        let buf2 = buf.clone();
        let waiter = tokio::spawn(async move { buf2.await_post(1, 1, Duration::from_secs(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        buf.add(bytes(1), "post".into(), 50, 10, 10).await;

        let post = waiter.await.unwrap();
        assert_eq!(post.len(), 1);
        assert_eq!(post[0].metadata.frame_id, "post");
    }

    #[tokio::test]
    async fn await_post_times_out_with_partial_result() {
        let buf = FrameBuffer::new();
        buf.add(bytes(1), "trigger".into(), 0, 10, 10).await;
        let post = buf.await_post(1, 3, Duration::from_millis(30)).await;
        assert!(post.is_empty());
    }
}
