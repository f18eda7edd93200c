use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, Stream};
use tokio::sync::watch;

use super::encoder::EncodedFrame;

type Slot = Option<Arc<EncodedFrame>>;

/// Creates the single-producer side of a session's frame feed and a
/// subscriber handle for consumers.
pub fn frame_feed() -> (FramePublisher, FrameSubscriber) {
    let (tx, rx) = watch::channel(None);
    (FramePublisher { tx, seq: 0 }, FrameSubscriber { rx })
}

/// Owned by the loop. Dropping it ends every consumer stream.
pub struct FramePublisher {
    tx: watch::Sender<Slot>,
    seq: u64,
}

impl FramePublisher {
    /// Replaces the latest frame. Consumers that fall behind skip frames
    /// instead of queueing them.
    pub fn publish(&mut self, jpeg: Vec<u8>) -> u64 {
        self.seq += 1;
        let frame = EncodedFrame {
            seq: self.seq,
            jpeg: Bytes::from(jpeg),
            captured_at: Utc::now(),
        };
        self.tx.send_replace(Some(Arc::new(frame)));
        self.seq
    }

    pub fn published(&self) -> u64 {
        self.seq
    }

    /// True while any subscriber handle is alive.
    pub fn is_observed(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

#[derive(Clone)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Slot>,
}

impl FrameSubscriber {
    pub fn latest(&self) -> Option<Arc<EncodedFrame>> {
        self.rx.borrow().clone()
    }

    /// True once the producing loop has gone away.
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Lazy sequence of frames, starting with the current one if any. It
    /// waits for each new frame and ends when the loop drops its publisher.
    pub fn frames(&self) -> impl Stream<Item = Arc<EncodedFrame>> + Send + 'static {
        let rx = self.rx.clone();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if first {
                let current = rx.borrow_and_update().clone();
                if let Some(frame) = current {
                    return Some((frame, (rx, false)));
                }
            }
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let next = rx.borrow_and_update().clone();
                if let Some(frame) = next {
                    return Some((frame, (rx, false)));
                }
            }
        })
    }
}
