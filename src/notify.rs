//! Change notifications for timeline consumers.
//!
//! Renderers subscribe to a [`NoticeHub`] and re-read the snapshot whenever a
//! [`FeedNotice`] arrives. Each subscriber gets a bounded channel; a consumer
//! that stops draining is dropped rather than stalling the feed.

use crate::buffer::BufferChange;
use crate::types::SubjectId;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-subscriber buffer.
pub const DEFAULT_NOTICE_BUFFER: usize = 256;

/// Display-level state of a timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No subject selected.
    Idle,
    /// Historic fetch outstanding.
    Loading,
    /// Seeded; live events (if any) are flowing.
    Ready,
    /// Historic fetch failed; the buffer is empty.
    Failed(String),
    /// Live feed dropped; the buffer keeps its last items.
    Stopped(String),
}

/// Notices delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedNotice {
    /// Buffer cleared for a subject switch.
    Reset,
    /// Historic events installed.
    Seeded { len: usize, evicted: usize },
    /// One event merged into the buffer.
    Inserted { index: usize, evicted: usize },
    /// A live event was staged; `pending` is the new queue length.
    Staged { pending: usize },
    /// Staged events were folded in.
    Flushed { count: usize },
    /// The active subject changed.
    Subject { subject: SubjectId, generation: u64 },
    Status { status: FeedStatus },
    /// Sent to a subscriber right before it is removed.
    Dropped { reason: DropReason },
}

impl From<&BufferChange> for FeedNotice {
    fn from(change: &BufferChange) -> Self {
        match *change {
            BufferChange::Reset => FeedNotice::Reset,
            BufferChange::Seeded { len, evicted } => FeedNotice::Seeded { len, evicted },
            BufferChange::Inserted { index, evicted } => FeedNotice::Inserted { index, evicted },
        }
    }
}

/// Why a subscriber was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a notice subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoticeId(pub u64);

/// Receiving end of a notice subscription.
pub struct NoticeHandle {
    pub id: NoticeId,
    pub receiver: Receiver<FeedNotice>,
}

impl NoticeHandle {
    /// Receive without blocking.
    pub fn try_recv(&self) -> Result<FeedNotice, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FeedNotice, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<FeedNotice> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of feed notices to any number of subscribers.
pub struct NoticeHub {
    subscribers: RwLock<HashMap<NoticeId, Sender<FeedNotice>>>,
    next_id: AtomicU64,
}

impl NoticeHub {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe with the given per-subscriber buffer size.
    pub fn subscribe(&self, buffer_size: usize) -> NoticeHandle {
        let id = NoticeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size.max(1));
        self.subscribers.write().insert(id, sender);
        NoticeHandle { id, receiver }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: NoticeId) {
        if let Some(sender) = self.subscribers.write().remove(&id) {
            let _ = sender.try_send(FeedNotice::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Send to every subscriber, removing those that are full or gone.
    pub fn broadcast(&self, notice: FeedNotice) {
        let mut to_remove = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, sender) in subscribers.iter() {
                match sender.try_send(notice.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in to_remove {
                if subscribers.remove(&id).is_some() {
                    tracing::warn!(subscriber = id.0, "dropping slow notice subscriber");
                }
            }
        }
    }
}

impl Default for NoticeHub {
    fn default() -> Self {
        Self::new()
    }
}
