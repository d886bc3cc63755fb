//! Collaborator seams: historic loading and the live push feed.
//!
//! Transport lives outside this crate. A [`HistoricLoader`] returns one page
//! of past events; a [`LiveFeedSubscriber`] opens a [`LiveChannel`] that the
//! transport feeds through the paired [`FeedSender`].

use crate::error::Result;
use crate::types::{RawEvent, SubjectId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parameters for one historic page fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub subject: SubjectId,
    /// Page-size hint (`$top`).
    pub page_size: usize,
    /// Backend filter expression, passed through verbatim.
    pub filter: Option<String>,
}

/// One-shot retrieval of past events.
///
/// Errors should be reported as [`FeedError::Fetch`](crate::FeedError::Fetch).
pub trait HistoricLoader: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawEvent>>;
}

/// Opens a live push channel for a subject.
pub trait LiveFeedSubscriber: Send + Sync {
    fn open(&self, subject: &SubjectId) -> Result<LiveChannel>;
}

impl<F> HistoricLoader for F
where
    F: Fn(&FetchRequest) -> Result<Vec<RawEvent>> + Send + Sync,
{
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawEvent>> {
        self(request)
    }
}

/// Messages carried by a live channel.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    Event(RawEvent),
    /// The transport failed. No further events follow.
    Error(String),
}

/// Result of polling a live channel without blocking.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelPoll {
    Event(RawEvent),
    /// Nothing buffered right now.
    Idle,
    /// The feed failed or its producer went away.
    Failed(String),
}

/// Create a connected sender/channel pair for `subject`.
pub fn live_channel(subject: SubjectId) -> (FeedSender, LiveChannel) {
    let (sender, receiver) = unbounded();
    let closed = Arc::new(AtomicBool::new(false));

    (
        FeedSender {
            sender,
            closed: Arc::clone(&closed),
        },
        LiveChannel {
            subject,
            receiver,
            closed,
        },
    )
}

/// Producer half, held by the transport.
#[derive(Clone)]
pub struct FeedSender {
    sender: Sender<FeedMessage>,
    closed: Arc<AtomicBool>,
}

impl FeedSender {
    /// Deliver a decoded event. Returns false once the consumer has closed.
    pub fn send_event(&self, raw: RawEvent) -> bool {
        self.send(FeedMessage::Event(raw))
    }

    /// Deliver a raw message body. Keep-alive bodies are skipped.
    pub fn send_message(&self, body: &str) -> bool {
        match RawEvent::from_message(body) {
            Some(raw) => self.send_event(raw),
            None => !self.is_closed(),
        }
    }

    /// Report a transport failure.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.send(FeedMessage::Error(reason.into()))
    }

    /// Whether the consumer closed the channel.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send(&self, message: FeedMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(message).is_ok()
    }
}

/// Consumer half: an owned, non-restartable live subscription.
///
/// Closing (explicitly or on drop) tells the producer to stop.
pub struct LiveChannel {
    subject: SubjectId,
    receiver: Receiver<FeedMessage>,
    closed: Arc<AtomicBool>,
}

impl LiveChannel {
    /// Subject this channel was opened for.
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the next message without blocking.
    pub fn poll(&self) -> ChannelPoll {
        if self.is_closed() {
            return ChannelPoll::Failed("channel closed".into());
        }
        match self.receiver.try_recv() {
            Ok(message) => message.into(),
            Err(TryRecvError::Empty) => ChannelPoll::Idle,
            Err(TryRecvError::Disconnected) => ChannelPoll::Failed("feed disconnected".into()),
        }
    }

    /// Wait up to `timeout` for the next message.
    pub fn poll_timeout(&self, timeout: Duration) -> ChannelPoll {
        if self.is_closed() {
            return ChannelPoll::Failed("channel closed".into());
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => message.into(),
            Err(RecvTimeoutError::Timeout) => ChannelPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                ChannelPoll::Failed("feed disconnected".into())
            }
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<FeedMessage> {
        &self.receiver
    }

    /// Stop the subscription. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(subject = %self.subject, "live channel closed");
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl From<FeedMessage> for ChannelPoll {
    fn from(message: FeedMessage) -> Self {
        match message {
            FeedMessage::Event(raw) => ChannelPoll::Event(raw),
            FeedMessage::Error(reason) => ChannelPoll::Failed(reason),
        }
    }
}
