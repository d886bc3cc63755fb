//! Subject-switch lifecycle.
//!
//! [`SubjectController`] sequences `reset -> historic fetch -> seed -> open
//! live feed` for each selected subject. Every switch bumps a generation
//! counter; fetch results carry the generation they were issued under and are
//! discarded if a newer switch has happened since. The previous live channel
//! is closed before anything else happens on a switch.
//!
//! The controller is driven from one thread. Fetches run on a background
//! thread and post their result to the controller's inbox; [`pump`] applies
//! queued results and live events.
//!
//! [`pump`]: SubjectController::pump

use crate::buffer::{BufferState, OrderedEventBuffer, PendingQueue, SeedOutcome};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::feed::{ChannelPoll, FetchRequest, HistoricLoader, LiveChannel, LiveFeedSubscriber};
use crate::notify::{FeedNotice, FeedStatus, NoticeHandle, NoticeHub};
use crate::types::{Event, RawEvent, SubjectId};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifies one historic fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub subject: SubjectId,
}

/// What happened to a fetch result.
#[derive(Debug)]
pub enum Completion {
    /// The result seeded the current subject's buffer.
    Applied(SeedOutcome),
    /// The result belonged to a superseded subject and was ignored.
    Stale,
}

/// Tally of one [`SubjectController::pump`] call.
#[derive(Debug, Default)]
pub struct PumpReport {
    pub seeded: usize,
    pub inserted: usize,
    pub staged: usize,
    /// Malformed events dropped (historic and live).
    pub rejected: usize,
    pub stale: usize,
    /// Fetch failures and lost live feeds seen during this pump.
    pub errors: Vec<FeedError>,
}

impl PumpReport {
    /// Whether anything observable changed.
    pub fn is_empty(&self) -> bool {
        self.seeded == 0
            && self.inserted == 0
            && self.staged == 0
            && self.rejected == 0
            && self.stale == 0
            && self.errors.is_empty()
    }
}

struct FetchCompletion {
    ticket: FetchTicket,
    result: Result<Vec<RawEvent>>,
}

/// What woke a blocking pump.
enum Wake {
    Fetch(FetchCompletion),
    Live(ChannelPoll),
    Idle,
}

/// Owns the buffer for the selected subject and its collaborators.
pub struct SubjectController {
    config: FeedConfig,
    loader: Arc<dyn HistoricLoader>,
    subscriber: Arc<dyn LiveFeedSubscriber>,
    hub: Arc<NoticeHub>,
    buffer: OrderedEventBuffer,
    pending: PendingQueue,
    channel: Option<LiveChannel>,
    subject: Option<SubjectId>,
    generation: u64,
    fetch_outstanding: bool,
    status: FeedStatus,
    inbox_tx: Sender<FetchCompletion>,
    inbox_rx: Receiver<FetchCompletion>,
}

impl SubjectController {
    /// Create a controller. Fails if `config` is invalid.
    pub fn new(
        config: FeedConfig,
        loader: Arc<dyn HistoricLoader>,
        subscriber: Arc<dyn LiveFeedSubscriber>,
    ) -> Result<Self> {
        config.validate()?;

        let hub = Arc::new(NoticeHub::new());
        let mut buffer = OrderedEventBuffer::new(&config.buffer)?;
        let sink = Arc::clone(&hub);
        buffer.set_listener(move |change| sink.broadcast(FeedNotice::from(change)));

        let (inbox_tx, inbox_rx) = unbounded();

        Ok(Self {
            config,
            loader,
            subscriber,
            hub,
            buffer,
            pending: PendingQueue::new(),
            channel: None,
            subject: None,
            generation: 0,
            fetch_outstanding: false,
            status: FeedStatus::Idle,
            inbox_tx,
            inbox_rx,
        })
    }

    // --- Accessors ---

    /// Active configuration.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Current ordered events, newest first.
    pub fn snapshot(&self) -> &[Event] {
        self.buffer.snapshot()
    }

    /// Distinct event types in the buffer, first-seen order.
    pub fn event_types(&self) -> &[String] {
        self.buffer.event_types()
    }

    /// Lifecycle state of the buffer.
    pub fn buffer_state(&self) -> BufferState {
        self.buffer.state()
    }

    /// Live events waiting for [`show_new_events`](Self::show_new_events).
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Current feed status.
    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    /// Selected subject, if any.
    pub fn subject(&self) -> Option<&SubjectId> {
        self.subject.as_ref()
    }

    /// Switch counter; bumped on every switch and close.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a live channel is open.
    pub fn is_live(&self) -> bool {
        self.channel.is_some()
    }

    /// Subscribe to change notices.
    pub fn subscribe(&self, buffer_size: usize) -> NoticeHandle {
        self.hub.subscribe(buffer_size)
    }

    /// The request a fetch for `subject` would issue.
    pub fn fetch_request(&self, subject: &SubjectId) -> FetchRequest {
        FetchRequest {
            subject: subject.clone(),
            page_size: self.config.page_size,
            filter: self.config.filter.clone(),
        }
    }

    // --- Subject lifecycle ---

    /// Switch to `subject` and start its historic fetch on a background
    /// thread. The result is applied by a later [`pump`](Self::pump).
    pub fn select_subject(&mut self, subject: impl Into<SubjectId>) -> Result<FetchTicket> {
        let ticket = self.begin_switch(subject.into())?;
        if self.fetch_outstanding {
            if let Err(e) = self.spawn_fetch(ticket.clone()) {
                self.fetch_outstanding = false;
                self.set_status(FeedStatus::Failed(e.to_string()));
                return Err(e);
            }
        }
        Ok(ticket)
    }

    /// Re-run the switch sequence for the current subject.
    pub fn reload(&mut self) -> Result<Option<FetchTicket>> {
        match self.subject.clone() {
            Some(subject) => self.select_subject(subject).map(Some),
            None => Ok(None),
        }
    }

    /// Change the backend filter expression and re-run the switch sequence
    /// for the current subject. Returns `None` when the filter is unchanged
    /// or no subject is selected.
    pub fn set_filter(&mut self, filter: Option<String>) -> Result<Option<FetchTicket>> {
        if self.config.filter == filter {
            return Ok(None);
        }
        debug!(filter = ?filter, "filter changed");
        self.config.filter = filter;
        self.reload()
    }

    /// Tear down the previous subject and prepare for `subject` without
    /// fetching.
    ///
    /// For kinds that fetch history the caller runs the fetch itself and
    /// hands the result to [`complete_fetch`](Self::complete_fetch). Other
    /// kinds are seeded empty and go live immediately.
    pub fn begin_switch(&mut self, subject: SubjectId) -> Result<FetchTicket> {
        self.close_live();

        self.generation += 1;
        self.subject = Some(subject.clone());
        self.pending.clear();
        self.buffer.reset();

        info!(subject = %subject, generation = self.generation, "subject selected");
        self.hub.broadcast(FeedNotice::Subject {
            subject: subject.clone(),
            generation: self.generation,
        });

        let ticket = FetchTicket {
            generation: self.generation,
            subject,
        };

        if self.config.kind.fetches_history() {
            self.fetch_outstanding = true;
            self.set_status(FeedStatus::Loading);
        } else {
            self.fetch_outstanding = false;
            self.buffer.seed(Vec::new())?;
            self.open_live(&ticket.subject);
        }

        Ok(ticket)
    }

    /// Apply a historic fetch result.
    ///
    /// Results for a superseded generation return [`Completion::Stale`] and
    /// change nothing. A failed fetch leaves the buffer empty, records
    /// [`FeedStatus::Failed`] and returns the error.
    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Vec<RawEvent>>,
    ) -> Result<Completion> {
        if ticket.generation != self.generation {
            debug!(
                subject = %ticket.subject,
                generation = ticket.generation,
                current = self.generation,
                "discarding stale fetch"
            );
            return Ok(Completion::Stale);
        }

        if !self.fetch_outstanding {
            return Err(FeedError::InvalidOperation(format!(
                "no fetch outstanding for generation {}",
                ticket.generation
            )));
        }
        self.fetch_outstanding = false;

        let raws = match result {
            Ok(raws) => raws,
            Err(e) => {
                warn!(subject = %ticket.subject, error = %e, "historic fetch failed");
                self.set_status(FeedStatus::Failed(e.to_string()));
                return Err(e);
            }
        };

        let outcome = self.buffer.seed_raw(raws)?;
        info!(
            subject = %ticket.subject,
            seeded = outcome.seeded,
            evicted = outcome.evicted,
            rejected = outcome.rejected.len(),
            "journey loaded"
        );

        if self.config.kind.subscribes_live() {
            self.open_live(&ticket.subject);
        } else {
            self.set_status(FeedStatus::Ready);
        }

        Ok(Completion::Applied(outcome))
    }

    /// Close the live feed and invalidate any outstanding fetch.
    pub fn close(&mut self) {
        self.close_live();
        self.generation += 1;
        self.fetch_outstanding = false;
        self.set_status(FeedStatus::Idle);
    }

    // --- Event delivery ---

    /// Apply every queued fetch result and live event without blocking.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        self.pump_into(&mut report);
        report
    }

    /// Wait up to `timeout` for the next fetch result or live event, then
    /// pump whatever else is queued.
    pub fn pump_timeout(&mut self, timeout: Duration) -> PumpReport {
        let mut report = PumpReport::default();

        let wake = match self.channel.as_ref() {
            Some(channel) => select! {
                recv(self.inbox_rx) -> completion => {
                    completion.map(Wake::Fetch).unwrap_or(Wake::Idle)
                }
                recv(channel.receiver()) -> message => Wake::Live(
                    message
                        .map(ChannelPoll::from)
                        .unwrap_or_else(|_| ChannelPoll::Failed("feed disconnected".into())),
                ),
                default(timeout) => Wake::Idle,
            },
            None => self
                .inbox_rx
                .recv_timeout(timeout)
                .map(Wake::Fetch)
                .unwrap_or(Wake::Idle),
        };

        match wake {
            Wake::Fetch(completion) => self.apply_completion(completion, &mut report),
            Wake::Live(polled) => self.apply_poll(polled, &mut report),
            Wake::Idle => {}
        }

        self.pump_into(&mut report);
        report
    }

    /// Fold staged live events into the buffer. Returns how many.
    pub fn show_new_events(&mut self) -> usize {
        let count = self.pending.flush(&mut self.buffer);
        if count > 0 {
            debug!(count, "flushed staged events");
            self.hub.broadcast(FeedNotice::Flushed { count });
        }
        count
    }

    /// Toggle immediate application of live events. Turning it on flushes
    /// anything staged.
    pub fn set_live_mode(&mut self, live: bool) {
        self.config.live_mode = live;
        if live {
            self.show_new_events();
        }
    }

    // --- Internals ---

    fn spawn_fetch(&self, ticket: FetchTicket) -> Result<()> {
        let loader = Arc::clone(&self.loader);
        let request = self.fetch_request(&ticket.subject);
        let inbox = self.inbox_tx.clone();

        thread::Builder::new()
            .name(format!("journey-fetch-{}", ticket.generation))
            .spawn(move || {
                let result = loader.fetch(&request);
                let _ = inbox.send(FetchCompletion { ticket, result });
            })
            .map(|_| ())
            .map_err(|e| FeedError::Fetch(format!("failed to start fetch: {e}")))
    }

    fn pump_into(&mut self, report: &mut PumpReport) {
        while let Ok(completion) = self.inbox_rx.try_recv() {
            self.apply_completion(completion, report);
        }

        while let Some(channel) = self.channel.as_ref() {
            let polled = channel.poll();
            if polled == ChannelPoll::Idle {
                break;
            }
            self.apply_poll(polled, report);
        }
    }

    fn apply_completion(&mut self, completion: FetchCompletion, report: &mut PumpReport) {
        match self.complete_fetch(&completion.ticket, completion.result) {
            Ok(Completion::Applied(outcome)) => {
                report.seeded += outcome.seeded;
                report.rejected += outcome.rejected.len();
            }
            Ok(Completion::Stale) => report.stale += 1,
            Err(e) => report.errors.push(e),
        }
    }

    fn apply_poll(&mut self, polled: ChannelPoll, report: &mut PumpReport) {
        match polled {
            ChannelPoll::Idle => {}
            ChannelPoll::Event(raw) => self.accept_live(raw, report),
            ChannelPoll::Failed(reason) => {
                let error = FeedError::Channel(reason.clone());
                warn!(subject = ?self.subject, error = %error, "live feed stopped");
                self.close_live();
                self.set_status(FeedStatus::Stopped(reason));
                report.errors.push(error);
            }
        }
    }

    fn accept_live(&mut self, raw: RawEvent, report: &mut PumpReport) {
        let event = match Event::from_raw(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed live event");
                report.rejected += 1;
                return;
            }
        };

        if self.config.live_mode {
            self.buffer.insert(event);
            report.inserted += 1;
        } else {
            self.pending.stage(event);
            report.staged += 1;
            self.hub.broadcast(FeedNotice::Staged {
                pending: self.pending.len(),
            });
        }
    }

    fn open_live(&mut self, subject: &SubjectId) {
        if !self.config.kind.subscribes_live() {
            return;
        }

        match self.subscriber.open(subject) {
            Ok(channel) => {
                debug!(subject = %subject, "live channel opened");
                self.channel = Some(channel);
                self.set_status(FeedStatus::Ready);
            }
            Err(e) => {
                let reason = match e {
                    FeedError::Channel(reason) => reason,
                    other => other.to_string(),
                };
                let error = FeedError::Channel(reason.clone());
                warn!(subject = %subject, error = %error, "failed to open live feed");
                self.set_status(FeedStatus::Stopped(reason));
            }
        }
    }

    fn close_live(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }

    fn set_status(&mut self, status: FeedStatus) {
        if self.status != status {
            self.status = status.clone();
            self.hub.broadcast(FeedNotice::Status { status });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferConfig, TimelineKind};
    use crate::feed::{live_channel, FeedSender};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Loader that never answers on its own; tests complete fetches by hand.
    struct NoLoader;

    impl HistoricLoader for NoLoader {
        fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawEvent>> {
            Err(FeedError::Fetch("not used".into()))
        }
    }

    #[derive(Default)]
    struct Subscriber {
        senders: Mutex<HashMap<String, FeedSender>>,
    }

    impl Subscriber {
        fn sender(&self, subject: &str) -> FeedSender {
            self.senders.lock()[subject].clone()
        }
    }

    impl LiveFeedSubscriber for Subscriber {
        fn open(&self, subject: &SubjectId) -> Result<LiveChannel> {
            let (sender, channel) = live_channel(subject.clone());
            self.senders.lock().insert(subject.to_string(), sender);
            Ok(channel)
        }
    }

    fn raw(id: &str, time: &str) -> RawEvent {
        RawEvent::new(id, "page", time)
    }

    fn ids(controller: &SubjectController) -> Vec<String> {
        controller.snapshot().iter().map(|e| e.id.clone()).collect()
    }

    fn make_controller(kind: TimelineKind) -> (SubjectController, Arc<Subscriber>) {
        let subscriber = Arc::new(Subscriber::default());
        let config = FeedConfig {
            buffer: BufferConfig::bounded(3),
            ..FeedConfig::for_kind(kind)
        };
        let controller =
            SubjectController::new(config, Arc::new(NoLoader), subscriber.clone()).unwrap();
        (controller, subscriber)
    }

    #[test]
    fn test_manual_switch_seeds_then_goes_live() {
        let (mut controller, subscriber) = make_controller(TimelineKind::JourneyAndStream);
        let ticket = controller.begin_switch("alice".into()).unwrap();
        assert_eq!(controller.status(), &FeedStatus::Loading);
        assert!(!controller.is_live());

        let completion = controller
            .complete_fetch(
                &ticket,
                Ok(vec![raw("a", "2021-03-01T10:00:00Z"), raw("b", "2021-03-03T10:00:00Z")]),
            )
            .unwrap();
        assert!(matches!(completion, Completion::Applied(_)));
        assert_eq!(ids(&controller), ["b", "a"]);
        assert!(controller.is_live());
        assert_eq!(controller.status(), &FeedStatus::Ready);

        subscriber.sender("alice").send_event(raw("c", "2021-03-02T10:00:00Z"));
        let report = controller.pump();
        assert_eq!(report.inserted, 1);
        assert_eq!(ids(&controller), ["b", "c", "a"]);
        assert_eq!(controller.buffer_state(), BufferState::Live);
    }

    #[test]
    fn test_stale_fetch_is_discarded() {
        let (mut controller, _subscriber) = make_controller(TimelineKind::JourneyAndStream);
        let stale = controller.begin_switch("alice".into()).unwrap();
        let fresh = controller.begin_switch("bob".into()).unwrap();

        controller
            .complete_fetch(&fresh, Ok(vec![raw("bob-1", "2021-03-01T10:00:00Z")]))
            .unwrap();

        let completion = controller
            .complete_fetch(&stale, Ok(vec![raw("alice-1", "2021-03-05T10:00:00Z")]))
            .unwrap();
        assert!(matches!(completion, Completion::Stale));
        assert_eq!(ids(&controller), ["bob-1"]);
    }

    #[test]
    fn test_double_completion_rejected() {
        let (mut controller, _subscriber) = make_controller(TimelineKind::Journey);
        let ticket = controller.begin_switch("alice".into()).unwrap();
        controller.complete_fetch(&ticket, Ok(vec![])).unwrap();
        let err = controller.complete_fetch(&ticket, Ok(vec![])).unwrap_err();
        assert!(matches!(err, FeedError::InvalidOperation(_)));
    }

    #[test]
    fn test_switch_closes_previous_channel() {
        let (mut controller, subscriber) = make_controller(TimelineKind::Livestream);
        controller.begin_switch("alice".into()).unwrap();
        let alice = subscriber.sender("alice");
        assert!(!alice.is_closed());

        controller.begin_switch("bob".into()).unwrap();
        assert!(alice.is_closed());
        assert!(!alice.send_event(raw("leak", "2021-03-01T10:00:00Z")));

        controller.pump();
        assert!(controller.snapshot().is_empty());
    }

    #[test]
    fn test_staging_when_live_mode_off() {
        let (mut controller, subscriber) = make_controller(TimelineKind::Livestream);
        controller.set_live_mode(false);
        controller.begin_switch("alice".into()).unwrap();

        let sender = subscriber.sender("alice");
        sender.send_event(raw("a", "2021-03-01T10:00:00Z"));
        sender.send_event(raw("b", "2021-03-01T10:00:00Z"));

        let report = controller.pump();
        assert_eq!(report.staged, 2);
        assert!(controller.snapshot().is_empty());
        assert_eq!(controller.pending().len(), 2);

        assert_eq!(controller.show_new_events(), 2);
        assert_eq!(ids(&controller), ["b", "a"]);
        assert_eq!(controller.show_new_events(), 0);
    }

    #[test]
    fn test_close_invalidates_outstanding_fetch() {
        let (mut controller, _subscriber) = make_controller(TimelineKind::Journey);
        let ticket = controller.begin_switch("alice".into()).unwrap();
        controller.close();
        let completion = controller.complete_fetch(&ticket, Ok(vec![])).unwrap();
        assert!(matches!(completion, Completion::Stale));
        assert_eq!(controller.status(), &FeedStatus::Idle);
    }
}
