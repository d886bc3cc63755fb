//! Time-ordered event buffer with tail eviction.

use crate::config::BufferConfig;
use crate::error::{FeedError, Result};
use crate::types::{normalize_batch, Event, RawEvent};
use std::fmt;

/// Lifecycle state of a buffer instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Freshly created or reset.
    Empty,
    /// Historic events installed.
    Seeded,
    /// At least one live event inserted.
    Live,
}

/// Notification emitted at the end of every mutating operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferChange {
    Reset,
    Seeded { len: usize, evicted: usize },
    Inserted { index: usize, evicted: usize },
}

/// Result of seeding a buffer.
#[derive(Debug, Default)]
pub struct SeedOutcome {
    /// Events accepted into the buffer (before eviction).
    pub seeded: usize,
    /// Events evicted from the tail to honour capacity.
    pub evicted: usize,
    /// Diagnostics for dropped malformed records.
    pub rejected: Vec<FeedError>,
}

/// Result of inserting one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Position the event was inserted at.
    pub index: usize,
    /// Number of tail entries evicted afterwards.
    pub evicted: usize,
    /// False if the event itself fell off the tail.
    pub retained: bool,
}

type ChangeListener = Box<dyn FnMut(&BufferChange) + Send>;

/// Events for one subject, newest first.
///
/// Every mutation leaves `items` sorted by timestamp descending. In bounded
/// mode the length never exceeds the configured capacity.
pub struct OrderedEventBuffer {
    items: Vec<Event>,
    limit: Option<usize>,
    state: BufferState,
    event_types: Vec<String>,
    listener: Option<ChangeListener>,
}

impl OrderedEventBuffer {
    /// Create an empty buffer.
    pub fn new(config: &BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            items: Vec::new(),
            limit: config.limit(),
            state: BufferState::Empty,
            event_types: Vec::new(),
            listener: None,
        })
    }

    /// Unbounded buffer. Infallible since there is nothing to validate.
    pub fn unbounded() -> Self {
        Self {
            items: Vec::new(),
            limit: None,
            state: BufferState::Empty,
            event_types: Vec::new(),
            listener: None,
        }
    }

    /// Register a callback invoked synchronously after each mutation.
    pub fn set_listener(&mut self, listener: impl FnMut(&BufferChange) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Capacity in bounded mode, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.limit
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no events.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current ordered sequence, newest first.
    pub fn snapshot(&self) -> &[Event] {
        &self.items
    }

    /// Distinct event types present, in first-seen order (newest first).
    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    /// Drop all events and return to `Empty`.
    pub fn reset(&mut self) {
        self.items.clear();
        self.state = BufferState::Empty;
        self.changed(BufferChange::Reset);
    }

    /// Install the historic events for the current subject.
    ///
    /// Must be called on an `Empty` buffer. The input is stable-sorted
    /// newest first, then trimmed to capacity.
    pub fn seed(&mut self, mut events: Vec<Event>) -> Result<SeedOutcome> {
        if self.state != BufferState::Empty {
            return Err(FeedError::InvalidOperation(format!(
                "seed on a {:?} buffer",
                self.state
            )));
        }

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let seeded = events.len();
        self.items = events;
        self.state = BufferState::Seeded;
        let evicted = self.evict();

        self.changed(BufferChange::Seeded {
            len: self.items.len(),
            evicted,
        });

        Ok(SeedOutcome {
            seeded,
            evicted,
            rejected: Vec::new(),
        })
    }

    /// Normalize and seed raw records. Malformed records are reported in
    /// [`SeedOutcome::rejected`] and skipped.
    pub fn seed_raw(&mut self, raws: Vec<RawEvent>) -> Result<SeedOutcome> {
        let (events, rejected) = normalize_batch(raws);
        let mut outcome = self.seed(events)?;
        outcome.rejected = rejected;
        Ok(outcome)
    }

    /// Merge one event into its chronological position.
    pub fn insert(&mut self, event: Event) -> InsertOutcome {
        let index = self.insertion_index(&event);
        self.items.insert(index, event);
        self.state = BufferState::Live;

        let evicted = self.evict();
        let retained = index < self.items.len();

        self.changed(BufferChange::Inserted { index, evicted });

        InsertOutcome {
            index,
            evicted,
            retained,
        }
    }

    /// Normalize and insert a raw record. A malformed record leaves the
    /// buffer untouched.
    pub fn insert_raw(&mut self, raw: RawEvent) -> Result<InsertOutcome> {
        let event = Event::from_raw(raw)?;
        Ok(self.insert(event))
    }

    /// Where `event` goes.
    ///
    /// Newer-or-equal than the head prepends; older-or-equal than the tail
    /// appends; otherwise before the first entry that is not newer.
    fn insertion_index(&self, event: &Event) -> usize {
        let (Some(head), Some(tail)) = (self.items.first(), self.items.last()) else {
            return 0;
        };

        if event.timestamp >= head.timestamp {
            0
        } else if event.timestamp <= tail.timestamp {
            self.items.len()
        } else {
            self.items
                .partition_point(|existing| existing.timestamp > event.timestamp)
        }
    }

    /// Trim the oldest entries down to capacity. Returns how many went.
    fn evict(&mut self) -> usize {
        match self.limit {
            Some(limit) if self.items.len() > limit => {
                let evicted = self.items.len() - limit;
                self.items.truncate(limit);
                evicted
            }
            _ => 0,
        }
    }

    fn changed(&mut self, change: BufferChange) {
        self.event_types = distinct_types(&self.items);
        if let Some(listener) = self.listener.as_mut() {
            listener(&change);
        }
    }
}

impl fmt::Debug for OrderedEventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedEventBuffer")
            .field("len", &self.items.len())
            .field("limit", &self.limit)
            .field("state", &self.state)
            .finish()
    }
}

/// Distinct `type` values in first-seen order.
pub fn distinct_types(events: &[Event]) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for event in events {
        if !types.iter().any(|t| t == &event.event_type) {
            types.push(event.event_type.clone());
        }
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn ev(id: &str, t: i64) -> Event {
        Event::new(id, "page", Timestamp(t))
    }

    fn ids(buffer: &OrderedEventBuffer) -> Vec<&str> {
        buffer.snapshot().iter().map(|e| e.id.as_str()).collect()
    }

    fn bounded(capacity: usize) -> OrderedEventBuffer {
        OrderedEventBuffer::new(&BufferConfig::bounded(capacity)).unwrap()
    }

    #[test]
    fn test_insert_into_empty() {
        let mut buffer = OrderedEventBuffer::unbounded();
        let outcome = buffer.insert(ev("a", 10));
        assert_eq!(outcome.index, 0);
        assert_eq!(ids(&buffer), ["a"]);
        assert_eq!(buffer.state(), BufferState::Live);
    }

    #[test]
    fn test_newest_and_oldest_fast_paths() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.insert(ev("mid", 5));
        buffer.insert(ev("new", 9));
        let outcome = buffer.insert(ev("old", 1));
        assert_eq!(outcome.index, 2);
        assert_eq!(ids(&buffer), ["new", "mid", "old"]);
    }

    #[test]
    fn test_interior_insert() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.seed(vec![ev("a", 10), ev("b", 8), ev("c", 4), ev("d", 2)]).unwrap();
        let outcome = buffer.insert(ev("x", 5));
        assert_eq!(outcome.index, 2);
        assert_eq!(ids(&buffer), ["a", "b", "x", "c", "d"]);
    }

    #[test]
    fn test_equal_timestamp_newer_arrival_first() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.insert(ev("A", 10));
        buffer.insert(ev("B", 10));
        assert_eq!(ids(&buffer), ["B", "A"]);

        // Interior tie goes before the existing equal entry.
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.seed(vec![ev("a", 10), ev("b", 6), ev("c", 2)]).unwrap();
        buffer.insert(ev("x", 6));
        assert_eq!(ids(&buffer), ["a", "x", "b", "c"]);
    }

    #[test]
    fn test_equal_tail_timestamp_appends() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.seed(vec![ev("a", 10), ev("b", 2)]).unwrap();
        let outcome = buffer.insert(ev("x", 2));
        assert_eq!(outcome.index, 2);
        assert_eq!(ids(&buffer), ["a", "b", "x"]);
    }

    #[test]
    fn test_bounded_insert_evicts_oldest() {
        let mut buffer = bounded(3);
        buffer.seed(vec![ev("a", 9), ev("b", 6), ev("c", 3)]).unwrap();
        let outcome = buffer.insert(ev("x", 7));
        assert_eq!(outcome.evicted, 1);
        assert!(outcome.retained);
        assert_eq!(ids(&buffer), ["a", "x", "b"]);
    }

    #[test]
    fn test_bounded_insert_older_than_all_is_dropped() {
        let mut buffer = bounded(2);
        buffer.seed(vec![ev("a", 9), ev("b", 6)]).unwrap();
        let outcome = buffer.insert(ev("old", 1));
        assert!(!outcome.retained);
        assert_eq!(outcome.evicted, 1);
        assert_eq!(ids(&buffer), ["a", "b"]);
    }

    #[test]
    fn test_seed_sorts_and_evicts() {
        let mut buffer = bounded(2);
        let outcome = buffer
            .seed(vec![ev("e3", 3), ev("e1", 5), ev("e2", 4)])
            .unwrap();
        assert_eq!(outcome.seeded, 3);
        assert_eq!(outcome.evicted, 1);
        assert_eq!(ids(&buffer), ["e1", "e2"]);
        assert_eq!(buffer.state(), BufferState::Seeded);
    }

    #[test]
    fn test_seed_is_stable_for_equal_timestamps() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer
            .seed(vec![ev("p", 5), ev("q", 7), ev("r", 5)])
            .unwrap();
        assert_eq!(ids(&buffer), ["q", "p", "r"]);
    }

    #[test]
    fn test_seed_twice_rejected() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.seed(vec![ev("a", 1)]).unwrap();
        let err = buffer.seed(vec![ev("b", 2)]).unwrap_err();
        assert!(matches!(err, FeedError::InvalidOperation(_)));
        assert_eq!(ids(&buffer), ["a"]);
    }

    #[test]
    fn test_seed_raw_drops_malformed() {
        let mut buffer = OrderedEventBuffer::unbounded();
        let outcome = buffer
            .seed_raw(vec![
                RawEvent::new("a", "t", "2021-03-01T10:00:00Z"),
                RawEvent::new("bad", "t", "31/02/2021"),
                RawEvent::new("b", "t", "2021-03-02T10:00:00Z"),
            ])
            .unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(ids(&buffer), ["b", "a"]);
    }

    #[test]
    fn test_insert_raw_rejects_without_mutation() {
        let mut buffer = OrderedEventBuffer::unbounded();
        buffer.seed(vec![ev("a", 1)]).unwrap();
        let result = buffer.insert_raw(RawEvent::new("bad", "t", "nope"));
        assert!(matches!(result, Err(FeedError::Parse { .. })));
        assert_eq!(ids(&buffer), ["a"]);
        assert_eq!(buffer.state(), BufferState::Seeded);
    }

    #[test]
    fn test_reset_isolation() {
        let mut buffer = bounded(5);
        buffer.seed(vec![ev("e1", 1)]).unwrap();
        buffer.reset();
        assert!(buffer.snapshot().is_empty());
        assert!(buffer.event_types().is_empty());
        assert_eq!(buffer.state(), BufferState::Empty);
        assert!(buffer.seed(vec![]).is_ok());
    }

    #[test]
    fn test_event_types_track_mutations() {
        let mut buffer = bounded(2);
        buffer
            .seed(vec![
                Event::new("a", "login", Timestamp(5)),
                Event::new("b", "quote", Timestamp(4)),
            ])
            .unwrap();
        assert_eq!(buffer.event_types(), ["login", "quote"]);

        buffer.insert(Event::new("c", "chat", Timestamp(6)));
        assert_eq!(buffer.event_types(), ["chat", "login"]);
    }

    #[test]
    fn test_listener_sees_every_mutation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut buffer = bounded(1);
        buffer.set_listener(move |change| sink.lock().push(change.clone()));
        buffer.seed(vec![ev("a", 1), ev("b", 0)]).unwrap();
        buffer.insert(ev("c", 2));
        buffer.reset();

        assert_eq!(
            *seen.lock(),
            vec![
                BufferChange::Seeded { len: 1, evicted: 1 },
                BufferChange::Inserted { index: 0, evicted: 1 },
                BufferChange::Reset,
            ]
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(OrderedEventBuffer::new(&BufferConfig::bounded(0)).is_err());
    }
}
