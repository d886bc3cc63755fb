//! Buffer and feed configuration.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};

/// Default capacity for livestream views.
pub const DEFAULT_CAPACITY: usize = 5;

/// Default historic page size (`$top=15`).
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Default number of rows a view shows before "load more".
pub const DEFAULT_DISPLAY_LIMIT: usize = 5;

/// Whether the buffer evicts old entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// Evict from the tail once `capacity` is exceeded.
    Bounded,
    /// Keep everything (full journey views).
    Unbounded,
}

/// Configuration for an [`OrderedEventBuffer`](crate::OrderedEventBuffer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub mode: BufferMode,

    /// Maximum retained events in bounded mode. Ignored when unbounded.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl BufferConfig {
    /// Bounded buffer holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            mode: BufferMode::Bounded,
            capacity: Some(capacity),
        }
    }

    /// Buffer without a capacity limit.
    pub fn unbounded() -> Self {
        Self {
            mode: BufferMode::Unbounded,
            capacity: None,
        }
    }

    /// The effective eviction limit, if any.
    pub fn limit(&self) -> Option<usize> {
        match self.mode {
            BufferMode::Bounded => self.capacity,
            BufferMode::Unbounded => None,
        }
    }

    /// Check that bounded mode has a positive capacity.
    pub fn validate(&self) -> Result<()> {
        match (self.mode, self.capacity) {
            (BufferMode::Bounded, None) => Err(FeedError::InvalidConfig(
                "bounded mode requires a capacity".into(),
            )),
            (BufferMode::Bounded, Some(0)) => Err(FeedError::InvalidConfig(
                "capacity must be positive".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::bounded(DEFAULT_CAPACITY)
    }
}

/// Which collaborators a timeline draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimelineKind {
    /// Historic fetch only.
    Journey,
    /// Live feed only.
    Livestream,
    /// Historic seed followed by the live feed.
    JourneyAndStream,
}

impl TimelineKind {
    /// Whether this kind loads past events on a switch.
    pub fn fetches_history(self) -> bool {
        matches!(self, TimelineKind::Journey | TimelineKind::JourneyAndStream)
    }

    /// Whether this kind opens a live feed.
    pub fn subscribes_live(self) -> bool {
        matches!(self, TimelineKind::Livestream | TimelineKind::JourneyAndStream)
    }

    /// Only livestream views evict; journeys keep the whole history.
    pub fn default_buffer(self) -> BufferConfig {
        match self {
            TimelineKind::Livestream => BufferConfig::bounded(DEFAULT_CAPACITY),
            _ => BufferConfig::unbounded(),
        }
    }
}

impl Default for TimelineKind {
    fn default() -> Self {
        TimelineKind::Livestream
    }
}

/// Configuration for a [`SubjectController`](crate::SubjectController).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub kind: TimelineKind,

    pub buffer: BufferConfig,

    /// Page-size hint passed to the historic loader.
    pub page_size: usize,

    /// Optional backend filter expression forwarded to the loader.
    pub filter: Option<String>,

    /// Apply live events immediately instead of staging them.
    pub live_mode: bool,

    /// Rows shown before "load more".
    pub display_limit: usize,
}

impl FeedConfig {
    /// Config for the given kind with its default buffer mode.
    pub fn for_kind(kind: TimelineKind) -> Self {
        Self {
            kind,
            buffer: kind.default_buffer(),
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FeedConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the buffer settings and page size.
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        if self.page_size == 0 {
            return Err(FeedError::InvalidConfig("page size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: TimelineKind::default(),
            buffer: BufferConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            filter: None,
            live_mode: true,
            display_limit: DEFAULT_DISPLAY_LIMIT,
        }
    }
}
