//! # Journey Feed
//!
//! The data core behind customer-journey timelines: a time-ordered buffer of
//! customer interaction events, seeded from a historic page and kept current
//! by a live push feed.
//!
//! ## Core Concepts
//!
//! - **Buffer**: events for one subject, newest first, optionally bounded
//! - **Staging**: live events held until the viewer asks to see them
//! - **Controller**: subject switches, stale-fetch guarding, live channel ownership
//! - **View**: date-range, paging and type filtering for renderers
//! - **Profile**: attribute results and per-tab journeys for a subject
//!
//! ## Example
//!
//! ```ignore
//! use journey_feed::{FeedConfig, SubjectController, TimelineKind};
//!
//! let mut controller = SubjectController::new(
//!     FeedConfig::for_kind(TimelineKind::JourneyAndStream),
//!     loader,
//!     subscriber,
//! )?;
//!
//! controller.select_subject("customer-42")?;
//! loop {
//!     let report = controller.pump_timeout(Duration::from_millis(250));
//!     if !report.is_empty() {
//!         render(controller.snapshot());
//!     }
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod notify;
pub mod profile;
pub mod types;
pub mod view;

// Re-exports
pub use buffer::{
    distinct_types, BufferChange, BufferState, InsertOutcome, OrderedEventBuffer, PendingQueue,
    SeedOutcome,
};
pub use config::{BufferConfig, BufferMode, FeedConfig, TimelineKind};
pub use controller::{Completion, FetchTicket, PumpReport, SubjectController};
pub use error::{FeedError, Result};
pub use feed::{
    live_channel, ChannelPoll, FeedMessage, FeedSender, FetchRequest, HistoricLoader, LiveChannel,
    LiveFeedSubscriber,
};
pub use notify::{DropReason, FeedNotice, FeedStatus, NoticeHandle, NoticeHub, NoticeId};
pub use profile::{
    AttributeResult, ProfileAttribute, ProfileLoader, ProfileResponse, ProfileTemplate,
    ProfileView, TemplateAttribute,
};
pub use types::{normalize_batch, Event, RawEvent, SubjectId, Timestamp};
pub use view::{DateRange, TimelinePage, TimelineRow, TimelineView, TypeFilter};
