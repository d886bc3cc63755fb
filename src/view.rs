//! Display-side filtering of a buffer snapshot.
//!
//! None of this affects ordering or eviction. A [`TimelineView`] takes the
//! ordered snapshot and decides which rows a renderer shows: a date-range
//! window, a paged display limit, per-day date markers, and visibility from
//! the active event types.

use crate::config::{FeedConfig, DEFAULT_DISPLAY_LIMIT};
use crate::types::Event;
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Rows added by each "load more".
pub const LOAD_MORE_STEP: usize = 5;

/// How far back the timeline shows events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    LastDay,
    LastWeek,
    LastMonth,
    #[default]
    LastYear,
}

impl DateRange {
    /// Events at or before this instant are hidden.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let earlier = match self {
            DateRange::LastDay => now.checked_sub_signed(Duration::days(1)),
            DateRange::LastWeek => now.checked_sub_signed(Duration::weeks(1)),
            DateRange::LastMonth => now.checked_sub_months(Months::new(1)),
            DateRange::LastYear => now.checked_sub_months(Months::new(12)),
        };
        earlier.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Which event types are shown.
///
/// Types start active the first time they are seen; later toggles stick even
/// if the type drops out of the buffer and comes back.
#[derive(Clone, Debug, Default)]
pub struct TypeFilter {
    known: Vec<String>,
    seen: HashSet<String>,
    active: HashSet<String>,
}

impl TypeFilter {
    /// Update the known types from the buffer's current set.
    pub fn sync(&mut self, types: &[String]) {
        for t in types {
            if self.seen.insert(t.clone()) {
                self.active.insert(t.clone());
            }
        }
        self.known = types.to_vec();
    }

    /// Flip one type. Returns whether it is now active.
    pub fn toggle(&mut self, event_type: &str) -> bool {
        if self.active.remove(event_type) {
            false
        } else {
            self.active.insert(event_type.to_string());
            true
        }
    }

    /// Whether events of this type are shown.
    pub fn is_active(&self, event_type: &str) -> bool {
        self.active.contains(event_type)
    }

    /// Types currently present, for rendering filter buttons.
    pub fn known(&self) -> &[String] {
        &self.known
    }

    /// Whether at least one known type is shown.
    pub fn any_active(&self) -> bool {
        self.known.iter().any(|t| self.active.contains(t))
    }

    /// Forget everything (new subject).
    pub fn clear(&mut self) {
        self.known.clear();
        self.seen.clear();
        self.active.clear();
    }
}

/// One renderable row.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineRow<'a> {
    pub event: &'a Event,
    /// `"<type>: <first payload key>"`.
    pub title: String,
    pub date: NaiveDate,
    /// First row of a calendar day.
    pub date_marker: bool,
    pub visible: bool,
}

impl TimelineRow<'_> {
    /// Date badge text, e.g. `01 Mar 2021`.
    pub fn date_label(&self) -> String {
        self.date.format("%d %b %Y").to_string()
    }
}

/// Rows for one render pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimelinePage<'a> {
    pub rows: Vec<TimelineRow<'a>>,
    /// Events inside the date range, shown or not.
    pub in_range: usize,
    /// Whether "load more" would reveal additional rows.
    pub has_more: bool,
}

/// Viewer-controlled presentation state for a timeline.
#[derive(Clone, Debug)]
pub struct TimelineView {
    date_range: DateRange,
    limit: usize,
    types: TypeFilter,
    expanded_dates: BTreeSet<NaiveDate>,
}

impl TimelineView {
    /// Create a view showing `display_limit` rows.
    pub fn new(display_limit: usize) -> Self {
        Self {
            date_range: DateRange::default(),
            limit: display_limit,
            types: TypeFilter::default(),
            expanded_dates: BTreeSet::new(),
        }
    }

    /// Create a view using the configured display limit.
    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.display_limit)
    }

    /// Current row limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Show more rows.
    pub fn load_more(&mut self) {
        self.limit += LOAD_MORE_STEP;
    }

    /// Current date window.
    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    /// Change the date window.
    pub fn set_date_range(&mut self, range: DateRange) {
        self.date_range = range;
    }

    /// Type filter state.
    pub fn types(&self) -> &TypeFilter {
        &self.types
    }

    /// Register the buffer's current event types.
    pub fn sync_types(&mut self, types: &[String]) {
        self.types.sync(types);
    }

    /// Flip a type on or off. Returns the new state.
    pub fn toggle_type(&mut self, event_type: &str) -> bool {
        self.types.toggle(event_type)
    }

    /// Force rows of `date` visible regardless of type filter (or undo).
    pub fn toggle_date(&mut self, date: NaiveDate) -> bool {
        if self.expanded_dates.remove(&date) {
            false
        } else {
            self.expanded_dates.insert(date);
            true
        }
    }

    /// Back to defaults for a new subject, keeping the current limit.
    pub fn reset(&mut self) {
        self.types.clear();
        self.expanded_dates.clear();
        self.date_range = DateRange::default();
    }

    /// Build the rows for `events` (newest first) as of `now`.
    pub fn page<'a>(&self, events: &'a [Event], now: DateTime<Utc>) -> TimelinePage<'a> {
        let cutoff = self.date_range.cutoff(now);
        let mut page = TimelinePage::default();
        let mut last_date = None;

        for event in events {
            let Some(at) = event.timestamp.to_datetime() else {
                continue;
            };
            if at <= cutoff {
                continue;
            }

            page.in_range += 1;
            if page.rows.len() >= self.limit {
                continue;
            }

            let date = at.date_naive();
            let date_marker = last_date != Some(date);
            last_date = Some(date);

            page.rows.push(TimelineRow {
                event,
                title: event.title(),
                date,
                date_marker,
                visible: self.types.is_active(&event.event_type)
                    || self.expanded_dates.contains(&date),
            });
        }

        page.has_more = page.in_range > self.limit && self.types.any_active();
        page
    }
}

impl Default for TimelineView {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_LIMIT)
    }
}
