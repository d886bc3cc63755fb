//! Ordered event buffer and its staging queue.
//!
//! [`OrderedEventBuffer`] keeps one subject's events newest first and merges
//! out-of-order arrivals into place. [`PendingQueue`] holds live events until
//! the viewer asks to see them.

mod ordered;
mod pending;

pub use ordered::{
    distinct_types, BufferChange, BufferState, InsertOutcome, OrderedEventBuffer, SeedOutcome,
};
pub use pending::PendingQueue;
