//! Changefeed (CDC) for ThemisDB
//!
//! A durable, monotonically sequenced log of committed mutations.
//! Events are staged into the same atomic batch that persists the
//! mutation, together with the advanced sequence counter, so readers
//! never observe a gap: a failed batch publishes neither data nor
//! events.
//!
//! Tailing supports long-poll via a condition variable notified by
//! committers; retention deletes old events in bounded loops.

pub mod event;
pub mod feed;

pub use event::{ChangeEvent, EventDraft, EventType};
pub use feed::{Changefeed, ListOptions, RetentionPolicy};
