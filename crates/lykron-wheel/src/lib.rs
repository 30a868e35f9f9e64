//! `lykron-wheel`, the timing core of the lykron daemon.
//!
//! # Overview
//!
//! Pending firings live in a calendar-queue-style [`Wheel`]: an array of
//! time buckets over a sliding window, each bucket a sorted list of
//! events inside an index-linked [`arena::EventArena`]. Insertion is
//! O(1) amortized and the globally soonest event is always the head of
//! the first non-empty bucket. Bucket granularity adapts to load: an
//! overflowing bucket bordering the window's dummy sentinel is *split*
//! (resolution doubles there), otherwise its misplaced tail is *adjusted*
//! into the neighbor.
//!
//! [`engine::SchedulerLoop`] drives the wheel from a single task: it
//! sleeps until the soonest event is due, dispatches it to the runner
//! over a channel, and re-holds the event at its next occurrence. Job
//! table reloads and shutdown arrive as [`engine::ControlMsg`]s on the
//! same wait point, so the wheel needs no locks.

pub mod arena;
pub mod clock;
pub mod engine;
pub mod wheel;

pub use arena::EventId;
pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{ControlMsg, Firing, NextOccurrence, SchedulerLoop, RESCHEDULE_GRACE_SECS};
pub use wheel::{Wheel, NLIM};
