//! The adaptive timing wheel: a calendar-queue-style bucket array over a
//! sliding time window.
//!
//! `num_buckets` real buckets each cover `interval_width` seconds starting
//! at `lower_bound`; one extra roaming slot is the *dummy*, the sentinel
//! marking the edge of the visible window. Insertion is O(1) amortized,
//! `remove_min` scans at most one lap of buckets, and two rebalancing
//! moves keep any one bucket from degenerating into a long list:
//!
//! * [`split`](Wheel::split): when an overflowing bucket borders the
//!   dummy, the dummy is realized as a new bucket covering the upper half
//!   of the overflowing bucket's range, doubling resolution there.
//! * `adjust`: when no dummy is adjacent, misplaced tail events are
//!   shifted into the neighboring bucket.
//!
//! Events whose time falls at or beyond the window edge park in the dummy
//! slot; they become visible when the window advances over them.
//!
//! `advance_window` *returns* the events still pending in the bucket the
//! dummy sweeps over instead of freeing them. Freeing would silently lose
//! scheduled jobs, so callers must explicitly decide what happens to them
//! (the scheduler loop re-homes them).

use tracing::debug;

use crate::arena::{EventArena, EventId};

/// Fan-out limit: a bucket holding more than this many events triggers a
/// split or adjust.
pub const NLIM: usize = 32;

struct Bucket {
    /// Lower edge of the time range this bucket covers.
    key: i64,
    count: usize,
    is_dummy: bool,
    anchor: EventId,
}

pub struct Wheel<T> {
    arena: EventArena<T>,
    buckets: Vec<Bucket>,
    num_buckets: usize,
    curr_bucket: usize,
    lower_bound: i64,
    interval_width: i64,
    fanout_limit: usize,
}

impl<T> Wheel<T> {
    /// A wheel whose window starts at `origin` (unix seconds).
    pub fn new(interval_width: i64, num_buckets: usize, origin: i64) -> Self {
        assert!(interval_width > 0, "interval width must be positive");
        assert!(num_buckets >= 2, "wheel needs at least two buckets");

        let mut wheel = Self {
            arena: EventArena::new(),
            buckets: Vec::with_capacity(num_buckets + 1),
            num_buckets,
            curr_bucket: 0,
            lower_bound: origin,
            interval_width,
            fanout_limit: NLIM,
        };
        wheel.reset(origin);
        wheel
    }

    /// Drop every event and restart the window at `origin`. Outstanding
    /// [`EventId`]s are invalidated; used when the job table is replaced
    /// wholesale.
    pub fn reset(&mut self, origin: i64) {
        self.arena = EventArena::new();
        self.buckets.clear();
        for i in 0..=self.num_buckets {
            self.buckets.push(Bucket {
                key: origin + i as i64 * self.interval_width,
                count: 0,
                is_dummy: i == self.num_buckets,
                anchor: self.arena.new_anchor(),
            });
        }
        self.curr_bucket = 0;
        self.lower_bound = origin;
    }

    /// Override the fan-out limit (tests lower it to force rebalancing).
    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        assert!(limit >= 1);
        self.fanout_limit = limit;
        self
    }

    fn wheel_len(&self) -> usize {
        self.num_buckets + 1
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    pub fn curr_bucket(&self) -> usize {
        self.curr_bucket
    }

    /// Events currently linked anywhere in the wheel, dummy included.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a fresh, unlinked event. It enters the wheel on the first
    /// [`hold`](Wheel::hold).
    pub fn new_event(&mut self, fire_time: i64, payload: T) -> EventId {
        self.arena.alloc(fire_time, payload)
    }

    /// Drop an event for good (job removed or schedule exhausted).
    pub fn retire(&mut self, ev: EventId) -> Option<T> {
        if self.arena.is_linked(ev) {
            let b = self.arena.bucket_idx(ev);
            self.arena.unlink(ev);
            self.buckets[b].count -= 1;
        }
        self.arena.free(ev)
    }

    pub fn fire_time(&self, ev: EventId) -> i64 {
        self.arena.fire_time(ev)
    }

    pub fn payload(&self, ev: EventId) -> Option<&T> {
        self.arena.payload(ev)
    }

    /// Extract the soonest pending event, advancing the window cursor to
    /// its bucket. `None` when every visible bucket is empty (events may
    /// still be parked in the dummy, see [`len`](Wheel::len)).
    pub fn remove_min(&mut self) -> Option<EventId> {
        for i in 0..self.num_buckets {
            let idx = (self.curr_bucket + i) % self.wheel_len();
            if self.buckets[idx].is_dummy || self.buckets[idx].count == 0 {
                continue;
            }
            let head = self.arena.next(self.buckets[idx].anchor);
            self.arena.unlink(head);
            self.buckets[idx].count -= 1;
            self.curr_bucket = idx;
            // max() guards monotonicity: a stale bucket left behind by a
            // fast-moving cursor must not drag the bound backwards.
            self.lower_bound = self.lower_bound.max(self.buckets[idx].key);
            return Some(head);
        }
        None
    }

    /// Insert or reposition `ev` at `fire_time + delay`.
    ///
    /// Fast path: an already-linked event whose successor still sorts
    /// after the new time stays put. Slow path: unlink, index the target
    /// bucket by uniform width, correct overshoot by walking bucket keys
    /// backward, then insert in fire-time order. A bucket pushed past the
    /// fan-out limit is split (if the dummy borders it) or adjusted.
    pub fn hold(&mut self, ev: EventId, delay: i64) {
        let new_t = self.arena.fire_time(ev) + delay;
        self.arena.set_fire_time(ev, new_t);

        if self.arena.is_linked(ev) {
            let b = self.arena.bucket_idx(ev);
            let succ = self.arena.next(ev);
            if succ != self.buckets[b].anchor && self.arena.fire_time(succ) >= new_t {
                return;
            }
            self.arena.unlink(ev);
            self.buckets[b].count -= 1;
        }

        let idx = self.target_bucket(new_t);
        self.insert_sorted(idx, ev);

        if self.buckets[idx].count > self.fanout_limit {
            let succ = (idx + 1) % self.wheel_len();
            if self.buckets[succ].is_dummy {
                self.split(idx);
            } else {
                self.adjust(idx);
            }
        }
    }

    /// Bucket whose range holds `t`. Past-due times land in the current
    /// bucket; times at or past the window edge land in the dummy.
    fn target_bucket(&self, t: i64) -> usize {
        let rel = (t - self.lower_bound).div_euclid(self.interval_width);
        let offset = rel.clamp(0, self.num_buckets as i64) as usize;
        let mut idx = (self.curr_bucket + offset) % self.wheel_len();
        // The uniform-width estimate overshoots once buckets have been
        // split; walk back until the bucket's key no longer exceeds t.
        while self.buckets[idx].key > t && idx != self.curr_bucket {
            idx = if idx == 0 { self.num_buckets } else { idx - 1 };
        }
        idx
    }

    /// Link `ev` into bucket `idx` keeping the list ascending by fire time.
    fn insert_sorted(&mut self, idx: usize, ev: EventId) {
        let t = self.arena.fire_time(ev);
        let anchor = self.buckets[idx].anchor;
        let mut cursor = anchor;
        loop {
            let next = self.arena.next(cursor);
            if next == anchor || self.arena.fire_time(next) > t {
                break;
            }
            cursor = next;
        }
        self.arena.link_after(cursor, ev);
        self.arena.set_bucket_idx(ev, idx);
        self.buckets[idx].count += 1;
    }

    /// Re-home an event without triggering rebalancing. Used for orphans
    /// so a split can never recurse through the window advance it causes.
    fn place(&mut self, ev: EventId) {
        let idx = self.target_bucket(self.arena.fire_time(ev));
        self.insert_sorted(idx, ev);
    }

    /// Realize the dummy as a bucket covering the upper half of bucket
    /// `idx`'s range and move the matching events over. No-op unless the
    /// slot after `idx` is currently the dummy (double-split guard).
    /// Finishes with a window advance so exactly one dummy remains.
    fn split(&mut self, idx: usize) {
        if idx >= self.wheel_len() || self.buckets[idx].is_dummy {
            return;
        }
        let succ = (idx + 1) % self.wheel_len();
        if !self.buckets[succ].is_dummy {
            return;
        }

        let mid = self.buckets[idx].key + self.interval_width / 2;
        self.buckets[succ].is_dummy = false;
        self.buckets[succ].key = mid;

        // Walk bucket idx head-to-tail, peeling off everything that now
        // belongs to the upper half. The dummy may already hold parked
        // far-future events; sorted insertion keeps them in order.
        let anchor = self.buckets[idx].anchor;
        let mut cursor = self.arena.next(anchor);
        while cursor != anchor {
            let next = self.arena.next(cursor);
            if self.arena.fire_time(cursor) >= mid {
                self.arena.unlink(cursor);
                self.buckets[idx].count -= 1;
                self.insert_sorted(succ, cursor);
            }
            cursor = next;
        }
        debug!(
            bucket = idx,
            mid,
            moved = self.buckets[succ].count,
            "split bucket"
        );

        let orphans = self.advance_window();
        for ev in orphans {
            self.place(ev);
        }
    }

    /// Redistribute an overflowing bucket into its right neighbor: up to
    /// half its events, tail first, but only those whose fire time already
    /// belongs in the neighbor's range. No-op when either side is the
    /// dummy.
    fn adjust(&mut self, idx: usize) {
        let right = (idx + 1) % self.wheel_len();
        if self.buckets[idx].is_dummy || self.buckets[right].is_dummy {
            return;
        }

        let right_key = self.buckets[right].key;
        let mut budget = self.buckets[idx].count / 2;
        let anchor = self.buckets[idx].anchor;
        let mut cursor = self.arena.prev(anchor);
        while cursor != anchor && budget > 0 {
            let prev = self.arena.prev(cursor);
            if self.arena.fire_time(cursor) >= right_key {
                self.arena.unlink(cursor);
                self.buckets[idx].count -= 1;
                self.insert_sorted(right, cursor);
                budget -= 1;
            }
            cursor = prev;
        }
    }

    /// Slide the window forward one `interval_width`: the current dummy
    /// becomes a real bucket (its key already marks the old window edge),
    /// and the bucket falling out of the past becomes the new dummy.
    ///
    /// Any events still pending in that outgoing bucket are returned to
    /// the caller; freeing them here would silently drop scheduled jobs.
    /// The scheduler loop re-holds them.
    pub fn advance_window(&mut self) -> Vec<EventId> {
        if let Some(d) = self.buckets.iter().position(|b| b.is_dummy) {
            self.buckets[d].is_dummy = false;
        }

        let out = self.curr_bucket;
        let mut orphans = Vec::new();
        let anchor = self.buckets[out].anchor;
        let mut cursor = self.arena.next(anchor);
        while cursor != anchor {
            let next = self.arena.next(cursor);
            self.arena.unlink(cursor);
            orphans.push(cursor);
            cursor = next;
        }
        self.buckets[out].count = 0;

        self.lower_bound += self.interval_width;
        self.buckets[out].is_dummy = true;
        self.buckets[out].key = self.lower_bound + self.num_buckets as i64 * self.interval_width;
        self.curr_bucket = (out + 1) % self.wheel_len();

        if !orphans.is_empty() {
            debug!(count = orphans.len(), "window advanced over pending events");
        }
        orphans
    }

    #[cfg(test)]
    fn bucket_times(&self, idx: usize) -> Vec<i64> {
        let anchor = self.buckets[idx].anchor;
        let mut out = Vec::new();
        let mut cursor = self.arena.next(anchor);
        while cursor != anchor {
            out.push(self.arena.fire_time(cursor));
            cursor = self.arena.next(cursor);
        }
        out
    }
}
