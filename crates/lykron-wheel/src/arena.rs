//! Fixed-overhead event storage: a slab of slots linked into circular
//! doubly-linked lists by `u32` indices.
//!
//! Indices keep the O(1) link/unlink discipline of an intrusive list
//! without dangling-pointer hazards. Bucket anchors are ordinary slots with no payload, self-linked when
//! their list is empty. Freed slots go on a free list and are reused.

const NONE: u32 = u32::MAX;

/// Handle to one slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Slot<T> {
    fire_time: i64,
    bucket_idx: u32,
    prev: u32,
    next: u32,
    /// `None` for anchors and free slots.
    payload: Option<T>,
}

pub struct EventArena<T> {
    slots: Vec<Slot<T>>,
    free_head: u32,
}

impl<T> EventArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NONE,
        }
    }

    /// Allocate a payload-less, self-linked slot serving as a list anchor.
    pub fn new_anchor(&mut self) -> EventId {
        let id = self.take_slot();
        let slot = &mut self.slots[id.index()];
        slot.prev = id.0;
        slot.next = id.0;
        id
    }

    /// Allocate a fresh, unlinked event.
    pub fn alloc(&mut self, fire_time: i64, payload: T) -> EventId {
        let id = self.take_slot();
        let slot = &mut self.slots[id.index()];
        slot.fire_time = fire_time;
        slot.payload = Some(payload);
        id
    }

    /// Return an event's slot to the free list. The event must already be
    /// unlinked.
    pub fn free(&mut self, id: EventId) -> Option<T> {
        let slot = &mut self.slots[id.index()];
        debug_assert_eq!(slot.prev, NONE, "freeing a linked event");
        let payload = slot.payload.take();
        slot.prev = NONE;
        slot.next = self.free_head;
        self.free_head = id.0;
        payload
    }

    fn take_slot(&mut self) -> EventId {
        if self.free_head != NONE {
            let idx = self.free_head;
            self.free_head = self.slots[idx as usize].next;
            let slot = &mut self.slots[idx as usize];
            slot.fire_time = 0;
            slot.bucket_idx = 0;
            slot.prev = NONE;
            slot.next = NONE;
            slot.payload = None;
            return EventId(idx);
        }
        self.slots.push(Slot {
            fire_time: 0,
            bucket_idx: 0,
            prev: NONE,
            next: NONE,
            payload: None,
        });
        EventId((self.slots.len() - 1) as u32)
    }

    /// Insert `node` immediately after `cursor`. O(1).
    pub fn link_after(&mut self, cursor: EventId, node: EventId) {
        debug_assert!(!self.is_linked(node), "linking an already-linked event");
        let after = self.slots[cursor.index()].next;
        self.slots[node.index()].next = after;
        self.slots[node.index()].prev = cursor.0;
        self.slots[after as usize].prev = node.0;
        self.slots[cursor.index()].next = node.0;
    }

    /// Remove `node` from whatever list holds it and clear its links.
    /// Unlinking an unlinked node is a no-op.
    pub fn unlink(&mut self, node: EventId) {
        let (prev, next) = {
            let slot = &self.slots[node.index()];
            (slot.prev, slot.next)
        };
        if prev == NONE {
            return;
        }
        self.slots[prev as usize].next = next;
        self.slots[next as usize].prev = prev;
        let slot = &mut self.slots[node.index()];
        slot.prev = NONE;
        slot.next = NONE;
    }

    pub fn is_linked(&self, id: EventId) -> bool {
        self.slots[id.index()].prev != NONE
    }

    pub fn next(&self, id: EventId) -> EventId {
        EventId(self.slots[id.index()].next)
    }

    pub fn prev(&self, id: EventId) -> EventId {
        EventId(self.slots[id.index()].prev)
    }

    pub fn fire_time(&self, id: EventId) -> i64 {
        self.slots[id.index()].fire_time
    }

    pub fn set_fire_time(&mut self, id: EventId, t: i64) {
        self.slots[id.index()].fire_time = t;
    }

    pub fn bucket_idx(&self, id: EventId) -> usize {
        self.slots[id.index()].bucket_idx as usize
    }

    pub fn set_bucket_idx(&mut self, id: EventId, idx: usize) {
        self.slots[id.index()].bucket_idx = idx as u32;
    }

    pub fn payload(&self, id: EventId) -> Option<&T> {
        self.slots[id.index()].payload.as_ref()
    }
}

impl<T> Default for EventArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
