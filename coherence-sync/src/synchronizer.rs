//! Wait-free index exchange between one writer and one reader.
//!
//! Three storage slots rotate between five roles: the slot the writer is filling, the slot the
//! reader is looking at, the most recently pushed slot waiting to be read, and two landing slots
//! the reader parks finished slots in. At every instant the occupied roles hold each of the slot
//! indices 0, 1 and 2 exactly once.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub const SLOT_COUNT: usize = 3;

const NO_SLOT: u8 = u8::max_value();

/// One of the three slots managed by a `TripleBufferSynchronizer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

struct SlotCell(AtomicU8);

impl SlotCell {
    fn new(slot: Option<SlotIndex>) -> Self {
        Self(AtomicU8::new(encode(slot)))
    }

    fn load(&self) -> Option<SlotIndex> {
        decode(self.0.load(Ordering::Acquire))
    }

    fn store(&self, slot: Option<SlotIndex>) {
        self.0.store(encode(slot), Ordering::Release);
    }

    fn swap(&self, slot: Option<SlotIndex>) -> Option<SlotIndex> {
        decode(self.0.swap(encode(slot), Ordering::AcqRel))
    }

    fn fill_if_empty(&self, slot: SlotIndex) -> bool {
        self.0
            .compare_exchange(NO_SLOT, slot.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[inline(always)]
fn encode(slot: Option<SlotIndex>) -> u8 {
    match slot {
        Some(SlotIndex(idx)) => idx,
        None => NO_SLOT,
    }
}

#[inline(always)]
fn decode(raw: u8) -> Option<SlotIndex> {
    if raw == NO_SLOT {
        None
    } else {
        debug_assert!((raw as usize) < SLOT_COUNT, "slot index out of range");
        Some(SlotIndex(raw))
    }
}

pub struct TripleBufferSynchronizer {
    // Shared between both roles.
    ready_to_read: SlotCell,
    ready_to_write: SlotCell,
    ready_to_write2: SlotCell,

    // Only touched by the registered writer (resp. reader), or under a lockout.
    writer_index: SlotCell,
    reader_index: SlotCell,

    writer_registered: AtomicBool,
    reader_registered: AtomicBool,
}

impl TripleBufferSynchronizer {
    pub fn new() -> Self {
        let sync = Self {
            ready_to_read: SlotCell::new(None),
            ready_to_write: SlotCell::new(None),
            ready_to_write2: SlotCell::new(None),
            writer_index: SlotCell::new(None),
            reader_index: SlotCell::new(None),
            writer_registered: AtomicBool::new(false),
            reader_registered: AtomicBool::new(false),
        };
        sync.restore_pristine();
        sync
    }

    fn restore_pristine(&self) {
        self.ready_to_read.store(None);
        self.ready_to_write.store(Some(SlotIndex(0)));
        self.ready_to_write2.store(Some(SlotIndex(1)));
        self.writer_index.store(Some(SlotIndex(2)));
        self.reader_index.store(None);
    }

    /// Returns to the state where nothing has been pushed yet. Fails, leaving the state alone,
    /// if a reader or writer is registered.
    pub fn reset(&self) -> bool {
        ScopedLockout::new(self).reset()
    }

    /// Advisory only: a push may land right after this returns false.
    pub fn has_update(&self) -> bool {
        self.ready_to_read.load().is_some()
    }

    pub fn register_writer(&self) -> bool {
        self.writer_registered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release_writer(&self) {
        self.writer_registered.store(false, Ordering::Release);
    }

    pub fn register_reader(&self) -> bool {
        self.reader_registered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release_reader(&self) {
        self.reader_registered.store(false, Ordering::Release);
    }

    fn writer_slot(&self) -> Option<SlotIndex> {
        self.writer_index.load()
    }

    fn reader_slot(&self) -> Option<SlotIndex> {
        self.reader_index.load()
    }

    // Writer only.
    fn push_update(&self) {
        let current = self.writer_index.load();
        debug_assert!(current.is_some(), "writer index empty before push");

        let mut next = self.ready_to_read.swap(current);
        if next.is_none() {
            // Only the writer ever empties the landing slots, so whichever one the reader filled
            // stays filled until we take it here.
            next = self.ready_to_write.swap(None);
            if next.is_none() {
                next = self.ready_to_write2.swap(None);
            }
        }

        debug_assert!(next.is_some(), "writer index empty after push");
        self.writer_index.store(next);
    }

    // Reader only.
    fn pull_update(&self) {
        // The writer never pushes an empty slot, so once this is non-empty only we can empty it.
        if self.ready_to_read.load().is_none() {
            return;
        }

        if let Some(current) = self.reader_index.load() {
            if !self.ready_to_write.fill_if_empty(current) {
                // ready_to_write, ready_to_read and our own index are all occupied, so the second
                // landing slot must be free.
                let displaced = self.ready_to_write2.swap(Some(current));
                debug_assert!(displaced.is_none(), "both landing slots occupied");
            }
        }

        self.reader_index.store(self.ready_to_read.swap(None));
    }

    /// Snapshot of the occupied roles, in the order ready_to_read, ready_to_write,
    /// ready_to_write2, writer, reader. Only meaningful while both roles are quiescent.
    pub fn slot_census(&self) -> [Option<SlotIndex>; 5] {
        [
            self.ready_to_read.load(),
            self.ready_to_write.load(),
            self.ready_to_write2.load(),
            self.writer_index.load(),
            self.reader_index.load(),
        ]
    }

    /// True when the occupied roles hold each slot exactly once.
    pub fn is_consistent(&self) -> bool {
        let mut seen = [false; SLOT_COUNT];
        let mut occupied = 0;
        for slot in self.slot_census().iter().filter_map(|s| *s) {
            if seen[slot.get()] {
                return false;
            }
            seen[slot.get()] = true;
            occupied += 1;
        }
        occupied == SLOT_COUNT
    }
}

impl Default for TripleBufferSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer registration held for the lifetime of the value.
pub struct ScopedWriteIndex<'a> {
    owner: &'a TripleBufferSynchronizer,
}

impl<'a> ScopedWriteIndex<'a> {
    /// `None` if another writer is already registered.
    pub fn new(owner: &'a TripleBufferSynchronizer) -> Option<Self> {
        if owner.register_writer() {
            Some(Self { owner })
        } else {
            None
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.owner
            .writer_slot()
            .expect("writer index is never empty while a writer is registered")
    }

    /// Publishes the current slot to the reader and moves on to a fresh one, keeping the
    /// registration.
    pub fn push_update(&mut self) {
        self.owner.push_update();
    }
}

impl<'a> Drop for ScopedWriteIndex<'a> {
    fn drop(&mut self) {
        self.owner.release_writer();
    }
}

/// Reader registration held for the lifetime of the value.
pub struct ScopedReadIndex<'a> {
    owner: &'a TripleBufferSynchronizer,
}

impl<'a> ScopedReadIndex<'a> {
    /// `None` if another reader is already registered. Picks up the latest push, if any.
    pub fn new(owner: &'a TripleBufferSynchronizer) -> Option<Self> {
        if owner.register_reader() {
            owner.pull_update();
            Some(Self { owner })
        } else {
            None
        }
    }

    /// `None` until the writer has pushed at least once.
    pub fn index(&self) -> Option<SlotIndex> {
        self.owner.reader_slot()
    }

    pub fn pull_update(&mut self) {
        self.owner.pull_update();
    }
}

impl<'a> Drop for ScopedReadIndex<'a> {
    fn drop(&mut self) {
        self.owner.release_reader();
    }
}

/// Registers as both reader and writer. While valid, nobody else can touch any slot.
pub struct ScopedLockout<'a> {
    owner: &'a TripleBufferSynchronizer,
    has_read_lock: bool,
    has_write_lock: bool,
}

impl<'a> ScopedLockout<'a> {
    pub fn new(owner: &'a TripleBufferSynchronizer) -> Self {
        let has_read_lock = owner.register_reader();
        let has_write_lock = owner.register_writer();
        Self {
            owner,
            has_read_lock,
            has_write_lock,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.has_read_lock && self.has_write_lock
    }

    /// Restores the pristine state of the owner. Does nothing and returns false if invalid.
    pub fn reset(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.owner.restore_pristine();
        true
    }
}

impl<'a> Drop for ScopedLockout<'a> {
    fn drop(&mut self) {
        if self.has_read_lock {
            self.owner.release_reader();
        }
        if self.has_write_lock {
            self.owner.release_writer();
        }
    }
}
