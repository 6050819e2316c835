use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use log::{error, warn};

use crate::error::SyncError;
use crate::synchronizer::{ScopedLockout, ScopedReadIndex, ScopedWriteIndex, SlotIndex};
use crate::synchronizer::{TripleBufferSynchronizer, SLOT_COUNT};

/// Three instances of `T` shared between one writer and one reader.
pub struct SharedBuffer<T> {
    slots: [UnsafeCell<T>; SLOT_COUNT],
    sync: TripleBufferSynchronizer,
}

// The synchronizer hands each slot to at most one side at a time, and lockouts exclude both.
unsafe impl<T: Send> Sync for SharedBuffer<T> {}

impl<T: Clone> SharedBuffer<T> {
    pub fn new(value: T) -> Self {
        Self::from_values(value.clone(), value.clone(), value)
    }
}

impl<T> SharedBuffer<T> {
    pub fn from_fn<F: FnMut() -> T>(mut make: F) -> Self {
        let a = make();
        let b = make();
        let c = make();
        Self::from_values(a, b, c)
    }

    fn from_values(a: T, b: T, c: T) -> Self {
        Self {
            slots: [UnsafeCell::new(a), UnsafeCell::new(b), UnsafeCell::new(c)],
            sync: TripleBufferSynchronizer::new(),
        }
    }

    pub fn has_update(&self) -> bool {
        self.sync.has_update()
    }

    /// Forgets any pushed value. Fails if a handle is alive.
    pub fn reset(&self) -> bool {
        self.sync.reset()
    }

    pub fn with_write_access(&self) -> Result<WriteHandle<T>, SyncError> {
        match ScopedWriteIndex::new(&self.sync) {
            Some(index) => Ok(WriteHandle { owner: self, index }),
            None => {
                warn!("write access denied: a writer is already registered");
                Err(SyncError::WriterBusy)
            }
        }
    }

    /// The handle is registered but not yet readable until the writer has committed once; see
    /// `ReadHandle::is_valid`.
    pub fn with_read_access(&self) -> Result<ReadHandle<T>, SyncError> {
        match ScopedReadIndex::new(&self.sync) {
            Some(index) => Ok(ReadHandle { owner: self, index }),
            None => {
                warn!("read access denied: a reader is already registered");
                Err(SyncError::ReaderBusy)
            }
        }
    }

    /// Excludes both the reader and the writer until the returned guard is dropped.
    pub fn lockout(&self) -> Result<Lockout<T>, SyncError> {
        let guard = ScopedLockout::new(&self.sync);
        if guard.is_valid() {
            Ok(Lockout { owner: self, guard })
        } else {
            Err(SyncError::Busy)
        }
    }

    /// Applies `f` to all three instances. Only legal while no handle exists.
    pub fn reconfigure<F: FnMut(&mut T)>(&self, f: F) -> Result<(), SyncError> {
        match self.lockout() {
            Ok(mut lockout) => {
                lockout.for_each_mut(f);
                Ok(())
            }
            Err(e) => {
                error!("reconfigure called while a reader or writer is active");
                Err(e)
            }
        }
    }

    fn slot_ptr(&self, slot: SlotIndex) -> *mut T {
        self.slots[slot.get()].get()
    }
}

impl<T: Default> Default for SharedBuffer<T> {
    fn default() -> Self {
        Self::from_fn(T::default)
    }
}

pub struct Lockout<'a, T> {
    owner: &'a SharedBuffer<T>,
    guard: ScopedLockout<'a>,
}

impl<'a, T> Lockout<'a, T> {
    pub fn for_each_mut<F: FnMut(&mut T)>(&mut self, mut f: F) {
        for slot in self.owner.slots.iter() {
            // The guard holds both registrations, so no handle can observe the slot.
            f(unsafe { &mut *slot.get() });
        }
    }

    /// Forgets any pushed value.
    pub fn reset(&mut self) {
        self.guard.reset();
    }
}

pub struct WriteHandle<'a, T> {
    owner: &'a SharedBuffer<T>,
    index: ScopedWriteIndex<'a>,
}

impl<'a, T> WriteHandle<'a, T> {
    /// Publishes the current instance and switches to another one. The new instance holds
    /// whatever was last written into it, so callers that accumulate must clear it first.
    pub fn commit(&mut self) {
        self.index.push_update();
    }
}

impl<'a, T> Deref for WriteHandle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.owner.slot_ptr(self.index.index()) }
    }
}

impl<'a, T> DerefMut for WriteHandle<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.owner.slot_ptr(self.index.index()) }
    }
}

pub struct ReadHandle<'a, T> {
    owner: &'a SharedBuffer<T>,
    index: ScopedReadIndex<'a>,
}

impl<'a, T> ReadHandle<'a, T> {
    /// False until the writer has committed at least once.
    pub fn is_valid(&self) -> bool {
        self.index.index().is_some()
    }

    /// Switches to the latest committed instance, if there is a newer one.
    pub fn refresh(&mut self) -> bool {
        self.index.pull_update();
        self.is_valid()
    }

    pub fn get(&self) -> Option<&T> {
        self.index
            .index()
            .map(|slot| unsafe { &*self.owner.slot_ptr(slot) })
    }
}

impl<'a, T> Deref for ReadHandle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("read handle dereferenced before anything was committed"),
        }
    }
}
