//! Lock-free handoff of the latest value from one writer thread to one reader thread.
//!
//! `SharedBuffer<T>` owns three instances of `T` and uses a `TripleBufferSynchronizer` to decide
//! which instance each side may touch. Neither side ever blocks or allocates; the reader always
//! sees the most recently committed write and intermediate writes may be skipped.

mod error;
mod shared;
mod synchronizer;

pub use error::SyncError;
pub use shared::{Lockout, ReadHandle, SharedBuffer, WriteHandle};
pub use synchronizer::{
    ScopedLockout, ScopedReadIndex, ScopedWriteIndex, SlotIndex, TripleBufferSynchronizer,
    SLOT_COUNT,
};
