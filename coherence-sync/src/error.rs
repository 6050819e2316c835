use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    WriterBusy,
    ReaderBusy,
    Busy,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::WriterBusy => write!(f, "a writer is already registered"),
            SyncError::ReaderBusy => write!(f, "a reader is already registered"),
            SyncError::Busy => write!(f, "cannot lock out while a reader or writer is active"),
        }
    }
}

impl Error for SyncError {}
