use std::error::Error;
use std::fmt;
use std::io;

use coherence_sync::SyncError;

use crate::raw_stream::DecoderError;

#[derive(Debug)]
pub enum CoherenceError {
    Config(String),
    Sync(SyncError),
    Decoder(DecoderError),
    Io(io::Error),
    Thread(&'static str),
}

impl fmt::Display for CoherenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CoherenceError::Config(s) => write!(f, "Configuration error: {}", s),
            CoherenceError::Sync(e) => write!(f, "Synchronization error: {}", e),
            CoherenceError::Decoder(e) => write!(f, "Decoder error: {}", e),
            CoherenceError::Io(e) => write!(f, "IO error: {}", e),
            CoherenceError::Thread(s) => write!(f, "Thread error: {}", s),
        }
    }
}

impl Error for CoherenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CoherenceError::Sync(e) => Some(e),
            CoherenceError::Decoder(e) => Some(e),
            CoherenceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CoherenceError {
    fn from(e: SyncError) -> Self {
        CoherenceError::Sync(e)
    }
}

impl From<DecoderError> for CoherenceError {
    fn from(e: DecoderError) -> Self {
        CoherenceError::Decoder(e)
    }
}

impl From<io::Error> for CoherenceError {
    fn from(e: io::Error) -> Self {
        CoherenceError::Io(e)
    }
}
