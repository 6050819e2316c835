use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum DecoderError {
    Io(io::Error),
    Application(&'static str),
    IllFormed,
    Empty,
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecoderError::Io(io_err) => write!(f, "Error when reading stream: {}", io_err),
            DecoderError::Application(s) => write!(f, "Application error: {}", s),
            DecoderError::IllFormed => write!(f, "Stream is illformed"),
            DecoderError::Empty => write!(f, "Stream is empty"),
        }
    }
}

impl Error for DecoderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DecoderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Interleaved samples, one frame of `channels()` values after another.
pub trait RawStream<T>: Iterator<Item = T> + Send {
    fn channels(&self) -> usize;
    fn sample_rate(&self) -> i32;
}

pub fn normalize_i16(v: i16) -> f32 {
    v as f32 / i16::max_value() as f32
}

/// Deinterleaves up to `block[0].len()` frames into one buffer per channel. Returns the number of
/// complete frames read; fewer than requested means the stream ran out.
pub fn read_block<S: RawStream<i16>>(stream: &mut S, block: &mut [Vec<f32>]) -> usize {
    let channels = stream.channels();
    assert!(block.len() == channels, "need one buffer per channel");
    let frames = block.first().map_or(0, |b| b.len());

    for frame in 0..frames {
        for channel in block.iter_mut() {
            match stream.next() {
                Some(v) => channel[frame] = normalize_i16(v),
                None => return frame,
            }
        }
    }
    frames
}
