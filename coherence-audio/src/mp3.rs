use std::io::Read;

use minimp3::{Decoder, Error as Mp3Error, Frame};

use crate::raw_stream::{DecoderError, RawStream};

/// Streams the interleaved samples of an MP3, frame by frame.
pub struct Mp3Decoder<R: Send> {
    decoder: Decoder<R>,
    cursor: FrameCursor,
}

fn next_frame<R: Read>(decoder: &mut Decoder<R>) -> Result<Frame, DecoderError> {
    loop {
        match decoder.next_frame() {
            Ok(frame) => return Ok(frame),
            Err(Mp3Error::Io(err)) => return Err(DecoderError::Io(err)),
            Err(Mp3Error::InsufficientData) => {
                return Err(DecoderError::Application("Insufficient data"))
            }
            Err(Mp3Error::Eof) => return Err(DecoderError::Empty),
            Err(Mp3Error::SkippedData) => continue,
        }
    }
}

// Position within the current frame. The first frame fixes the layout of the whole stream.
struct FrameCursor {
    frame: Frame,
    offset: usize,
}

impl FrameCursor {
    fn new(frame: Frame) -> Result<Self, DecoderError> {
        if frame.channels == 0 {
            return Err(DecoderError::IllFormed);
        }
        Ok(Self { frame, offset: 0 })
    }

    fn next_sample<F>(&mut self, mut next_frame: F) -> Option<i16>
    where
        F: FnMut() -> Result<Frame, DecoderError>,
    {
        while self.offset == self.frame.data.len() {
            let frame = next_frame().ok()?;
            // Layout changes mid-stream would scramble the deinterleaving.
            if frame.channels != self.frame.channels || frame.sample_rate != self.frame.sample_rate
            {
                return None;
            }
            self.frame = frame;
            self.offset = 0;
        }

        let v = self.frame.data[self.offset];
        self.offset += 1;
        Some(v)
    }
}

impl<R> Mp3Decoder<R>
where
    R: Read + Send,
{
    pub fn new(reader: R) -> Result<Mp3Decoder<R>, DecoderError> {
        let mut decoder = Decoder::new(reader);
        let cursor = FrameCursor::new(next_frame(&mut decoder)?)?;
        Ok(Mp3Decoder { decoder, cursor })
    }
}

impl<R> Iterator for Mp3Decoder<R>
where
    R: Read + Send,
{
    type Item = i16;

    fn next(&mut self) -> Option<Self::Item> {
        let decoder = &mut self.decoder;
        self.cursor.next_sample(|| next_frame(decoder))
    }
}

impl<R> RawStream<i16> for Mp3Decoder<R>
where
    R: Read + Send,
{
    fn channels(&self) -> usize {
        self.cursor.frame.channels
    }

    fn sample_rate(&self) -> i32 {
        self.cursor.frame.sample_rate
    }
}
