//! Newline-delimited framing over blocking streams.
//!
//! Every document travels as one line of JSON terminated by `\n`. Reads may
//! split a line anywhere, so [`FrameDecoder`] buffers bytes until it sees the
//! delimiter and hands out whole frames.

use std::io::{self, Read, Write};

use serde::Serialize;

const DELIMITER: u8 = b'\n';
const READ_CHUNK: usize = 4096;

/// Reassembles frames from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    // Bytes before this offset are known not to contain a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete, non-blank frame without its line ending.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let offset = self.buffer[self.scanned..]
                .iter()
                .position(|byte| *byte == DELIMITER);
            let Some(offset) = offset else {
                self.scanned = self.buffer.len();
                return None;
            };

            let end = self.scanned + offset;
            let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;

            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            if !frame.iter().all(u8::is_ascii_whitespace) {
                return Some(frame);
            }
        }
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Blocking frame reader over any byte stream.
///
/// Errors from the underlying stream (including read timeouts) are returned
/// as-is and leave the partial frame buffered, so callers can treat a timeout
/// as a poll interval and simply call [`FrameReader::read_frame`] again.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Returns `Ok(None)` once the peer has closed the stream.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(Some(frame));
            }

            let read = match self.inner.read(&mut self.chunk) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if read == 0 {
                return Ok(None);
            }
            self.decoder.push(&self.chunk[..read]);
        }
    }
}

/// Serializes `message` as one frame.
pub fn encode<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(DELIMITER);
    Ok(encoded)
}

pub fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: Write,
    T: Serialize,
{
    // Encode once and write with a single call so a frame is never interleaved.
    let encoded = encode(message)?;
    writer.write_all(&encoded)?;
    writer.flush()
}

/// True for the error kinds a socket read timeout surfaces as.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
