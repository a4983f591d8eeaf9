use std::cmp;
use std::io;

use buffer::OverflowBuffer;
use chunked::ChunkedReceiver;


/// Consumes a body of known `Content-Length`
#[derive(Debug)]
pub struct FixedLengthReceiver {
    remaining: u64,
    buf: OverflowBuffer,
}

impl FixedLengthReceiver {
    pub fn new(content_length: u64, buf: OverflowBuffer)
        -> FixedLengthReceiver
    {
        FixedLengthReceiver {
            remaining: content_length,
            buf: buf,
        }
    }

    /// Returns number of bytes consumed, which is never more than the
    /// bytes still expected
    pub fn received(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = cmp::min(self.remaining, data.len() as u64) as usize;
        if n > 0 {
            self.buf.append(&data[..n])?;
            self.remaining -= n as u64;
        }
        Ok(n)
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
    pub fn is_completed(&self) -> bool {
        self.remaining == 0
    }
    pub fn into_buffer(self) -> OverflowBuffer {
        self.buf
    }
}

/// Body framing of a request in progress
#[derive(Debug)]
pub enum BodyReceiver {
    Fixed(FixedLengthReceiver),
    Chunked(ChunkedReceiver),
}

impl BodyReceiver {
    pub fn received(&mut self, data: &[u8]) -> io::Result<usize> {
        match *self {
            BodyReceiver::Fixed(ref mut r) => r.received(data),
            BodyReceiver::Chunked(ref mut r) => r.received(data),
        }
    }
    pub fn is_completed(&self) -> bool {
        match *self {
            BodyReceiver::Fixed(ref r) => r.is_completed(),
            BodyReceiver::Chunked(ref r) => r.is_completed(),
        }
    }
    /// Framing error, only chunked bodies can have one
    pub fn error(&self) -> Option<&'static str> {
        match *self {
            BodyReceiver::Fixed(..) => None,
            BodyReceiver::Chunked(ref r) => r.error(),
        }
    }
    pub fn is_chunked(&self) -> bool {
        matches!(*self, BodyReceiver::Chunked(..))
    }
    pub fn into_buffer(self) -> OverflowBuffer {
        match self {
            BodyReceiver::Fixed(r) => r.into_buffer(),
            BodyReceiver::Chunked(r) => r.into_buffer(),
        }
    }
}
