use std::cmp;
use std::io;
use std::mem;

use httparse::{self, parse_chunk_size};

use buffer::OverflowBuffer;


/// Maximum length of chunk size line, extensions included
pub const MAX_CHUNK_HEAD: usize = 4096;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitSizeLine,
    ConsumeChunk,
    AwaitChunkTerminator,
    AwaitTrailer,
    Completed,
    Error,
}

/// Decodes a `Transfer-Encoding: chunked` request body into a buffer
///
/// Framing errors never panic or return `Err`, they move the receiver into
/// the absorbing `Error` state and are reported via `error()`. `Err` is only
/// returned when the buffer itself fails (i.e. the temporary file).
#[derive(Debug)]
pub struct ChunkedReceiver {
    state: State,
    remaining: u64,
    line: Vec<u8>,
    error: Option<&'static str>,
    buf: OverflowBuffer,
}

impl ChunkedReceiver {
    pub fn new(buf: OverflowBuffer) -> ChunkedReceiver {
        ChunkedReceiver {
            state: State::AwaitSizeLine,
            remaining: 0,
            line: Vec::new(),
            error: None,
            buf: buf,
        }
    }

    /// Feed bytes, returns the number of bytes consumed
    ///
    /// Bytes after the end of the body (the next pipelined request) are
    /// left unconsumed.
    pub fn received(&mut self, data: &[u8]) -> io::Result<usize> {
        use self::State::*;
        let mut pos = 0;
        while pos < data.len() {
            match self.state {
                AwaitSizeLine => {
                    match data[pos..].iter().position(|&x| x == b'\n') {
                        Some(idx) => {
                            self.line.extend_from_slice(&data[pos..pos+idx+1]);
                            pos += idx + 1;
                            let line = mem::replace(&mut self.line, Vec::new());
                            self.size_line(&line);
                        }
                        None => {
                            self.line.extend_from_slice(&data[pos..]);
                            pos = data.len();
                        }
                    }
                    if self.line.len() > MAX_CHUNK_HEAD {
                        self.fail("Chunk size line is too long");
                    }
                }
                ConsumeChunk => {
                    let n = cmp::min(self.remaining,
                                     (data.len() - pos) as u64) as usize;
                    self.buf.append(&data[pos..pos+n])?;
                    pos += n;
                    self.remaining -= n as u64;
                    if self.remaining == 0 {
                        self.state = AwaitChunkTerminator;
                    }
                }
                AwaitChunkTerminator => {
                    let expected = b"\r\n"[self.line.len()];
                    if data[pos] != expected {
                        self.fail("Chunk not properly terminated");
                        continue;
                    }
                    pos += 1;
                    self.line.push(expected);
                    if self.line.len() == 2 {
                        self.line.clear();
                        self.state = AwaitSizeLine;
                    }
                }
                AwaitTrailer => {
                    let byte = data[pos];
                    pos += 1;
                    self.line.push(byte);
                    if byte == b'\n' {
                        if !self.line.ends_with(b"\r\n") {
                            self.fail("Trailer line not terminated by CRLF");
                        } else if self.line.len() == 2 {
                            self.line.clear();
                            self.state = Completed;
                        } else {
                            // trailer fields are not exposed
                            self.line.clear();
                        }
                    } else if self.line.len() > MAX_CHUNK_HEAD {
                        self.fail("Trailer line is too long");
                    }
                }
                Completed | Error => break,
            }
        }
        Ok(pos)
    }

    fn size_line(&mut self, line: &[u8]) {
        let line = match line.len().checked_sub(2) {
            Some(end) if &line[end..] == b"\r\n" => &line[..end],
            _ => {
                self.fail("Chunk size line not terminated by CRLF");
                return;
            }
        };
        let (size, ext) = match line.iter().position(|&x| x == b';') {
            Some(idx) => (&line[..idx], &line[idx..]),
            None => (line, &b""[..]),
        };
        if !ext.is_empty() && !valid_extension(ext) {
            self.fail("Invalid chunk extension");
            return;
        }
        // no whitespace around the size, lenient framing helps smuggling
        if size.is_empty() || !size.iter().all(|x| x.is_ascii_hexdigit()) {
            self.fail("Invalid chunk size");
            return;
        }
        match parse_chunk_size(line_with_crlf(size).as_slice()) {
            Ok(httparse::Status::Complete((_, 0))) => {
                self.state = State::AwaitTrailer;
            }
            Ok(httparse::Status::Complete((_, chunk_size))) => {
                self.remaining = chunk_size;
                self.state = State::ConsumeChunk;
            }
            Ok(httparse::Status::Partial) | Err(_) => {
                self.fail("Invalid chunk size");
            }
        }
    }

    fn fail(&mut self, message: &'static str) {
        self.error = Some(message);
        self.state = State::Error;
    }

    pub fn state(&self) -> State {
        self.state
    }
    pub fn is_completed(&self) -> bool {
        self.state == State::Completed
    }
    pub fn error(&self) -> Option<&'static str> {
        self.error
    }
    pub fn buffer(&self) -> &OverflowBuffer {
        &self.buf
    }
    pub fn into_buffer(self) -> OverflowBuffer {
        self.buf
    }
}

fn line_with_crlf(size: &[u8]) -> Vec<u8> {
    let mut head = Vec::with_capacity(size.len() + 2);
    head.extend_from_slice(size);
    head.extend_from_slice(b"\r\n");
    head
}

fn is_tchar(x: u8) -> bool {
    x.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&x)
}

fn skip_ows(ext: &[u8], mut pos: usize) -> usize {
    while pos < ext.len() && (ext[pos] == b' ' || ext[pos] == b'\t') {
        pos += 1;
    }
    pos
}

fn skip_token(ext: &[u8], mut pos: usize) -> Option<usize> {
    let start = pos;
    while pos < ext.len() && is_tchar(ext[pos]) {
        pos += 1;
    }
    if pos > start { Some(pos) } else { None }
}

fn skip_quoted(ext: &[u8], mut pos: usize) -> Option<usize> {
    if ext.get(pos) != Some(&b'"') {
        return None;
    }
    pos += 1;
    while pos < ext.len() {
        match ext[pos] {
            b'"' => return Some(pos + 1),
            b'\\' => {
                match ext.get(pos + 1) {
                    Some(&x) if x == b'\t' || x >= 0x20 && x != 0x7f => {
                        pos += 2;
                    }
                    _ => return None,
                }
            }
            x if x == b'\t' || x >= 0x20 && x != 0x7f => pos += 1,
            _ => return None,
        }
    }
    None
}

/// Validates `*( BWS ";" BWS token [ BWS "=" BWS ( token / quoted-string ) ] )`
fn valid_extension(ext: &[u8]) -> bool {
    let mut pos = 0;
    while pos < ext.len() {
        pos = skip_ows(ext, pos);
        if ext.get(pos) != Some(&b';') {
            return false;
        }
        pos = skip_ows(ext, pos + 1);
        pos = match skip_token(ext, pos) {
            Some(p) => p,
            None => return false,
        };
        pos = skip_ows(ext, pos);
        if ext.get(pos) == Some(&b'=') {
            pos = skip_ows(ext, pos + 1);
            pos = match skip_token(ext, pos).or_else(|| skip_quoted(ext, pos)) {
                Some(p) => p,
                None => return false,
            };
            pos = skip_ows(ext, pos);
        }
    }
    true
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use buffer::OverflowBuffer;
    use super::{ChunkedReceiver, State, valid_extension};

    fn receiver() -> ChunkedReceiver {
        ChunkedReceiver::new(OverflowBuffer::new(1 << 20))
    }

    fn body(rcv: ChunkedReceiver) -> Vec<u8> {
        let mut buf = rcv.into_buffer();
        let mut result = Vec::new();
        buf.read_to_end(&mut result).unwrap();
        result
    }

    #[test]
    fn simple() {
        let mut rcv = receiver();
        let data = b"4\r\nhell\r\n1\r\no\r\n0\r\n\r\nGET /next";
        let n = rcv.received(data).unwrap();
        assert_eq!(n, data.len() - b"GET /next".len());
        assert!(rcv.is_completed());
        assert_eq!(rcv.error(), None);
        assert_eq!(body(rcv), b"hello");
    }

    #[test]
    fn byte_by_byte() {
        let data = b"5;name=value\r\nhello\r\nA\r\n0123456789\r\n0\r\n\r\n";
        let mut rcv = receiver();
        for i in 0..data.len() {
            assert!(!rcv.is_completed());
            assert_eq!(rcv.received(&data[i..i+1]).unwrap(), 1);
        }
        assert!(rcv.is_completed());
        assert_eq!(body(rcv), b"hello0123456789");
    }

    #[test]
    fn trailer() {
        let mut rcv = receiver();
        let data = b"3\r\nabc\r\n0\r\nX-Checksum: 1\r\nX-Other: 2\r\n\r\n";
        assert_eq!(rcv.received(data).unwrap(), data.len());
        assert!(rcv.is_completed());
        assert_eq!(body(rcv), b"abc");
    }

    #[test]
    fn after_completion_nothing_consumed() {
        let mut rcv = receiver();
        rcv.received(b"0\r\n\r\n").unwrap();
        assert!(rcv.is_completed());
        assert_eq!(rcv.received(b"more").unwrap(), 0);
    }

    #[test]
    fn invalid_hex() {
        let mut rcv = receiver();
        rcv.received(b"zz\r\nhello\r\n").unwrap();
        assert_eq!(rcv.state(), State::Error);
        assert_eq!(rcv.error(), Some("Invalid chunk size"));
        assert!(!rcv.is_completed());
    }

    #[test]
    fn huge_size() {
        let mut rcv = receiver();
        rcv.received(b"fffffffffffffffffffff\r\n").unwrap();
        assert_eq!(rcv.error(), Some("Invalid chunk size"));
    }

    #[test]
    fn invalid_extension() {
        let mut rcv = receiver();
        rcv.received(b"5;na me\r\nhello\r\n").unwrap();
        assert_eq!(rcv.error(), Some("Invalid chunk extension"));
    }

    #[test]
    fn missing_chunk_terminator() {
        let mut rcv = receiver();
        rcv.received(b"5\r\nhelloXX0\r\n\r\n").unwrap();
        assert_eq!(rcv.error(), Some("Chunk not properly terminated"));
        assert!(!rcv.is_completed());
    }

    #[test]
    fn final_chunk_not_terminated() {
        let mut rcv = receiver();
        rcv.received(b"5\r\nhello").unwrap();
        rcv.received(b"\n0\r\n\r\n").unwrap();
        assert_eq!(rcv.state(), State::Error);
        assert!(!rcv.is_completed());
        assert_eq!(rcv.received(b"\r\n").unwrap(), 0);
        assert!(!rcv.is_completed());
    }

    #[test]
    fn bare_lf_size_line() {
        let mut rcv = receiver();
        rcv.received(b"5\nhello\r\n0\r\n\r\n").unwrap();
        assert_eq!(rcv.error(),
                   Some("Chunk size line not terminated by CRLF"));
        assert!(!rcv.is_completed());
    }

    #[test]
    fn whitespace_around_size() {
        for data in &[&b" 5\r\nhello\r\n"[..], b"5 \r\nhello\r\n",
                      b"\t5\r\nhello\r\n", b"\r\n5\r\nhello\r\n"]
        {
            let mut rcv = receiver();
            rcv.received(data).unwrap();
            assert_eq!(rcv.error(), Some("Invalid chunk size"), "{:?}", data);
        }
    }

    #[test]
    fn bare_lf_trailer() {
        let mut rcv = receiver();
        rcv.received(b"3\r\nabc\r\n0\r\n\n").unwrap();
        assert_eq!(rcv.state(), State::Error);
        assert!(!rcv.is_completed());
    }

    #[test]
    fn extensions() {
        assert!(valid_extension(b";a"));
        assert!(valid_extension(b";a=b"));
        assert!(valid_extension(b"; a = \"quoted; value\" ;b"));
        assert!(!valid_extension(b";"));
        assert!(!valid_extension(b";a=\"unterminated"));
        assert!(!valid_extension(b";a=\x01"));
        assert!(!valid_extension(b";a b"));
    }
}
