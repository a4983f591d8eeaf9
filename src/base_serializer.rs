//! Low-level serialization of response heads and body framing
//!
//! Everything here writes into a plain `Vec<u8>` which is then handed to
//! the channel output buffer as a whole.
use std::fmt::Display;
use std::io::Write;

use enums::Version;
use enums::code_has_body;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("Header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("Header value contains invalid characters")
        }
        InvalidContentLength {
            description("Content-Length is not a number")
        }
        HopByHop(name: String) {
            description("Hop-by-hop headers are not allowed")
            display("{:?} is a hop-by-hop header, it can't be set \
                by the application", name)
        }
        TransferEncodingAfterContentLength {
            description("Transfer encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
        RequireBodyless {
            description("This message must not contain body length fields.")
        }
    }
}

/// Response framing state
#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent.
    ResponseStart { version: Version, body: Body },
    /// Status line is already in the buffer.
    Headers { body: Body },
    /// The message contains a fixed size body.
    FixedHeaders { is_head: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedHeaders { is_head: bool },
    /// All 1xx (Informational), 204 (No Content),
    /// and 304 (Not Modified) responses do not include a message body.
    Bodyless,
    /// The message contains a body with the given number of bytes left.
    FixedBody { is_head: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedBody { is_head: bool },
    /// Body of unknown length, delimited by closing the connection.
    CloseDelimited,
    /// A message in final state.
    Done,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Body {
    /// Message contains a body.
    Normal,
    /// Message body is ignored: responses to HEAD requests.
    Head,
    /// Message must not have a body: all 1xx (Informational),
    /// 204 (No Content), and 304 (Not Modified) responses
    Denied,
}

/// Header names must be tokens
pub fn invalid_header_name(name: &[u8]) -> bool {
    name.is_empty() || name.iter().any(|&x| {
        !(x.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&x))
    })
}

/// Header values (and status lines) must not contain control characters
pub fn invalid_header_value(value: &[u8]) -> bool {
    value.iter().any(|&x| (x < 0x20 && x != b'\t') || x == 0x7f)
}

/// The interim response sent for `Expect: 100-continue`
pub fn continue_line(version: Version) -> Vec<u8> {
    format!("{} 100 Continue\r\n\r\n", version).into_bytes()
}

impl MessageState {
    pub fn new(version: Version, body: Body) -> MessageState {
        MessageState::ResponseStart { version: version, body: body }
    }

    /// Write status line.
    ///
    /// `status` is a full status like `200 OK`, the code is passed
    /// separately to decide whether the response may have a body.
    ///
    /// # Panics
    ///
    /// When status line is already written.
    pub fn response_status(&mut self, buf: &mut Vec<u8>,
        code: u16, status: &str)
    {
        use self::Body::*;
        use self::MessageState::*;
        match *self {
            ResponseStart { version, mut body } => {
                write!(buf, "{} {}\r\n", version, status).unwrap();
                if !code_has_body(code) {
                    body = Denied
                }
                *self = Headers { body: body };
            }
            ref state => {
                panic!("Called response_status() method on response \
                    in state {:?}", state)
            }
        }
    }

    fn write_header(&mut self, buf: &mut Vec<u8>, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        if invalid_header_name(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        if invalid_header_value(value) {
            return Err(HeaderError::InvalidHeaderValue);
        }
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value);
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn write_formatted<D: Display>(&mut self, buf: &mut Vec<u8>,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        self.write_header(buf, name, value.to_string().as_bytes())
    }

    /// Add a header to the message.
    ///
    /// `Content-Length` header must be send using the `add_length` method
    /// and `Transfer-Encoding: chunked` must be set with the `add_chunked`
    /// method.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut Vec<u8>, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers { .. } | FixedHeaders { .. } | ChunkedHeaders { .. } => {
                self.write_header(buf, name, value)
            }
            ref state => {
                panic!("Called add_header() method on a message in state {:?}",
                       state)
            }
        }
    }

    /// Add a content length to the message.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Vec<u8>, n: u64)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        use self::Body::*;
        match *self {
            FixedHeaders { .. } => Err(DuplicateContentLength),
            ChunkedHeaders { .. } => Err(ContentLengthAfterTransferEncoding),
            Headers { body: Denied } => Err(RequireBodyless),
            Headers { body } => {
                self.write_formatted(buf, "Content-Length", n)?;
                *self = FixedHeaders { is_head: body == Head,
                                       content_length: n };
                Ok(())
            }
            ref state => {
                panic!("Called add_length() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Sets the transfer encoding to chunked.
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self, buf: &mut Vec<u8>)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        use self::Body::*;
        match *self {
            FixedHeaders { .. } => Err(TransferEncodingAfterContentLength),
            ChunkedHeaders { .. } => Err(DuplicateTransferEncoding),
            Headers { body: Denied } => Err(RequireBodyless),
            Headers { body } => {
                self.write_header(buf, "Transfer-Encoding", b"chunked")?;
                *self = ChunkedHeaders { is_head: body == Head };
                Ok(())
            }
            ref state => {
                panic!("Called add_chunked() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Closes the HTTP header and returns `true` if entity body is expected.
    ///
    /// A response without either length header whose status allows a body
    /// is delimited by closing the connection, it's up to the caller to
    /// ensure the connection is closed afterwards.
    ///
    /// # Panics
    ///
    /// Panics when the response is in a wrong state.
    pub fn done_headers(&mut self, buf: &mut Vec<u8>) -> bool {
        use self::Body::*;
        use self::MessageState::*;
        let expect_body = match *self {
            Headers { body: Denied } => {
                *self = Bodyless;
                false
            }
            Headers { body: Head } => {
                *self = FixedBody { is_head: true, content_length: 0 };
                false
            }
            Headers { body: Normal } => {
                *self = CloseDelimited;
                true
            }
            FixedHeaders { is_head, content_length } => {
                *self = FixedBody { is_head: is_head,
                                    content_length: content_length };
                !is_head
            }
            ChunkedHeaders { is_head } => {
                *self = ChunkedBody { is_head: is_head };
                !is_head
            }
            ref state => {
                panic!("Called done_headers() method on  in state {:?}",
                       state)
            }
        };
        buf.extend_from_slice(b"\r\n");
        expect_body
    }

    /// Write a chunk of the message body.
    ///
    /// Returns the number of bytes of `data` accepted as part of the body.
    /// For a fixed-size body bytes over the declared length are not
    /// written. Bodyless messages and responses to HEAD requests accept
    /// nothing. Empty chunks are never framed, since a zero-size chunk
    /// terminates the body.
    ///
    /// # Panics
    ///
    /// When headers are not finished yet.
    pub fn write_body(&mut self, buf: &mut Vec<u8>, data: &[u8]) -> usize {
        use self::MessageState::*;
        match *self {
            Bodyless | Done => 0,
            FixedBody { is_head: true, .. } |
            ChunkedBody { is_head: true } => 0,
            FixedBody { is_head: false, ref mut content_length } => {
                let n = if data.len() as u64 > *content_length {
                    *content_length as usize
                } else {
                    data.len()
                };
                buf.extend_from_slice(&data[..n]);
                *content_length -= n as u64;
                n
            }
            ChunkedBody { is_head: false } => {
                if data.len() > 0 {
                    write!(buf, "{:x}\r\n", data.len()).unwrap();
                    buf.extend_from_slice(data);
                    buf.extend_from_slice(b"\r\n");
                }
                data.len()
            }
            CloseDelimited => {
                buf.extend_from_slice(data);
                data.len()
            }
            ref state => {
                panic!("Called write_body() method on message \
                    in state {:?}", state)
            }
        }
    }

    /// Writes needed finalization data into the buffer
    ///
    /// Returns `false` if a fixed size body was not written entirely,
    /// in which case the connection can't be reused. The method may be
    /// called multiple times.
    ///
    /// # Panics
    ///
    /// When headers are not finished yet.
    pub fn done(&mut self, buf: &mut Vec<u8>) -> bool {
        use self::MessageState::*;
        let complete = match *self {
            Bodyless | Done | CloseDelimited => true,
            FixedBody { is_head: true, .. } |
            ChunkedBody { is_head: true } => true,
            FixedBody { is_head: false, content_length } => {
                content_length == 0
            }
            ChunkedBody { is_head: false } => {
                buf.extend_from_slice(b"0\r\n\r\n");
                true
            }
            ref state => {
                panic!("Called done() method on response in state {:?}",
                       state);
            }
        };
        *self = Done;
        complete
    }
}
