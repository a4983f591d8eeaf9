//! Incremental HTTP request parser
use std::mem;

use base_serializer::invalid_header_name;
use body_parser::{BodyReceiver, FixedLengthReceiver};
use buffer::OverflowBuffer;
use chunked::ChunkedReceiver;
use headers::{cgi_key, latin1, is_close, is_keep_alive, is_continue};
use headers::is_chunked;
use server::Config;
use server::error::RequestError;
use server::request_target::{split_uri, SplitUri};


/// A single HTTP request, filled in by repeatedly calling `received()`
///
/// The request is finished when `is_completed()` returns true. At that
/// point it either carries an error, is empty (only blank lines were
/// received) or is ready to be serviced.
#[derive(Debug)]
pub struct Request {
    max_header: u64,
    max_body: u64,
    inbuf_overflow: u64,

    header_plus: Vec<u8>,
    header_bytes_received: u64,
    body_bytes_received: u64,
    body_rcv: Option<BodyReceiver>,
    body: Option<OverflowBuffer>,

    method: String,
    uri: String,
    version: String,
    url: SplitUri,
    headers: Vec<(String, String)>,

    content_length: u64,
    chunked: bool,
    expect_continue: bool,
    connection_close: bool,
    headers_finished: bool,
    completed: bool,
    empty: bool,
    error: Option<RequestError>,
}

/// Returns index right after the blank line ending the header block
fn find_double_newline(s: &[u8]) -> Option<usize> {
    for (idx, &byte) in s.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        match s.get(idx+1) {
            Some(&b'\n') => return Some(idx + 2),
            Some(&b'\r') if s.get(idx+2) == Some(&b'\n') => {
                return Some(idx + 3);
            }
            _ => {}
        }
    }
    None
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len()-1]
    } else {
        line
    }
}

fn trim_ows(mut s: &[u8]) -> &[u8] {
    while s.first().map(|&x| x == b' ' || x == b'\t').unwrap_or(false) {
        s = &s[1..];
    }
    while s.last().map(|&x| x == b' ' || x == b'\t').unwrap_or(false) {
        s = &s[..s.len()-1];
    }
    s
}

/// Split header block into lines, joining folded continuation lines
fn get_header_lines(header: &[u8]) -> Result<Vec<Vec<u8>>, RequestError> {
    let mut result: Vec<Vec<u8>> = Vec::new();
    for line in header.split(|&x| x == b'\n') {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }
        if line.contains(&b'\r') {
            return Err(RequestError::BadRequest(format!(
                "Bare CR found in header line {:?}", latin1(line))));
        }
        if line[0] == b' ' || line[0] == b'\t' {
            match result.last_mut() {
                Some(prev) => prev.extend_from_slice(line),
                None => {
                    return Err(RequestError::BadRequest(format!(
                        "Malformed header line {:?}", latin1(line))));
                }
            }
        } else {
            result.push(line.to_vec());
        }
    }
    Ok(result)
}

/// Parse `METHOD SP target [SP HTTP/version]`
///
/// Returns empty strings when the line doesn't match the grammar.
fn crack_first_line(line: &str)
    -> Result<(String, String, String), RequestError>
{
    let empty = Ok((String::new(), String::new(), String::new()));
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().unwrap_or("");
    let uri = match parts.next() {
        Some(uri) => uri,
        None => return empty,
    };
    let version = match parts.next() {
        Some(rest) if rest.starts_with("HTTP/") => {
            let ver = &rest[5..];
            if ver.is_empty() ||
                !ver.bytes().all(|x| x.is_ascii_digit() || x == b'.')
            {
                return empty;
            }
            ver
        }
        Some(_) => return empty,
        None => "",
    };
    if method.is_empty() || uri.is_empty() {
        return empty;
    }
    if method.to_ascii_uppercase() != method {
        return Err(RequestError::BadRequest(format!(
            "Malformed HTTP method {:?}", method)));
    }
    Ok((method.to_string(), uri.to_string(), version.to_string()))
}

impl Request {
    pub fn new(config: &Config) -> Request {
        Request {
            max_header: config.max_request_header_size,
            max_body: config.max_request_body_size,
            inbuf_overflow: config.inbuf_overflow,
            header_plus: Vec::new(),
            header_bytes_received: 0,
            body_bytes_received: 0,
            body_rcv: None,
            body: None,
            method: String::new(),
            uri: String::new(),
            version: String::new(),
            url: SplitUri::default(),
            headers: Vec::new(),
            content_length: 0,
            chunked: false,
            expect_continue: false,
            connection_close: false,
            headers_finished: false,
            completed: false,
            empty: false,
            error: None,
        }
    }

    /// Feed bytes to the parser, returns the number of bytes consumed
    ///
    /// Bytes which are not consumed belong to the next request.
    pub fn received(&mut self, data: &[u8]) -> usize {
        if self.completed {
            return 0;
        }
        if self.body_rcv.is_some() {
            return self.received_body(data);
        }
        let mut s = mem::replace(&mut self.header_plus, Vec::new());
        s.extend_from_slice(data);
        let index = find_double_newline(&s);
        let consumed = match index {
            Some(index) => {
                self.header_bytes_received = index as u64;
                data.len() - (s.len() - index)
            }
            None => {
                self.header_bytes_received += data.len() as u64;
                data.len()
            }
        };
        if self.header_bytes_received >= self.max_header {
            // still need a version to respond with
            self.parse_header(b"GET / HTTP/1.0\r\n").ok();
            self.error = Some(RequestError::HeaderTooLarge(format!(
                "exceeds max_header of {}", self.max_header)));
            self.completed = true;
            return consumed;
        }
        let index = match index {
            Some(index) => index,
            None => {
                self.header_plus = s;
                return consumed;
            }
        };
        let start = s[..index].iter()
            .position(|&x| !matches!(x, b' ' | b'\t' | b'\r' | b'\n'))
            .unwrap_or(index);
        let header_plus = &s[start..index];
        if header_plus.is_empty() {
            self.empty = true;
            self.completed = true;
        } else {
            match self.parse_header(header_plus) {
                Err(e) => {
                    self.error = Some(e);
                    self.completed = true;
                }
                Ok(()) => {
                    if self.body_rcv.is_none() {
                        self.completed = true;
                    }
                    if self.content_length > 0 &&
                        self.content_length >= self.max_body
                    {
                        self.error = Some(RequestError::BodyTooLarge(
                            format!("exceeds max_body of {}",
                                    self.max_body)));
                        self.completed = true;
                    }
                }
            }
        }
        self.headers_finished = true;
        consumed
    }

    fn received_body(&mut self, data: &[u8]) -> usize {
        let consumed = match self.body_rcv.as_mut().map(|b| b.received(data)) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                error!("Can't buffer request body: {}", e);
                self.error = Some(RequestError::Internal(
                    "can't buffer request body".into()));
                self.completed = true;
                return data.len();
            }
            None => return 0,
        };
        self.body_bytes_received += consumed as u64;
        let (completed, error) = match self.body_rcv {
            Some(ref b) => (b.is_completed(), b.error()),
            None => (false, None),
        };
        if self.body_bytes_received >= self.max_body {
            // only reachable for chunked bodies
            self.error = Some(RequestError::BodyTooLarge(format!(
                "exceeds max_body of {}", self.max_body)));
            self.completed = true;
        } else if let Some(msg) = error {
            self.error = Some(RequestError::BadRequest(msg.to_string()));
            self.completed = true;
        } else if completed {
            self.completed = true;
            if let Some(rcv) = self.body_rcv.take() {
                let buf = rcv.into_buffer();
                if self.chunked {
                    // decoded body is exposed as a plain one
                    self.content_length = buf.len();
                    self.set_header("CONTENT_LENGTH",
                                    buf.len().to_string());
                }
                self.body = Some(buf);
            }
        }
        consumed
    }

    fn parse_header(&mut self, header_plus: &[u8]) -> Result<(), RequestError>
    {
        let index = match header_plus.iter().position(|&x| x == b'\n') {
            Some(index) => index,
            None => {
                return Err(RequestError::BadRequest(
                    "HTTP message header invalid".into()));
            }
        };
        let first_line = strip_cr(&header_plus[..index]);
        if first_line.contains(&b'\r') {
            return Err(RequestError::BadRequest(
                "Bare CR found in HTTP message".into()));
        }
        let first_line = latin1(first_line);
        let first_line = first_line.trim_end();
        let (method, uri, version) = crack_first_line(first_line)?;
        // error responses to broken header lines use the request version
        self.version = version.clone();
        for line in get_header_lines(&header_plus[index+1..])? {
            let colon = match line.iter().position(|&x| x == b':') {
                Some(colon) => colon,
                None => {
                    return Err(RequestError::BadRequest(format!(
                        "Invalid header {:?}", latin1(&line))));
                }
            };
            let (name, value) = (&line[..colon], trim_ows(&line[colon+1..]));
            if invalid_header_name(name) {
                return Err(RequestError::BadRequest(format!(
                    "Invalid header name {:?}", latin1(name))));
            }
            if name.contains(&b'_') {
                // ambiguous once mapped to CGI names
                continue;
            }
            let key = cgi_key(name);
            let value = latin1(value);
            match self.headers.iter_mut().find(|&&mut (ref k, _)| *k == key) {
                Some(&mut (_, ref mut old)) => {
                    old.push_str(", ");
                    old.push_str(&value);
                }
                None => self.headers.push((key, value)),
            }
        }

        if method.is_empty() {
            return Err(RequestError::BadRequest(format!(
                "Malformed HTTP request line {:?}", first_line)));
        }
        self.url = match split_uri(&uri) {
            Some(url) => url,
            None => {
                return Err(RequestError::BadRequest(format!(
                    "Malformed request target {:?}", uri)));
            }
        };
        self.method = method;
        self.uri = uri;
        self.version = version;

        let connection = self.header("CONNECTION").unwrap_or("").to_string();
        if self.version == "1.1" {
            let te = self.remove_header("TRANSFER_ENCODING")
                .unwrap_or_else(String::new);
            let encodings = te.split(',')
                .filter(|e| !e.trim().is_empty())
                .collect::<Vec<_>>();
            if encodings.iter().any(|e| !is_chunked(e.as_bytes())) {
                return Err(RequestError::NotImplemented(
                    "Transfer-Encoding requested is not supported.".into()));
            }
            if !encodings.is_empty() {
                self.chunked = true;
                self.body_rcv = Some(BodyReceiver::Chunked(
                    ChunkedReceiver::new(
                        OverflowBuffer::new(self.inbuf_overflow))));
            }
            self.expect_continue = self.header("EXPECT")
                .map(|v| is_continue(v.as_bytes()))
                .unwrap_or(false);
            if is_close(connection.as_bytes()) {
                self.connection_close = true;
            }
        } else if !is_keep_alive(connection.as_bytes()) {
            self.connection_close = true;
        }

        if !self.chunked {
            let cl = self.header("CONTENT_LENGTH")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            self.content_length = cl;
            if cl > 0 {
                self.body_rcv = Some(BodyReceiver::Fixed(
                    FixedLengthReceiver::new(cl,
                        OverflowBuffer::new(self.inbuf_overflow))));
            }
        }
        Ok(())
    }

    fn set_header(&mut self, key: &str, value: String) {
        match self.headers.iter_mut().find(|&&mut (ref k, _)| k == key) {
            Some(&mut (_, ref mut old)) => *old = value,
            None => self.headers.push((key.to_string(), value)),
        }
    }

    fn remove_header(&mut self, key: &str) -> Option<String> {
        let idx = self.headers.iter().position(|&(ref k, _)| k == key)?;
        Some(self.headers.remove(idx).1)
    }

    /// Header value by its normalized name (`CONTENT_TYPE`)
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter()
            .find(|&&(ref k, _)| k == key)
            .map(|&(_, ref v)| &v[..])
    }
    /// All headers with normalized names, duplicates already joined
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
    pub fn method(&self) -> &str {
        &self.method
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    /// Version number as received (`1.1`), empty for a bare request line
    pub fn version(&self) -> &str {
        &self.version
    }
    pub fn url(&self) -> &SplitUri {
        &self.url
    }
    pub fn path(&self) -> &str {
        &self.url.path
    }
    pub fn query(&self) -> &str {
        &self.url.query
    }
    pub fn content_length(&self) -> u64 {
        self.content_length
    }
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }
    pub fn connection_close(&self) -> bool {
        self.connection_close
    }
    pub fn headers_finished(&self) -> bool {
        self.headers_finished
    }
    pub fn is_completed(&self) -> bool {
        self.completed
    }
    pub fn is_empty(&self) -> bool {
        self.empty
    }
    pub fn error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }
    /// Takes the request body, empty if the request had none
    pub fn take_body(&mut self) -> OverflowBuffer {
        self.body.take()
            .unwrap_or_else(|| OverflowBuffer::new(self.inbuf_overflow))
    }
}
