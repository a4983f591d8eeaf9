//! Response assembly for a single request
//!
//! A `Task` owns the response state of one request. The application talks
//! to it through `StartResponse`, and the task serializes the response head
//! and body framing into the channel output buffer through a `Sink`.
use std::any::Any;
use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use httpdate::HttpDate;

use base_serializer::{MessageState, Body, HeaderError};
use base_serializer::{invalid_header_name, invalid_header_value};
use enums::{Version, parse_code, code_has_body};
use headers::{is_hop_by_hop, is_keep_alive, is_close, title_case};
use server::environ::Environ;
use server::error::{Error, RequestError};
use server::request::Request;
use server::simple_error_page::{self, SimpleErrorPage};


/// Error returned by the application
pub type AppError = Box<dyn StdError + Send + Sync>;

/// Response body produced by the application
pub type Chunks = Box<dyn Iterator<Item=Result<Vec<u8>, AppError>>>;

/// The synchronous application served by the server
///
/// The application must call `start_response.start()` before its first
/// body byte is sent, either directly or while the returned iterator is
/// being consumed.
pub trait Application: Send + Sync + 'static {
    fn call(&self, environ: &mut Environ, start_response: &mut StartResponse)
        -> Result<Chunks, AppError>;
}

/// Destination of the response bytes
pub trait Sink: Send + Sync {
    /// Queue bytes to be sent to the client
    ///
    /// May block while the client is slow at reading, returns
    /// `Error::ClientDisconnected` when the connection is gone.
    fn write_soon(&self, data: &[u8]) -> Result<usize, Error>;
    /// Best-effort check that the client is still there
    fn client_connected(&self) -> bool;
}

/// The parts of a request that influence the response framing
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub version: Version,
    pub method: String,
    pub connection: String,
    pub path: String,
}

/// Lets the application start the response and write body directly
pub struct StartResponse<'a> {
    task: &'a mut Task,
}

pub struct Task {
    sink: Arc<dyn Sink>,
    head: RequestHead,
    ident: String,
    start_time: SystemTime,

    status: String,
    status_code: u16,
    response_headers: Vec<(String, String)>,
    state: MessageState,
    started: bool,
    wrote_header: bool,
    has_body: bool,
    close_on_finish: bool,
    chunked_response: bool,
    content_length: Option<u64>,
    content_bytes_written: u64,
    logged_write_excess: bool,
    logged_write_no_body: bool,
}

impl RequestHead {
    pub fn from_request(request: &Request) -> RequestHead {
        RequestHead {
            version: Version::from_request(request.version()),
            method: request.method().to_string(),
            connection: request.header("CONNECTION").unwrap_or("")
                .to_string(),
            path: request.path().to_string(),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Server errors passed through the application with `?` come back as is
fn app_error(err: AppError) -> Error {
    match err.downcast::<Error>() {
        Ok(err) => *err,
        Err(err) => Error::Application(err),
    }
}

/// Runs application code converting a panic into an error
fn guard<T, F>(f: F) -> Result<T, Error>
    where F: FnOnce() -> Result<T, AppError>
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(app_error(e)),
        Err(payload) => Err(Error::Panic(panic_message(payload))),
    }
}

impl Task {
    pub fn new(sink: Arc<dyn Sink>, head: RequestHead, ident: &str) -> Task {
        let body = if head.method == "HEAD" { Body::Head } else { Body::Normal };
        Task {
            state: MessageState::new(head.version, body),
            sink: sink,
            has_body: head.method != "HEAD",
            head: head,
            ident: ident.to_string(),
            start_time: SystemTime::now(),
            status: String::new(),
            status_code: 0,
            response_headers: Vec::new(),
            started: false,
            wrote_header: false,
            close_on_finish: false,
            chunked_response: false,
            content_length: None,
            content_bytes_written: 0,
            logged_write_excess: false,
            logged_write_no_body: false,
        }
    }

    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }
    pub fn close_on_finish(&self) -> bool {
        self.close_on_finish
    }

    /// Run the application and send its response
    pub fn service(&mut self, app: &dyn Application, environ: &mut Environ)
        -> Result<(), Error>
    {
        let result = self.execute(app, environ)
            .and_then(|()| self.finish());
        match result {
            Err(Error::Io(e)) => {
                self.close_on_finish = true;
                Err(Error::Io(e))
            }
            other => other,
        }
    }

    /// Send an error page for a request that could not be parsed
    pub fn service_error(&mut self, err: &RequestError) -> Result<(), Error> {
        let status = err.status();
        let body = SimpleErrorPage::new(status.clone(), err.body()).render();
        self.started = true;
        self.status = status.to_string();
        self.status_code = status.code();
        self.response_headers.push(
            ("Content-Type".into(), simple_error_page::CONTENT_TYPE.into()));
        // the connection is closed anyway, tell the client explicitly
        self.response_headers.push(("Connection".into(), "close".into()));
        self.close_on_finish = true;
        self.content_length = Some(body.len() as u64);
        self.write(&body)?;
        self.finish()
    }

    fn execute(&mut self, app: &dyn Application, environ: &mut Environ)
        -> Result<(), Error>
    {
        let mut chunks = {
            let mut start_response = StartResponse { task: self };
            guard(|| app.call(environ, &mut start_response))?
        };
        let single_chunk = chunks.size_hint() == (1, Some(1));
        let mut first = true;
        loop {
            let chunk = match guard(|| Ok(chunks.next()))? {
                Some(chunk) => chunk.map_err(app_error)?,
                None => break,
            };
            if first {
                first = false;
                // start_response may be called by the iterator
                if single_chunk && self.content_length.is_none() &&
                    !self.wrote_header && self.head.method != "HEAD"
                {
                    self.content_length = Some(chunk.len() as u64);
                }
            }
            if !chunk.is_empty() {
                self.write(&chunk)?;
            }
        }
        let sends_body = self.head.method != "HEAD" &&
            code_has_body(self.status_code);
        match self.content_length {
            Some(cl) if sends_body && self.content_bytes_written < cl => {
                // the client would wait for the missing bytes forever
                self.close_on_finish = true;
                warn!("application returned too few bytes ({}) \
                    for specified Content-Length ({})",
                    self.content_bytes_written, cl);
            }
            _ => {}
        }
        Ok(())
    }

    fn start_response(&mut self, status: String, headers: Vec<(String, String)>,
        exc: Option<AppError>)
        -> Result<(), Error>
    {
        if self.started && exc.is_none() {
            return Err(Error::StartResponseTwice);
        }
        if let Some(exc) = exc {
            if self.wrote_header {
                return Err(Error::Application(exc));
            }
            self.response_headers.clear();
            self.content_length = None;
        }
        self.started = true;

        if invalid_header_value(status.as_bytes()) {
            return Err(Error::InvalidStatus(status));
        }
        let code = match parse_code(&status) {
            Some(code) => code,
            None => return Err(Error::InvalidStatus(status)),
        };
        for &(ref name, ref value) in &headers {
            if invalid_header_name(name.as_bytes()) {
                return Err(HeaderError::InvalidHeaderName.into());
            }
            if invalid_header_value(value.as_bytes()) {
                return Err(HeaderError::InvalidHeaderValue.into());
            }
            if name.eq_ignore_ascii_case("Content-Length") {
                match value.trim().parse() {
                    Ok(cl) => self.content_length = Some(cl),
                    Err(_) => {
                        return Err(HeaderError::InvalidContentLength.into())
                    }
                }
            } else if is_hop_by_hop(name) {
                return Err(HeaderError::HopByHop(name.clone()).into());
            }
        }
        self.status = status;
        self.status_code = code;
        self.response_headers.extend(headers);
        Ok(())
    }

    /// Serialize the response head, deciding on framing and keep-alive
    fn build_response_header(&mut self) -> Result<Vec<u8>, Error> {
        if !code_has_body(self.status_code) {
            self.has_body = false;
        }
        let bodyless = !code_has_body(self.status_code);
        let mut response_headers = Vec::with_capacity(
            self.response_headers.len() + 4);
        let mut content_length_header = None;
        let mut date_header = false;
        let mut server_header = false;
        let mut connection_header = false;
        for &(ref name, ref value) in &self.response_headers {
            let name = title_case(name);
            match &name[..] {
                "Content-Length" if bodyless => continue,
                "Transfer-Encoding" if bodyless => continue,
                "Content-Length" => {
                    content_length_header = Some(value.clone());
                }
                "Date" => date_header = true,
                "Server" => server_header = true,
                "Connection" => connection_header = true,
                _ => {}
            }
            response_headers.push((name, value.clone()));
        }
        if content_length_header.is_none() && self.has_body {
            if let Some(cl) = self.content_length {
                content_length_header = Some(cl.to_string());
                response_headers.push(
                    ("Content-Length".into(), cl.to_string()));
            }
        }

        let mut close = false;
        let connection = self.head.connection.as_bytes();
        match self.head.version {
            Version::Http10 => {
                if is_keep_alive(connection) && content_length_header.is_some()
                {
                    response_headers.push(
                        ("Connection".into(), "Keep-Alive".into()));
                } else {
                    close = true;
                }
            }
            Version::Http11 => {
                if is_close(connection) {
                    close = true;
                }
                if content_length_header.is_none() && self.has_body {
                    response_headers.push(
                        ("Transfer-Encoding".into(), "chunked".into()));
                    self.chunked_response = true;
                }
            }
        }
        if close || self.close_on_finish {
            if !connection_header {
                response_headers.push(("Connection".into(), "close".into()));
            }
            self.close_on_finish = true;
        }

        if !server_header {
            response_headers.push(("Server".into(), self.ident.clone()));
        } else {
            response_headers.push(("Via".into(), self.ident.clone()));
        }
        if !date_header {
            response_headers.push(
                ("Date".into(), HttpDate::from(self.start_time).to_string()));
        }

        let mut buf = Vec::with_capacity(256);
        self.state.response_status(&mut buf, self.status_code, &self.status);
        for &(ref name, ref value) in &response_headers {
            match &name[..] {
                "Content-Length" => {
                    let cl = value.trim().parse()
                        .map_err(|_| HeaderError::InvalidContentLength)?;
                    self.state.add_length(&mut buf, cl)?;
                }
                "Transfer-Encoding" => self.state.add_chunked(&mut buf)?,
                _ => self.state.add_header(&mut buf, name, value.as_bytes())?,
            }
        }
        if !self.state.done_headers(&mut buf) && self.has_body {
            // HEAD or bodyless status code
            self.has_body = false;
        }
        if self.has_body && !self.chunked_response &&
            content_length_header.is_none()
        {
            // body delimited by closing the connection
            self.close_on_finish = true;
        }
        self.response_headers = response_headers;
        Ok(buf)
    }

    /// Write part of the response body, sending the head first if needed
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.started {
            return Err(Error::ResponseNotStarted);
        }
        if !self.wrote_header {
            let head = self.build_response_header()?;
            self.sink.write_soon(&head)?;
            self.wrote_header = true;
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.has_body {
            let mut buf = Vec::with_capacity(data.len() + 16);
            let written = self.state.write_body(&mut buf, data);
            self.content_bytes_written += written as u64;
            if written < data.len() {
                self.close_on_finish = true;
                if !self.logged_write_excess {
                    warn!("application-written content exceeded the number \
                        of bytes specified by Content-Length header ({})",
                        self.content_length.unwrap_or(0));
                    self.logged_write_excess = true;
                }
            }
            if !buf.is_empty() {
                self.sink.write_soon(&buf)?;
            }
        } else {
            // bytes are reported as written to avoid length mismatch
            self.content_bytes_written += data.len() as u64;
            if !self.logged_write_no_body {
                warn!("application-written content was ignored due to \
                    HEAD or bodyless status code");
                self.logged_write_no_body = true;
            }
        }
        Ok(())
    }

    /// Send the head if it wasn't sent yet and terminate the body
    pub fn finish(&mut self) -> Result<(), Error> {
        if !self.wrote_header {
            self.write(b"")?;
        }
        let mut buf = Vec::new();
        if !self.state.done(&mut buf) {
            self.close_on_finish = true;
        }
        if !buf.is_empty() {
            self.sink.write_soon(&buf)?;
        }
        Ok(())
    }
}

impl<'a> StartResponse<'a> {
    /// Set the status line (`200 OK`) and response headers
    ///
    /// Fails if called a second time, if the status or headers contain
    /// control characters, or if a hop-by-hop header is supplied.
    pub fn start<S, I, K, V>(&mut self, status: S, headers: I)
        -> Result<(), Error>
        where S: Into<String>,
              I: IntoIterator<Item=(K, V)>,
              K: Into<String>,
              V: Into<String>,
    {
        let headers = headers.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.task.start_response(status.into(), headers, None)
    }

    /// Replace the response after an error
    ///
    /// Works only while the response head is not sent yet, otherwise
    /// the error is returned back, it should be propagated out of the
    /// application.
    pub fn start_with_error<S, I, K, V>(&mut self, status: S, headers: I,
        exc: AppError)
        -> Result<(), Error>
        where S: Into<String>,
              I: IntoIterator<Item=(K, V)>,
              K: Into<String>,
              V: Into<String>,
    {
        let headers = headers.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.task.start_response(status.into(), headers, Some(exc))
    }

    /// Write body bytes immediately, bypassing the returned iterator
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.task.write(data)
    }
}
