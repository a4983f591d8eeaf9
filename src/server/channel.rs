//! A client connection
//!
//! The `Channel` is owned by the reactor and does non-blocking socket I/O.
//! Everything worker threads touch lives in `Shared` behind a single mutex:
//! the output buffers and the queue of parsed requests. A channel is handed
//! to the dispatcher when its request queue becomes non-empty, and a worker
//! drains the whole queue before releasing it.
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Condvar};
use std::time::{Duration, Instant};

use mio::{Interest, Token};
use mio::event::Source;

use base_serializer::continue_line;
use buffer::OverflowBuffer;
use enums::Version;
use server::Config;
use server::dispatcher::{Dispatcher, Job};
use server::environ::{Environ, ServerInfo, ClientProbe};
use server::error::{Error, RequestError};
use server::listener::Stream;
use server::reactor::Trigger;
use server::request::Request;
use server::task::{Application, Sink, Task, RequestHead};


const SEND_CHUNK: usize = 64 << 10;
const INTERNAL_ERROR: &'static str =
    "The server encountered an unexpected internal server error";

struct State {
    outbufs: VecDeque<OverflowBuffer>,
    total_outbufs_len: u64,
    current_outbuf_count: u64,
    requests: VecDeque<Request>,
    /// handed to the dispatcher and not released yet
    scheduled: bool,
    /// a request is popped from the queue and being serviced
    servicing: bool,
    connected: bool,
    close_when_flushed: bool,
    client_disconnected: bool,
}

/// The part of a channel shared with worker threads
pub struct Shared {
    config: Arc<Config>,
    app: Arc<dyn Application>,
    info: Arc<ServerInfo>,
    trigger: Trigger,
    remote: Option<SocketAddr>,
    state: Mutex<State>,
    drained: Condvar,
}

pub struct Channel {
    token: Token,
    stream: Stream,
    shared: Arc<Shared>,
    config: Arc<Config>,
    request: Option<Request>,
    read_buf: Vec<u8>,
    sent_continue: bool,
    parse_stopped: bool,
    eof: bool,
    read_ready: bool,
    write_ready: bool,
    last_activity: Instant,
}

impl State {
    fn in_flight(&self) -> usize {
        self.requests.len() + if self.servicing { 1 } else { 0 }
    }

    fn append(&mut self, data: &[u8], config: &Config) -> io::Result<()> {
        if self.outbufs.is_empty() ||
            self.current_outbuf_count >= config.outbuf_high_watermark
        {
            self.outbufs.push_back(OverflowBuffer::new(config.outbuf_overflow));
            self.current_outbuf_count = 0;
        }
        if let Some(buf) = self.outbufs.back_mut() {
            buf.append(data)?;
        }
        self.current_outbuf_count += data.len() as u64;
        self.total_outbufs_len += data.len() as u64;
        Ok(())
    }
}

impl Shared {
    pub fn new(config: Arc<Config>, app: Arc<dyn Application>,
        info: Arc<ServerInfo>, trigger: Trigger, remote: Option<SocketAddr>)
        -> Shared
    {
        let mut outbufs = VecDeque::new();
        outbufs.push_back(OverflowBuffer::new(config.outbuf_overflow));
        Shared {
            config: config,
            app: app,
            info: info,
            trigger: trigger,
            remote: remote,
            state: Mutex::new(State {
                outbufs: outbufs,
                total_outbufs_len: 0,
                current_outbuf_count: 0,
                requests: VecDeque::new(),
                scheduled: false,
                servicing: false,
                connected: true,
                close_when_flushed: false,
                client_disconnected: false,
            }),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn peer(&self) -> String {
        match self.remote {
            Some(addr) => addr.to_string(),
            None => "unix socket".to_string(),
        }
    }

    /// Queue a parsed request
    ///
    /// Returns `true` if the channel must be handed to the dispatcher,
    /// i.e. no worker is draining the queue right now.
    pub fn try_submit(&self, request: Request) -> bool {
        let mut state = self.lock();
        state.requests.push_back(request);
        if state.scheduled {
            false
        } else {
            state.scheduled = true;
            true
        }
    }

    fn service_request(&self, sink: &Arc<dyn Sink>, mut request: Request)
        -> Result<(), Error>
    {
        let head = RequestHead::from_request(&request);
        let mut task = Task::new(sink.clone(), head.clone(),
                                 &self.config.ident);
        let result = match request.error().cloned() {
            Some(err) => task.service_error(&err),
            None => {
                let mut environ = Environ::new(&mut request, head.version,
                    self.remote, &self.info, ClientProbe::new(sink.clone()));
                task.service(&*self.app, &mut environ)
            }
        };
        let mut close = task.close_on_finish();
        let mut failure = None;
        match result {
            Ok(()) => {}
            Err(Error::ClientDisconnected) => {
                info!("Client {} disconnected while serving {}",
                    self.peer(), head.path);
                close = true;
            }
            Err(e) => {
                close = true;
                if task.wrote_header() {
                    // can't fix the response half-sent
                    failure = Some(e);
                } else {
                    error!("Exception while serving {}: {}", head.path, e);
                    let detail = if self.config.expose_tracebacks {
                        e.to_string()
                    } else {
                        INTERNAL_ERROR.to_string()
                    };
                    let mut err_task = Task::new(sink.clone(), head.clone(),
                                                 &self.config.ident);
                    match err_task.service_error(
                        &RequestError::Internal(detail))
                    {
                        Ok(()) | Err(Error::ClientDisconnected) => {}
                        Err(e) => error!("Error sending 500 response: {}", e),
                    }
                }
            }
        }
        let mut state = self.lock();
        if close || !state.connected {
            state.close_when_flushed = true;
            state.requests.clear();
        } else if state.current_outbuf_count > 0 {
            // next response starts a new buffer, so the drained ones
            // are released on long-living connections
            state.current_outbuf_count = self.config.outbuf_high_watermark;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn output(&self) -> Vec<u8> {
        let mut state = self.lock();
        let mut result = Vec::new();
        for buf in state.outbufs.iter_mut() {
            let n = buf.len() as usize;
            result.extend(buf.get(n, false).unwrap());
        }
        result
    }
}

impl Sink for Shared {
    fn write_soon(&self, data: &[u8]) -> Result<usize, Error> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::ClientDisconnected);
        }
        if data.is_empty() {
            return Ok(0);
        }
        while state.connected &&
            state.total_outbufs_len > self.config.outbuf_high_watermark
        {
            self.trigger.pull();
            state = self.drained.wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if !state.connected {
            return Err(Error::ClientDisconnected);
        }
        state.append(data, &self.config)?;
        if state.total_outbufs_len >= self.config.send_bytes as u64 {
            self.trigger.pull();
        }
        Ok(data.len())
    }

    fn client_connected(&self) -> bool {
        let state = self.lock();
        state.connected && !state.client_disconnected
    }
}

impl Job for Shared {
    fn service(self: Arc<Self>) -> Result<(), Error> {
        let sink: Arc<dyn Sink> = self.clone();
        let mut result = Ok(());
        loop {
            let request = {
                let mut state = self.lock();
                state.servicing = false;
                match state.requests.pop_front() {
                    Some(request) => {
                        state.servicing = true;
                        request
                    }
                    None => {
                        state.scheduled = false;
                        if state.client_disconnected {
                            state.close_when_flushed = true;
                        }
                        break;
                    }
                }
            };
            result = self.service_request(&sink, request);
        }
        self.trigger.pull();
        result
    }

    fn cancel(&self) {
        {
            let mut state = self.lock();
            state.requests.clear();
            state.scheduled = false;
            state.close_when_flushed = true;
        }
        self.trigger.pull();
    }
}

impl Channel {
    pub fn new(token: Token, stream: Stream, shared: Arc<Shared>,
        config: Arc<Config>)
        -> Channel
    {
        Channel {
            token: token,
            stream: stream,
            shared: shared,
            read_buf: vec![0; config.recv_bytes],
            config: config,
            request: None,
            sent_continue: false,
            parse_stopped: false,
            eof: false,
            // edge-triggered, so try both right away
            read_ready: true,
            write_ready: true,
            last_activity: Instant::now(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn register(&mut self, registry: &::mio::Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token,
                          Interest::READABLE | Interest::WRITABLE)
    }

    /// Record readiness reported by the poller
    pub fn ready(&mut self, read: bool, write: bool) {
        self.read_ready |= read;
        self.write_ready |= write;
    }

    /// Do all the I/O possible, returns `false` if the channel must be
    /// closed
    pub fn drive(&mut self, dispatcher: &Dispatcher) -> bool {
        loop {
            let flushed = self.handle_read(dispatcher)
                .and_then(|()| self.maybe_send_continue())
                .and_then(|()| self.handle_write());
            match flushed {
                Ok(true) if self.read_ready && self.readable() => continue,
                Ok(_) => break,
                Err(e) => {
                    self.socket_error(&e);
                    return false;
                }
            }
        }
        !self.should_close()
    }

    /// Idle connections with nothing in flight are closed by maintenance
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        let state = self.shared.lock();
        state.in_flight() == 0 && !state.scheduled &&
            now.duration_since(self.last_activity) > timeout
    }

    pub fn close(&mut self, registry: &::mio::Registry) {
        self.stream.deregister(registry).ok();
        let mut state = self.shared.lock();
        state.connected = false;
        state.requests.clear();
        for mut buf in state.outbufs.drain(..) {
            buf.close();
        }
        state.total_outbufs_len = 0;
        self.shared.drained.notify_all();
        debug!("Closed connection from {}", self.shared.peer());
    }

    fn readable(&self) -> bool {
        if self.eof || self.parse_stopped {
            return false;
        }
        let state = self.shared.lock();
        state.connected && !state.close_when_flushed &&
            state.in_flight() <= self.config.channel_request_lookahead &&
            state.total_outbufs_len == 0
    }

    fn should_close(&self) -> bool {
        let state = self.shared.lock();
        !state.connected || (state.close_when_flushed &&
            state.total_outbufs_len == 0 && !state.servicing)
    }

    fn socket_error(&self, e: &io::Error) {
        if self.config.log_socket_errors {
            error!("Socket error on connection from {}: {}",
                self.shared.peer(), e);
        } else {
            debug!("Socket error on connection from {}: {}",
                self.shared.peer(), e);
        }
    }

    fn handle_read(&mut self, dispatcher: &Dispatcher) -> io::Result<()> {
        while self.read_ready && self.readable() {
            let mut buf = mem::replace(&mut self.read_buf, Vec::new());
            let result = match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.read_ready = false;
                    self.handle_eof();
                    Ok(())
                }
                Ok(n) => {
                    self.last_activity = Instant::now();
                    self.received(&buf[..n], dispatcher);
                    Ok(())
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => {
                        self.read_ready = false;
                        Ok(())
                    }
                    io::ErrorKind::Interrupted => Ok(()),
                    _ => Err(e),
                }
            };
            self.read_buf = buf;
            result?;
        }
        Ok(())
    }

    fn handle_eof(&mut self) {
        debug!("Connection from {} half-closed", self.shared.peer());
        self.eof = true;
        self.request = None;
        let mut state = self.shared.lock();
        state.client_disconnected = true;
        if !state.scheduled {
            state.close_when_flushed = true;
        }
    }

    fn received(&mut self, mut data: &[u8], dispatcher: &Dispatcher) {
        while !data.is_empty() && !self.parse_stopped {
            let (consumed, completed) = {
                let config = &self.config;
                let request = self.request
                    .get_or_insert_with(|| Request::new(config));
                let n = request.received(data);
                (n, request.is_completed())
            };
            if let Err(e) = self.maybe_send_continue() {
                error!("Can't buffer 100 Continue response: {}", e);
            }
            if completed {
                self.sent_continue = false;
                if let Some(request) = self.request.take() {
                    if request.error().is_some() {
                        // the connection is closed after the error response
                        self.parse_stopped = true;
                    }
                    if !request.is_empty() &&
                        self.shared.try_submit(request)
                    {
                        dispatcher.add_task(self.shared.clone());
                    }
                }
            } else if consumed == 0 {
                break;
            }
            data = &data[consumed.min(data.len())..];
        }
    }

    /// Sends `100 Continue` once headers of the request expecting it are
    /// read, but only when no earlier response is pending
    fn maybe_send_continue(&mut self) -> io::Result<()> {
        let version = match self.request {
            Some(ref r) if r.expect_continue() && r.headers_finished() &&
                !r.is_completed() && !self.sent_continue
            => Version::from_request(r.version()),
            _ => return Ok(()),
        };
        let mut state = self.shared.lock();
        if state.in_flight() > 0 || state.scheduled {
            return Ok(());
        }
        state.append(&continue_line(version), &self.config)?;
        self.sent_continue = true;
        Ok(())
    }

    /// Flush output buffers, returns `true` if any bytes were sent
    fn handle_write(&mut self) -> io::Result<bool> {
        if !self.write_ready {
            return Ok(false);
        }
        let mut state = self.shared.lock();
        if !state.connected {
            return Ok(false);
        }
        if state.in_flight() > 0 &&
            state.total_outbufs_len < self.config.send_bytes as u64
        {
            // not worth a packet while the application is running
            return Ok(false);
        }
        let mut sent = 0u64;
        loop {
            let (front_len, count) = match state.outbufs.front() {
                Some(buf) => (buf.len(), state.outbufs.len()),
                None => break,
            };
            if front_len == 0 {
                if count > 1 {
                    if let Some(mut buf) = state.outbufs.pop_front() {
                        buf.close();
                    }
                    continue;
                }
                break;
            }
            let chunk = match state.outbufs.front_mut() {
                Some(buf) => buf.get(SEND_CHUNK, false)?,
                None => break,
            };
            match self.stream.write(&chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    if let Some(buf) = state.outbufs.front_mut() {
                        buf.skip(n as u64, true)?;
                    }
                    state.total_outbufs_len -= n as u64;
                    sent += n as u64;
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => {
                        self.write_ready = false;
                        break;
                    }
                    io::ErrorKind::Interrupted => {}
                    _ => return Err(e),
                }
            }
        }
        if sent > 0 {
            self.last_activity = Instant::now();
            self.shared.drained.notify_all();
        }
        Ok(sent > 0)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use mio::{Poll, Waker};

    use server::Config;
    use server::dispatcher::Job;
    use server::environ::ServerInfo;
    use server::error::Error;
    use server::lambda::{AppFn, body};
    use server::reactor::{Trigger, WAKER};
    use server::request::Request;
    use server::task::Sink;
    use super::Shared;

    fn shared(config: Arc<Config>) -> (Poll, Arc<Shared>) {
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), WAKER).unwrap();
        let app = AppFn::new(|env, start| {
            if env.path_info() == "/fail" {
                return Err(From::from("broken"));
            }
            start.start("200 OK", vec![("Content-Type", "text/plain")])?;
            Ok(body(env.path_info().to_string()))
        });
        let info = ServerInfo {
            name: "localhost".into(),
            port: "80".into(),
            software: "tk-httpd".into(),
            url_scheme: "http".into(),
            url_prefix: "".into(),
        };
        let shared = Shared::new(config, Arc::new(app), Arc::new(info),
            Trigger::new(Arc::new(waker)), None);
        (poll, Arc::new(shared))
    }

    fn request(config: &Config, data: &[u8]) -> Request {
        let mut req = Request::new(config);
        req.received(data);
        assert!(req.is_completed());
        req
    }

    fn text(shared: &Shared) -> String {
        String::from_utf8_lossy(&shared.output()).into_owned()
    }

    #[test]
    fn drains_all_requests() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        assert!(shared.try_submit(request(&cfg, b"GET /a HTTP/1.1\r\n\r\n")));
        assert!(!shared.try_submit(request(&cfg, b"GET /b HTTP/1.1\r\n\r\n")));
        shared.clone().service().unwrap();
        let text = text(&shared);
        let a = text.find("\r\n\r\n/a").unwrap();
        let b = text.find("\r\n\r\n/b").unwrap();
        assert!(a < b);
        let state = shared.lock();
        assert!(!state.scheduled);
        assert_eq!(state.in_flight(), 0);
        assert!(!state.close_when_flushed);
    }

    #[test]
    fn application_error() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        shared.try_submit(request(&cfg, b"GET /fail HTTP/1.1\r\n\r\n"));
        shared.try_submit(request(&cfg, b"GET /b HTTP/1.1\r\n\r\n"));
        shared.clone().service().unwrap();
        let text = text(&shared);
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.contains("unexpected internal server error"));
        assert!(!text.contains("broken"));
        assert!(!text.contains("\r\n\r\n/b"));
        assert_eq!(text.matches("HTTP/1.1 ").count(), 1);
        assert!(shared.lock().close_when_flushed);
    }

    #[test]
    fn exposed_traceback() {
        let cfg = Config::new().expose_tracebacks(true).done();
        let (_poll, shared) = shared(cfg.clone());
        shared.try_submit(request(&cfg, b"GET /fail HTTP/1.1\r\n\r\n"));
        shared.clone().service().unwrap();
        assert!(text(&shared).contains("broken"));
    }

    #[test]
    fn bad_request() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        shared.try_submit(request(&cfg, b"GET / HTTP/1.1\r\nbad\r\n\r\n"));
        shared.clone().service().unwrap();
        assert!(text(&shared).starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(shared.lock().close_when_flushed);
    }

    #[test]
    fn rotates_buffers() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        shared.try_submit(request(&cfg, b"GET /a HTTP/1.1\r\n\r\n"));
        shared.clone().service().unwrap();
        shared.try_submit(request(&cfg, b"GET /b HTTP/1.1\r\n\r\n"));
        shared.clone().service().unwrap();
        assert_eq!(shared.lock().outbufs.len(), 2);
    }

    #[test]
    fn cancel() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        shared.try_submit(request(&cfg, b"GET /a HTTP/1.1\r\n\r\n"));
        shared.cancel();
        let state = shared.lock();
        assert_eq!(state.in_flight(), 0);
        assert!(state.close_when_flushed);
    }

    #[test]
    fn write_after_disconnect() {
        let cfg = Config::new().done();
        let (_poll, shared) = shared(cfg.clone());
        assert!(shared.client_connected());
        shared.lock().connected = false;
        assert!(!shared.client_connected());
        assert_matches!(shared.write_soon(b"data"),
                        Err(Error::ClientDisconnected));
    }
}
