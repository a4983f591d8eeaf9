//! HTTP server: a reactor thread doing socket I/O and a pool of worker
//! threads running the application
//!
//! ```rust,no_run
//! use tk_httpd::server::{Config, Server, AppFn, body};
//!
//! let config = Config::new()
//!     .listen("127.0.0.1:8080".parse().unwrap())
//!     .done();
//! let app = AppFn::new(|_env, start| {
//!     start.start("200 OK", vec![("Content-Type", "text/plain")])?;
//!     Ok(body("Hello world!"))
//! });
//! Server::new(&config, app).unwrap().run().unwrap();
//! ```
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod config;
mod error;
mod request_target;
mod request;
mod environ;
mod task;
mod lambda;
mod simple_error_page;
mod channel;
mod dispatcher;
mod listener;
mod reactor;

pub use self::error::{Error, RequestError};
pub use self::request::Request;
pub use self::environ::{Environ, RequestBody, ClientProbe};
pub use self::task::{Application, StartResponse, Chunks, AppError};
pub use self::lambda::{AppFn, body, chunks, empty};
pub use self::simple_error_page::SimpleErrorPage;

use self::environ::ServerInfo;
use self::listener::Listener;
use self::reactor::{Reactor, Trigger};


/// Fine-grained configuration of the HTTP server
#[derive(Debug, Clone)]
pub struct Config {
    listen: Vec<SocketAddr>,
    ipv4: bool,
    ipv6: bool,
    unix_socket: Option<PathBuf>,
    unix_socket_perms: u32,
    threads: usize,
    url_scheme: String,
    url_prefix: String,
    ident: String,
    server_name: Option<String>,
    recv_bytes: usize,
    send_bytes: usize,
    outbuf_overflow: u64,
    outbuf_high_watermark: u64,
    inbuf_overflow: u64,
    connection_limit: usize,
    cleanup_interval: Duration,
    channel_timeout: Duration,
    log_socket_errors: bool,
    max_request_header_size: u64,
    max_request_body_size: u64,
    expose_tracebacks: bool,
    channel_request_lookahead: usize,
    poll_timeout: Duration,
    shutdown_timeout: Duration,
}

/// The server bound to its sockets, ready to run
pub struct Server {
    reactor: Reactor,
}

/// Stops a running server from another thread
#[derive(Clone)]
pub struct Handle {
    stop: Arc<AtomicBool>,
    trigger: Trigger,
}

fn server_info(config: &Config, listeners: &[Listener]) -> ServerInfo {
    let addr = listeners.iter().filter_map(|l| l.local_addr()).next();
    let name = match (&config.server_name, addr) {
        (&Some(ref name), _) => name.clone(),
        (&None, Some(addr)) if !addr.ip().is_unspecified() => {
            addr.ip().to_string()
        }
        (&None, _) => "localhost".to_string(),
    };
    ServerInfo {
        name: name,
        port: addr.map(|a| a.port().to_string()).unwrap_or_default(),
        software: config.ident.clone(),
        url_scheme: config.url_scheme.clone(),
        url_prefix: config.url_prefix.clone(),
    }
}

impl Server {
    /// Bind the sockets configured
    ///
    /// Worker threads are started by `run()`.
    pub fn new<A: Application>(config: &Arc<Config>, app: A)
        -> Result<Server, Error>
    {
        let listeners = listener::bind(config)?;
        let info = server_info(config, &listeners);
        let reactor = Reactor::new(config.clone(), Arc::new(app),
                                   info, listeners)?;
        Ok(Server { reactor: reactor })
    }

    /// Addresses of the TCP sockets, useful when binding port zero
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.reactor.local_addrs()
    }

    pub fn handle(&self) -> Handle {
        Handle {
            stop: self.reactor.stop_flag(),
            trigger: self.reactor.trigger(),
        }
    }

    /// Serve connections until `Handle::shutdown()` is called
    pub fn run(mut self) -> Result<(), Error> {
        self.reactor.run()
    }
}

impl Handle {
    /// Close all the connections and stop the server
    ///
    /// Requests not started yet are cancelled, `Server::run()` returns
    /// once running ones are finished or the shutdown timeout expires.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.trigger.pull();
    }
}
