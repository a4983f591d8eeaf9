use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use std::sync::Arc;

use server::{Config};

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            listen: Vec::new(),
            ipv4: true,
            ipv6: true,
            unix_socket: None,
            unix_socket_perms: 0o600,
            threads: 4,
            url_scheme: "http".to_string(),
            url_prefix: String::new(),
            ident: "tk-httpd".to_string(),
            server_name: None,
            recv_bytes: 8192,
            send_bytes: 18000,
            outbuf_overflow: 1 << 20,
            outbuf_high_watermark: 16 << 20,
            inbuf_overflow: 512 << 10,
            connection_limit: 100,
            cleanup_interval: Duration::new(30, 0),
            channel_timeout: Duration::new(120, 0),
            log_socket_errors: true,
            max_request_header_size: 256 << 10,
            max_request_body_size: 1 << 30,
            expose_tracebacks: false,
            channel_request_lookahead: 0,
            poll_timeout: Duration::new(1, 0),
            shutdown_timeout: Duration::new(5, 0),
        }
    }
    /// Add a TCP address to listen on
    ///
    /// May be called multiple times, all the sockets are served by the
    /// same reactor.
    pub fn listen(&mut self, addr: SocketAddr) -> &mut Self {
        self.listen.push(addr);
        self
    }
    /// Whether to bind IPv4 addresses from the `listen` list
    pub fn ipv4(&mut self, value: bool) -> &mut Self {
        self.ipv4 = value;
        self
    }
    /// Whether to bind IPv6 addresses from the `listen` list
    pub fn ipv6(&mut self, value: bool) -> &mut Self {
        self.ipv6 = value;
        self
    }
    /// Listen on a unix socket at this path, in addition to TCP ones
    pub fn unix_socket<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
        self.unix_socket = Some(path.into());
        self
    }
    /// Filesystem permissions of the unix socket
    pub fn unix_socket_perms(&mut self, mode: u32) -> &mut Self {
        self.unix_socket_perms = mode;
        self
    }
    /// Number of worker threads running the application
    pub fn threads(&mut self, value: usize) -> &mut Self {
        self.threads = value;
        self
    }
    /// URL scheme reported to the application (`http` or `https`)
    pub fn url_scheme(&mut self, value: &str) -> &mut Self {
        self.url_scheme = value.to_string();
        self
    }
    /// Path prefix the application is mounted at
    ///
    /// Reported as `SCRIPT_NAME` and stripped from `PATH_INFO`. The value
    /// is normalized to have a leading and no trailing slash.
    pub fn url_prefix(&mut self, value: &str) -> &mut Self {
        let trimmed = value.trim_matches('/');
        self.url_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        self
    }
    /// Value of the `Server` header and `SERVER_SOFTWARE`
    pub fn ident(&mut self, value: &str) -> &mut Self {
        self.ident = value.to_string();
        self
    }
    /// Value of `SERVER_NAME`, derived from the first listener by default
    pub fn server_name(&mut self, value: &str) -> &mut Self {
        self.server_name = Some(value.to_string());
        self
    }
    /// Number of bytes to read from a socket at once
    pub fn recv_bytes(&mut self, value: usize) -> &mut Self {
        self.recv_bytes = value;
        self
    }
    /// Output is only flushed while the application is still running
    /// when at least this many bytes are buffered
    pub fn send_bytes(&mut self, value: usize) -> &mut Self {
        self.send_bytes = value;
        self
    }
    /// Size at which response data is spilled to a temporary file
    pub fn outbuf_overflow(&mut self, value: u64) -> &mut Self {
        self.outbuf_overflow = value;
        self
    }
    /// Size of buffered response data at which the application is
    /// blocked until the client reads some
    pub fn outbuf_high_watermark(&mut self, value: u64) -> &mut Self {
        self.outbuf_high_watermark = value;
        self
    }
    /// Size at which request body is spilled to a temporary file
    pub fn inbuf_overflow(&mut self, value: u64) -> &mut Self {
        self.inbuf_overflow = value;
        self
    }
    /// Maximum number of simultaneous connections
    pub fn connection_limit(&mut self, value: usize) -> &mut Self {
        self.connection_limit = value;
        self
    }
    /// How often idle connections are checked for
    pub fn cleanup_interval(&mut self, value: Duration) -> &mut Self {
        self.cleanup_interval = value;
        self
    }
    /// Connections idle longer than this are closed
    pub fn channel_timeout(&mut self, value: Duration) -> &mut Self {
        self.channel_timeout = value;
        self
    }
    /// Whether to log errors on client sockets
    pub fn log_socket_errors(&mut self, value: bool) -> &mut Self {
        self.log_socket_errors = value;
        self
    }
    /// Requests with larger headers are answered with 431
    pub fn max_request_header_size(&mut self, value: u64) -> &mut Self {
        self.max_request_header_size = value;
        self
    }
    /// Requests with larger bodies are answered with 413
    pub fn max_request_body_size(&mut self, value: u64) -> &mut Self {
        self.max_request_body_size = value;
        self
    }
    /// Put error details into the body of 500 responses
    pub fn expose_tracebacks(&mut self, value: bool) -> &mut Self {
        self.expose_tracebacks = value;
        self
    }
    /// A number of pipelined requests read ahead while a request is
    /// being serviced
    ///
    /// Non-zero values also let the application find out that the client
    /// has disconnected.
    pub fn channel_request_lookahead(&mut self, value: usize) -> &mut Self {
        self.channel_request_lookahead = value;
        self
    }
    /// Maximum time the reactor sleeps in a single poll
    pub fn poll_timeout(&mut self, value: Duration) -> &mut Self {
        self.poll_timeout = value;
        self
    }
    /// Time to wait for worker threads on shutdown
    pub fn shutdown_timeout(&mut self, value: Duration) -> &mut Self {
        self.shutdown_timeout = value;
        self
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}
