extern crate tk_httpd;
extern crate env_logger;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, Shutdown};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tk_httpd::server::{Config, Server, Handle, Application};
use tk_httpd::server::{Environ, StartResponse, Chunks, AppError, body};


struct Echo;

impl Application for Echo {
    fn call(&self, env: &mut Environ, start: &mut StartResponse)
        -> Result<Chunks, AppError>
    {
        let mut data = Vec::new();
        env.input().read_to_end(&mut data)?;
        match env.path_info() {
            "/big" => {
                let size = 100_000;
                start.start("200 OK", vec![
                    ("Content-Length", size.to_string()),
                ])?;
                let chunks = (0..100)
                    .map(|_| Ok::<_, AppError>(vec![b'x'; 1000]));
                return Ok(Box::new(chunks));
            }
            "/wait" => {
                // answers whether the client went away while we were busy
                let probe = env.client_probe();
                let deadline = Instant::now() + Duration::from_secs(5);
                while probe.is_connected() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                let text = if probe.is_connected() {
                    "present"
                } else {
                    "gone"
                };
                start.start("200 OK", vec![("Content-Type", "text/plain")])?;
                return Ok(body(text));
            }
            "/stream" => {
                start.start("200 OK", vec![("Content-Type", "text/plain")])?;
                start.write(b"first ")?;
                let items: Vec<Result<Vec<u8>, AppError>> = vec![
                    Ok(b"second".to_vec()),
                    Ok(b" third".to_vec()),
                ];
                // filter hides the exact length, no Content-Length
                return Ok(Box::new(items.into_iter().filter(|_| true)));
            }
            _ => {}
        }
        let text = format!("{} {} {} [{}]",
            env.method(), env.path_info(), env.query_string(),
            String::from_utf8_lossy(&data));
        start.start("200 OK", vec![("Content-Type", "text/plain")])?;
        Ok(body(text))
    }
}

struct Running {
    addr: SocketAddr,
    handle: Handle,
    thread: JoinHandle<()>,
}

impl Running {
    fn stop(self) {
        self.handle.shutdown();
        self.thread.join().unwrap();
    }
}

fn start(config: &mut Config) -> Running {
    env_logger::try_init().ok();
    config.listen("127.0.0.1:0".parse().unwrap()).threads(2);
    let server = Server::new(&config.done(), Echo).unwrap();
    let addr = server.local_addrs()[0];
    let handle = server.handle();
    let thread = thread::spawn(move || server.run().unwrap());
    Running { addr: addr, handle: handle, thread: thread }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let sock = TcpStream::connect(addr).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    sock
}

/// Sends data and reads until the server closes the connection
fn exchange(addr: SocketAddr, data: &[u8]) -> String {
    let mut sock = connect(addr);
    sock.write_all(data).unwrap();
    let mut result = String::new();
    sock.read_to_string(&mut result).unwrap();
    result
}

#[test]
fn simple_get() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"GET /hello?x=1 HTTP/1.1\r\nHost: localhost\r\n\
          Connection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Content-Length: 17\r\n"));
    assert!(resp.contains("Connection: close\r\n"));
    assert!(resp.contains("Server: tk-httpd\r\n"));
    assert!(resp.ends_with("\r\n\r\nGET /hello x=1 []"));
    server.stop();
}

#[test]
fn http10() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr, b"GET /old HTTP/1.0\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.0 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Connection: close\r\n"));
    assert!(resp.ends_with("GET /old  []"));
    server.stop();
}

#[test]
fn pipelined_in_order() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"GET /a HTTP/1.1\r\n\r\n\
          POST /b HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody\
          GET /c HTTP/1.1\r\nConnection: close\r\n\r\n");
    let a = resp.find("GET /a").unwrap();
    let b = resp.find("POST /b  [body]").unwrap();
    let c = resp.find("GET /c").unwrap();
    assert!(a < b && b < c);
    assert_eq!(resp.matches("HTTP/1.1 200 OK").count(), 3);
    server.stop();
}

#[test]
fn chunked_request_body() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\
          Connection: close\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    assert!(resp.ends_with("POST /up  [hello world]"), "{}", resp);
    server.stop();
}

#[test]
fn streaming_response() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"GET /stream HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(resp.contains("Transfer-Encoding: chunked\r\n"), "{}", resp);
    assert!(resp.ends_with("\r\n\r\n6\r\nfirst \r\n6\r\nsecond\r\n\
                            6\r\n third\r\n0\r\n\r\n"));
    server.stop();
}

#[test]
fn head_request() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"HEAD /x HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.ends_with("\r\n\r\n"));
    assert!(!resp.contains("HEAD /x"));
    server.stop();
}

#[test]
fn bad_request_closes() {
    let server = start(&mut Config::new());
    let resp = exchange(server.addr,
        b"GET / HTTP/1.1\r\nno colon here\r\n\r\n\
          GET /never HTTP/1.1\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", resp);
    assert!(resp.contains("Connection: close\r\n"));
    assert!(!resp.contains("/never"));
    server.stop();
}

#[test]
fn header_too_large() {
    let server = start(Config::new().max_request_header_size(100));
    let mut req = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
    req.extend(vec![b'a'; 200]);
    req.extend(b"\r\n\r\n");
    let resp = exchange(server.addr, &req);
    assert!(resp.starts_with("HTTP/1.0 431 Request Header Fields Too Large"),
            "{}", resp);
    server.stop();
}

#[test]
fn body_too_large() {
    let server = start(Config::new().max_request_body_size(10));
    let resp = exchange(server.addr,
        b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 413 Request Entity Too Large"),
            "{}", resp);
    server.stop();
}

#[test]
fn expect_continue() {
    let server = start(&mut Config::new());
    let mut sock = connect(server.addr);
    sock.write_all(b"POST /c HTTP/1.1\r\nContent-Length: 5\r\n\
        Expect: 100-continue\r\nConnection: close\r\n\r\n").unwrap();
    let mut buf = [0u8; 25];
    sock.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &b"HTTP/1.1 100 Continue\r\n\r\n"[..]);
    sock.write_all(b"hello").unwrap();
    let mut resp = String::new();
    sock.read_to_string(&mut resp).unwrap();
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.ends_with("POST /c  [hello]"));
    assert!(!resp.contains("100 Continue"));
    server.stop();
}

#[test]
fn backpressure() {
    let server = start(Config::new()
        .outbuf_high_watermark(4096)
        .send_bytes(1024));
    let resp = exchange(server.addr,
        b"GET /big HTTP/1.1\r\nConnection: close\r\n\r\n");
    let idx = resp.find("\r\n\r\n").unwrap();
    assert_eq!(resp.len() - idx - 4, 100_000);
    server.stop();
}

#[test]
fn half_close() {
    let server = start(&mut Config::new());
    let mut sock = connect(server.addr);
    sock.write_all(b"GET /half HTTP/1.1\r\n\r\n").unwrap();
    sock.shutdown(Shutdown::Write).unwrap();
    let mut resp = String::new();
    sock.read_to_string(&mut resp).unwrap();
    assert!(resp.ends_with("GET /half  []"), "{}", resp);
    server.stop();
}

#[test]
fn idle_timeout() {
    let server = start(Config::new()
        .cleanup_interval(Duration::from_millis(50))
        .channel_timeout(Duration::from_millis(100))
        .poll_timeout(Duration::from_millis(20)));
    let mut sock = connect(server.addr);
    let mut buf = Vec::new();
    // read returns once the server drops the connection
    sock.read_to_end(&mut buf).unwrap();
    assert!(buf.is_empty());
    server.stop();
}

#[test]
fn lookahead_notices_disconnect() {
    let server = start(Config::new().channel_request_lookahead(1));
    let mut sock = connect(server.addr);
    sock.write_all(b"GET /wait HTTP/1.1\r\n\r\n").unwrap();
    sock.shutdown(Shutdown::Write).unwrap();
    let mut resp = String::new();
    sock.read_to_string(&mut resp).unwrap();
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.ends_with("\r\n\r\ngone"), "{}", resp);
    server.stop();
}

#[test]
fn continue_once_for_pipelined() {
    let server = start(&mut Config::new());
    let mut sock = connect(server.addr);
    sock.write_all(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\
        Expect: 100-continue\r\n\r\n").unwrap();
    let mut buf = [0u8; 25];
    sock.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &b"HTTP/1.1 100 Continue\r\n\r\n"[..]);
    // second request arrives while the first one is in flight
    sock.write_all(b"hello\
        POST /b HTTP/1.1\r\nContent-Length: 3\r\n\
        Expect: 100-continue\r\nConnection: close\r\n\r\nabc").unwrap();
    let mut resp = String::new();
    sock.read_to_string(&mut resp).unwrap();
    assert!(!resp.contains("100 Continue"), "{}", resp);
    assert_eq!(resp.matches("HTTP/1.1 200 OK").count(), 2);
    let a = resp.find("POST /a  [hello]").unwrap();
    let b = resp.find("POST /b  [abc]").unwrap();
    assert!(a < b);
    server.stop();
}
