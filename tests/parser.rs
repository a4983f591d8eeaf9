extern crate tk_httpd;

use std::io::Read;

use tk_httpd::server::{Config, Request, RequestError};


fn feed(request: &mut Request, mut data: &[u8]) {
    while !data.is_empty() && !request.is_completed() {
        let n = request.received(data);
        data = &data[n..];
    }
}

fn parse_split(data: &[u8], step: usize) -> Request {
    let mut request = Request::new(&Config::new());
    for piece in data.chunks(step) {
        feed(&mut request, piece);
    }
    request
}

fn body(request: &mut Request) -> String {
    let mut result = String::new();
    request.take_body().read_to_string(&mut result).unwrap();
    result
}

#[test]
fn http10_with_body() {
    let mut req = parse_split(
        b"GET / HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello", 1000);
    assert!(req.is_completed());
    assert_eq!(req.method(), "GET");
    assert_eq!(req.version(), "1.0");
    assert_eq!(body(&mut req), "hello");
}

#[test]
fn any_split_gives_same_result() {
    let data: &[u8] = b"POST /path/x%20y?q=1#frag HTTP/1.1\r\n\
        Host: example.com\r\n\
        X-Folded: first\r\n  second\r\n\
        Accept: a\r\nAccept: b\r\n\
        Transfer-Encoding: chunked\r\n\r\n\
        4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nTrailer: x\r\n\r\n";
    let mut whole = parse_split(data, data.len());
    for step in 1..data.len() {
        let mut req = parse_split(data, step);
        assert!(req.is_completed(), "step {}", step);
        assert_eq!(req.method(), whole.method());
        assert_eq!(req.path(), whole.path());
        assert_eq!(req.headers(), whole.headers());
        assert_eq!(body(&mut req), "Wikipedia");
    }
    assert_eq!(whole.path(), "/path/x y");
    assert_eq!(whole.query(), "q=1");
    assert_eq!(whole.header("HOST"), Some("example.com"));
    assert_eq!(whole.header("ACCEPT"), Some("a, b"));
    assert_eq!(whole.header("CONTENT_LENGTH"), Some("9"));
    assert_eq!(body(&mut whole), "Wikipedia");
}

#[test]
fn chunk_without_terminator() {
    let mut req = Request::new(&Config::new());
    feed(&mut req, b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                     3\r\nabcXX");
    assert!(req.is_completed());
    match req.error() {
        Some(&RequestError::BadRequest(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn leading_blank_lines() {
    let data = b"\r\n\r\nGET / HTTP/1.1\r\n\r\n";
    let mut req = Request::new(&Config::new());
    let n = req.received(data);
    assert!(req.is_completed());
    assert!(req.is_empty());
    let mut next = Request::new(&Config::new());
    feed(&mut next, &data[n..]);
    assert!(next.is_completed());
    assert!(!next.is_empty());
    assert_eq!(next.method(), "GET");
}

#[test]
fn unsupported_transfer_encoding() {
    let req = parse_split(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n", 100);
    match req.error() {
        Some(&RequestError::NotImplemented(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}
