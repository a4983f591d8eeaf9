//! Streams a response of unknown length, so it goes out with
//! `Transfer-Encoding: chunked` to HTTP/1.1 clients
extern crate tk_httpd;
extern crate env_logger;

use std::env;
use std::thread;
use std::time::Duration;

use tk_httpd::server::{Config, Server, AppFn, chunks};


fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let addr = "127.0.0.1:8080".parse().unwrap();
    let config = Config::new()
        .listen(addr)
        .done();

    let app = AppFn::new(|env, start| {
        let count = env.query_string().parse::<u32>().unwrap_or(10);
        start.start("200 OK", vec![
            ("Content-Type", "text/plain"),
        ])?;
        start.write(b"counting\n")?;
        Ok(chunks((0..count).map(|i| {
            thread::sleep(Duration::from_millis(100));
            format!("{}\n", i).into_bytes()
        })))
    });

    let server = Server::new(&config, app).expect("bind server");
    println!("Listening on http://{}/?10", addr);
    server.run().expect("run server");
}
