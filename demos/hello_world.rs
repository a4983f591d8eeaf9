extern crate tk_httpd;
extern crate env_logger;

use std::env;

use tk_httpd::server::{Config, Server, AppFn, body};


const BODY: &'static str = "Hello World!";

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let addr = env::args().nth(1)
        .unwrap_or_else(|| String::from("127.0.0.1:8080"))
        .parse().expect("valid listening address");
    let config = Config::new()
        .listen(addr)
        .threads(4)
        .done();

    let app = AppFn::new(|_env, start| {
        start.start("200 OK", vec![
            ("Content-Type", "text/plain"),
        ])?;
        Ok(body(BODY))
    });

    let server = Server::new(&config, app).expect("bind server");
    println!("Listening on {}", addr);
    server.run().expect("run server");
}
