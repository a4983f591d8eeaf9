//! Threaded HTTP/1.x server
//!
//! A single reactor thread built on `mio` accepts connections, parses
//! requests incrementally and flushes responses. Parsed requests are
//! handed to a pool of worker threads running a synchronous application.
//! See the `server` module for the entry point.
#![recursion_limit="100"]

extern crate url;
extern crate httparse;
extern crate httpdate;
extern crate mio;
extern crate netbuf;
extern crate crossbeam_channel;
#[macro_use(quick_error)] extern crate quick_error;
#[cfg(test)] #[macro_use(assert_matches)] extern crate matches;
#[macro_use] extern crate log;


pub mod server;
pub mod buffer;
mod enums;
mod headers;
mod base_serializer;
mod body_parser;
mod chunked;

pub use enums::{Version, Status};
