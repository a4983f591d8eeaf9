use std::iter;

use server::environ::Environ;
use server::task::{Application, StartResponse, Chunks, AppError};


/// Turns a closure into an `Application`
pub struct AppFn<F>(F);

impl<F> AppFn<F>
    where F: Fn(&mut Environ, &mut StartResponse) -> Result<Chunks, AppError>,
          F: Send + Sync + 'static,
{
    pub fn new(f: F) -> AppFn<F> {
        AppFn(f)
    }
}

impl<F> Application for AppFn<F>
    where F: Fn(&mut Environ, &mut StartResponse) -> Result<Chunks, AppError>,
          F: Send + Sync + 'static,
{
    fn call(&self, environ: &mut Environ, start_response: &mut StartResponse)
        -> Result<Chunks, AppError>
    {
        (self.0)(environ, start_response)
    }
}

/// A response body of a single chunk
///
/// The server sets `Content-Length` for such bodies unless the
/// application did it already.
pub fn body<B: Into<Vec<u8>>>(data: B) -> Chunks {
    Box::new(iter::once(Ok(data.into())))
}

/// An empty response body
pub fn empty() -> Chunks {
    Box::new(iter::empty())
}

/// A response body of many chunks, sent with chunked encoding unless
/// `Content-Length` is set
pub fn chunks<I>(items: I) -> Chunks
    where I: IntoIterator<Item=Vec<u8>>,
          I::IntoIter: 'static,
{
    Box::new(items.into_iter().map(Ok))
}
