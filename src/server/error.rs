use std::io;
use std::convert::From;

use base_serializer::HeaderError;
use enums::Status;
use super::task::AppError;


quick_error! {
    /// HTTP server error
    #[derive(Debug)]
    pub enum Error {
        /// Socket IO error
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// Invalid response header supplied by the application
        Header(err: HeaderError) {
            description("invalid response header")
            display("invalid response header: {}", err)
            from()
        }
        /// Status line supplied by the application is malformed
        InvalidStatus(status: String) {
            description("invalid status line")
            display("invalid status line: {:?}", status)
        }
        /// The client went away while the response was written
        ClientDisconnected {
            description("client disconnected")
        }
        /// `start_response` called a second time without error info
        StartResponseTwice {
            description("start_response called a second time \
                without an error")
        }
        /// Body written before `start_response` was called
        ResponseNotStarted {
            description("start_response was not called before \
                body was written")
        }
        /// Error returned by the application
        Application(err: AppError) {
            description("application error")
            display("application error: {}", err)
            from()
        }
        /// Application panicked
        Panic(message: String) {
            description("application panicked")
            display("application panicked: {}", message)
        }
        /// Neither TCP addresses nor a unix socket are configured
        NoListeners {
            description("no addresses to listen on")
        }
    }
}

quick_error! {
    /// Malformed or unacceptable request
    ///
    /// Each variant is answered with its own status code and the
    /// connection is closed afterwards.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RequestError {
        BadRequest(body: String) {
            description("bad request")
            display("Bad Request: {}", body)
        }
        HeaderTooLarge(body: String) {
            description("request header fields too large")
            display("Request Header Fields Too Large: {}", body)
        }
        BodyTooLarge(body: String) {
            description("request entity too large")
            display("Request Entity Too Large: {}", body)
        }
        NotImplemented(body: String) {
            description("not implemented")
            display("Not Implemented: {}", body)
        }
        Internal(body: String) {
            description("internal server error")
            display("Internal Server Error: {}", body)
        }
    }
}

impl RequestError {
    pub fn status(&self) -> Status {
        use self::RequestError::*;
        match *self {
            BadRequest(..) => Status::BadRequest,
            HeaderTooLarge(..) => Status::RequestHeaderFieldsTooLarge,
            BodyTooLarge(..) => Status::RequestEntityTooLarge,
            NotImplemented(..) => Status::NotImplemented,
            Internal(..) => Status::InternalServerError,
        }
    }
    /// Human-readable explanation put into the error page
    pub fn body(&self) -> &str {
        use self::RequestError::*;
        match *self {
            BadRequest(ref b) | HeaderTooLarge(ref b) | BodyTooLarge(ref b) |
            NotImplemented(ref b) | Internal(ref b) => b,
        }
    }
}

#[cfg(test)]
mod test {
    use enums::Status;
    use super::{Error, RequestError};

    #[test]
    fn request_error_status() {
        let err = RequestError::HeaderTooLarge("exceeds limit".into());
        assert_eq!(err.status(), Status::RequestHeaderFieldsTooLarge);
        assert_eq!(err.body(), "exceeds limit");
        assert_eq!(err.to_string(),
                   "Request Header Fields Too Large: exceeds limit");
        assert_eq!(RequestError::BodyTooLarge("".into()).status().code(), 413);
        assert_eq!(RequestError::NotImplemented("".into()).status().code(),
                   501);
    }

    #[test]
    fn app_error_converts() {
        fn fails() -> Result<(), Error> {
            let err: ::server::task::AppError = From::from("boom");
            Err::<(), _>(err)?;
            Ok(())
        }
        assert_matches!(fails(), Err(Error::Application(_)));
    }
}
