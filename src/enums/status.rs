use std::fmt;


/// Enum with the HTTP status codes the server produces by itself
///
/// Applications pass their status line as a string, so only the codes
/// of protocol and internal errors are listed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    BadRequest,                     // 400
    RequestEntityTooLarge,          // 413
    RequestHeaderFieldsTooLarge,    // 431
    InternalServerError,            // 500
    NotImplemented,                 // 501
}

impl Status {
    pub fn code(&self) -> u16 {
        match *self {
            Status::BadRequest                  => 400,
            Status::RequestEntityTooLarge       => 413,
            Status::RequestHeaderFieldsTooLarge => 431,
            Status::InternalServerError         => 500,
            Status::NotImplemented              => 501,
        }
    }

    pub fn reason(&self) -> &str {
        match *self {
            Status::BadRequest                  => "Bad Request",
            Status::RequestEntityTooLarge       => "Request Entity Too Large",
            Status::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            Status::InternalServerError         => "Internal Server Error",
            Status::NotImplemented              => "Not Implemented",
        }
    }
}

/// Responses with 1xx, 204 and 304 status never carry a message body
pub fn code_has_body(code: u16) -> bool {
    !((code >= 100 && code < 200) || code == 204 || code == 304)
}

/// Extract the numeric code from a status line such as `404 Not Found`
pub fn parse_code(status: &str) -> Option<u16> {
    let code = status.split(' ').next().unwrap_or("");
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:03} {}", self.code(), self.reason())
    }
}
