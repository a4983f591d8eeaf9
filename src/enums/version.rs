use std::fmt;

/// Enum reprsenting HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Pick the response version for a request version string (`"1.1"`)
    ///
    /// Anything but `1.1` is answered as HTTP/1.0.
    pub fn from_request(v: &str) -> Version {
        match v {
            "1.1" => Version::Http11,
            _ => Version::Http10,
        }
    }
    /// The bare version number, as in `1.1`
    pub fn number(&self) -> &'static str {
        match *self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}
