use url::percent_encoding::percent_decode;

use headers::latin1;


#[derive(Debug)]
pub enum RequestTarget<'a> {
    /// Usual form of `/hello?name=world`
    Origin(&'a str),
    /// Full url: `http://example.com:8080/hello`
    ///
    /// Note in this case (unlike in Origin) path may not start with a slash
    Absolute { scheme: &'a str, authority: &'a str, path: &'a str },
    /// Only hostname `example.com:8080`, only useful for `CONNECT` method
    Authority(&'a str),
    /// Asterisk `*`
    Asterisk,
}

/// Request target split into components, path already percent-decoded
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitUri {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}


// Authority can't contain `/` or `?` or `#`, user and password
// is not supported in HTTP either (so no `@` but otherwise we accept
// anything as rules are quite complex)
fn authority_end_char(&x: &u8) -> bool {
    x == b'/' || x == b'?' || x == b'#' || x == b'@'
}

fn absolute<'a>(s: &'a str, scheme: &'a str) -> RequestTarget<'a> {
    let start = scheme.len() + 3;
    let auth_end = s[start..].as_bytes().iter()
        .position(authority_end_char)
        .unwrap_or(s.len() - start);
    RequestTarget::Absolute {
        scheme: scheme,
        authority: &s[start..start+auth_end],
        path: &s[start+auth_end..],
    }
}

impl<'a> RequestTarget<'a> {
    pub fn parse(s: &'a str) -> Option<RequestTarget<'a>> {
        use self::RequestTarget::*;

        if s.len() == 0 {
            return None;
        }
        if s.starts_with("/") {
            return Some(Origin(s));
        }
        if s.starts_with("http://") {
            return Some(absolute(s, "http"));
        }
        if s.starts_with("https://") {
            return Some(absolute(s, "https"));
        }
        if s == "*" {
            return Some(Asterisk);
        }
        if s.as_bytes().iter().position(authority_end_char).is_none() {
            return Some(Authority(s));
        }

        return None;
    }
}

/// Split `path?query#fragment`
fn split_path(s: &str) -> (&str, &str, &str) {
    let (rest, fragment) = match s.find('#') {
        Some(idx) => (&s[..idx], &s[idx+1..]),
        None => (s, ""),
    };
    match rest.find('?') {
        Some(idx) => (&rest[..idx], &rest[idx+1..], fragment),
        None => (rest, "", fragment),
    }
}

/// Decode path into a string where each byte is a character
///
/// Percent-decoding is only done if there is a `%` in the path.
fn decode_path(path: &str) -> String {
    if path.contains('%') {
        latin1(&percent_decode(path.as_bytes()).collect::<Vec<u8>>())
    } else {
        latin1(path.as_bytes())
    }
}

/// Split a request target into its components
///
/// Returns `None` for targets that are neither a path, an absolute URI,
/// an authority nor an asterisk.
pub fn split_uri(uri: &str) -> Option<SplitUri> {
    use self::RequestTarget::*;
    let mut result = SplitUri::default();
    // `//host/path` is a path, not a network-path reference
    let path = if uri.starts_with("//") {
        uri
    } else {
        match RequestTarget::parse(uri)? {
            Origin(path) => path,
            Absolute { scheme, authority, path } => {
                result.scheme = scheme.to_string();
                result.netloc = authority.to_string();
                path
            }
            Authority(authority) => {
                result.netloc = authority.to_string();
                ""
            }
            Asterisk => "*",
        }
    };
    let (path, query, fragment) = split_path(path);
    result.path = decode_path(path);
    result.query = query.to_string();
    result.fragment = fragment.to_string();
    Some(result)
}
