/// Headers an application is not allowed to set itself
pub const HOP_BY_HOP: &'static [&'static str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn is_space(ch: u8) -> bool {
    matches!(ch, b'\r' | b'\n' | b' ' | b'\t')
}

// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
fn token_eq(val: &[u8], token: &[u8]) -> bool {
    let start = match val.iter().position(|&x| !is_space(x)) {
        Some(x) => x,
        None => return false,
    };
    let end = val.iter().rposition(|&x| !is_space(x)).unwrap_or(start) + 1;
    val[start..end].eq_ignore_ascii_case(token)
}

/// True if any comma-separated element of the value equals `token`
fn list_contains(val: &[u8], token: &[u8]) -> bool {
    val.split(|&x| x == b',').any(|item| token_eq(item, token))
}

pub fn is_close(val: &[u8]) -> bool {
    list_contains(val, b"close")
}

pub fn is_keep_alive(val: &[u8]) -> bool {
    list_contains(val, b"keep-alive")
}

pub fn is_chunked(val: &[u8]) -> bool {
    token_eq(val, b"chunked")
}

pub fn is_continue(val: &[u8]) -> bool {
    token_eq(val, b"100-continue")
}

/// Normalize request header name to the CGI form: `Content-Type`
/// becomes `CONTENT_TYPE`
pub fn cgi_key(name: &[u8]) -> String {
    name.iter().map(|&b| match b {
        b'-' => '_',
        b => b.to_ascii_uppercase() as char,
    }).collect()
}

/// Title-Case a response header name: `content-TYPE` -> `Content-Type`
pub fn title_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            result.extend(ch.to_uppercase());
        } else {
            result.extend(ch.to_lowercase());
        }
        upper = ch == '-';
    }
    result
}

/// Decode bytes as ISO-8859-1, which never fails
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
