use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;

use buffer::OverflowBuffer;
use enums::Version;
use server::request::Request;
use server::task::Sink;


/// Server-wide values put into every request environment
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub port: String,
    pub software: String,
    pub url_scheme: String,
    pub url_prefix: String,
}

/// Request body as a readable stream
#[derive(Debug)]
pub struct RequestBody(OverflowBuffer);

/// Tells whether the client is still connected
///
/// Disconnects are only noticed while the server keeps reading from the
/// socket, i.e. with non-zero `channel_request_lookahead`.
#[derive(Clone)]
pub struct ClientProbe(Arc<dyn Sink>);

/// The environment of a single request as seen by the application
///
/// Keys follow CGI conventions: `REQUEST_METHOD`, `PATH_INFO`,
/// `QUERY_STRING`, request headers as `HTTP_*` (except `CONTENT_TYPE` and
/// `CONTENT_LENGTH`) and so on.
#[derive(Debug)]
pub struct Environ {
    vars: BTreeMap<String, String>,
    url_scheme: String,
    input: RequestBody,
    probe: ClientProbe,
}

impl RequestBody {
    pub fn new(buf: OverflowBuffer) -> RequestBody {
        RequestBody(buf)
    }
}

impl Read for RequestBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl ClientProbe {
    pub fn new(sink: Arc<dyn Sink>) -> ClientProbe {
        ClientProbe(sink)
    }
    pub fn is_connected(&self) -> bool {
        self.0.client_connected()
    }
}

impl fmt::Debug for ClientProbe {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ClientProbe({})", self.is_connected())
    }
}

/// `PATH_INFO` for a request path
///
/// Leading slashes are collapsed to one and the url prefix is stripped.
fn path_info(path: &str, url_prefix: &str) -> String {
    let path = if path.starts_with('/') {
        format!("/{}", path.trim_start_matches('/'))
    } else {
        path.to_string()
    };
    if url_prefix.is_empty() {
        return path;
    }
    if path == url_prefix {
        return String::new();
    }
    if path.starts_with(url_prefix) &&
        path[url_prefix.len()..].starts_with('/')
    {
        return path[url_prefix.len()..].to_string();
    }
    path
}

impl Environ {
    pub fn new(request: &mut Request, version: Version,
        remote: Option<SocketAddr>, info: &ServerInfo, probe: ClientProbe)
        -> Environ
    {
        let mut vars = BTreeMap::new();
        {
            let mut set = |k: &str, v: String| {
                vars.insert(k.to_string(), v);
            };
            match remote {
                Some(addr) => {
                    set("REMOTE_ADDR", addr.ip().to_string());
                    set("REMOTE_HOST", addr.ip().to_string());
                    set("REMOTE_PORT", addr.port().to_string());
                }
                None => {
                    set("REMOTE_ADDR", "localhost".to_string());
                    set("REMOTE_HOST", "localhost".to_string());
                    set("REMOTE_PORT", String::new());
                }
            }
            set("REQUEST_METHOD", request.method().to_ascii_uppercase());
            set("SERVER_PORT", info.port.clone());
            set("SERVER_NAME", info.name.clone());
            set("SERVER_SOFTWARE", info.software.clone());
            set("SERVER_PROTOCOL", version.to_string());
            set("SCRIPT_NAME", info.url_prefix.clone());
            set("PATH_INFO", path_info(request.path(), &info.url_prefix));
            set("REQUEST_URI", request.uri().to_string());
            set("QUERY_STRING", request.query().to_string());
        }
        for &(ref key, ref value) in request.headers() {
            let key = match &key[..] {
                "CONTENT_LENGTH" | "CONTENT_TYPE" => key.clone(),
                _ => format!("HTTP_{}", key),
            };
            if !vars.contains_key(&key) {
                vars.insert(key, value.trim().to_string());
            }
        }
        let url_scheme = if request.url().scheme.is_empty() {
            info.url_scheme.clone()
        } else {
            request.url().scheme.clone()
        };
        Environ {
            vars: vars,
            url_scheme: url_scheme,
            input: RequestBody::new(request.take_body()),
            probe: probe,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|x| &x[..])
    }
    pub fn iter(&self) -> ::std::collections::btree_map::Iter<String, String>
    {
        self.vars.iter()
    }
    pub fn method(&self) -> &str {
        self.get("REQUEST_METHOD").unwrap_or("")
    }
    pub fn path_info(&self) -> &str {
        self.get("PATH_INFO").unwrap_or("")
    }
    pub fn query_string(&self) -> &str {
        self.get("QUERY_STRING").unwrap_or("")
    }
    /// `http` or `https`, from the request target or the configuration
    pub fn url_scheme(&self) -> &str {
        &self.url_scheme
    }
    /// Request body
    pub fn input(&mut self) -> &mut RequestBody {
        &mut self.input
    }
    /// Probe to check whether the client is still connected
    pub fn client_probe(&self) -> ClientProbe {
        self.probe.clone()
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use enums::Version;
    use server::Config;
    use server::request::Request;
    use server::task::test_sink::MockSink;
    use super::{Environ, ServerInfo, ClientProbe, path_info};

    fn info(prefix: &str) -> ServerInfo {
        ServerInfo {
            name: "localhost".into(),
            port: "8080".into(),
            software: "tk-httpd".into(),
            url_scheme: "http".into(),
            url_prefix: prefix.into(),
        }
    }

    fn environ(mut data: &[u8], prefix: &str) -> Environ {
        let mut req = Request::new(&Config::new());
        while !data.is_empty() && !req.is_completed() {
            let n = req.received(data);
            data = &data[n..];
        }
        assert!(req.is_completed());
        let addr: SocketAddr = "127.0.0.1:4567".parse().unwrap();
        Environ::new(&mut req, Version::Http11, Some(addr), &info(prefix),
            ClientProbe::new(Arc::new(MockSink::new())))
    }

    #[test]
    fn prefix() {
        assert_eq!(path_info("//a/b", ""), "/a/b");
        assert_eq!(path_info("/app", "/app"), "");
        assert_eq!(path_info("/app/x", "/app"), "/x");
        assert_eq!(path_info("/application", "/app"), "/application");
    }

    #[test]
    fn cgi_vars() {
        let mut env = environ(b"POST /app/items?id=3 HTTP/1.1\r\n\
            Host: example.com\r\n\
            Content-Type: text/plain\r\n\
            Content-Length: 4\r\n\
            X-Request-Id: abc\r\n\r\nbody", "/app");
        assert_eq!(env.method(), "POST");
        assert_eq!(env.get("SCRIPT_NAME"), Some("/app"));
        assert_eq!(env.path_info(), "/items");
        assert_eq!(env.query_string(), "id=3");
        assert_eq!(env.get("REQUEST_URI"), Some("/app/items?id=3"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("127.0.0.1"));
        assert_eq!(env.get("REMOTE_PORT"), Some("4567"));
        assert_eq!(env.get("HTTP_HOST"), Some("example.com"));
        assert_eq!(env.get("CONTENT_TYPE"), Some("text/plain"));
        assert_eq!(env.get("CONTENT_LENGTH"), Some("4"));
        assert_eq!(env.get("HTTP_X_REQUEST_ID"), Some("abc"));
        assert_eq!(env.url_scheme(), "http");
        assert!(env.client_probe().is_connected());
        let mut body = String::new();
        env.input().read_to_string(&mut body).unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn scheme_from_absolute_target() {
        let env = environ(b"GET https://example.com/ HTTP/1.1\r\n\r\n", "");
        assert_eq!(env.url_scheme(), "https");
        assert_eq!(env.path_info(), "/");
    }
}
