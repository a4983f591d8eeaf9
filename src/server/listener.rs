//! Listening sockets and accepted streams
use std::fs;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use mio::{Interest, Registry, Token};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
#[cfg(unix)] use mio::net::{UnixListener, UnixStream};

use server::Config;
use server::error::Error;


/// A client connection
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A socket accepting client connections
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Stream::Tcp(ref mut s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Stream::Tcp(ref mut s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Stream::Tcp(ref mut s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => s.flush(),
        }
    }
}

impl Source for Stream {
    fn register(&mut self, registry: &Registry, token: Token,
        interests: Interest)
        -> io::Result<()>
    {
        match *self {
            Stream::Tcp(ref mut s) => s.register(registry, token, interests),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => s.register(registry, token, interests),
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token,
        interests: Interest)
        -> io::Result<()>
    {
        match *self {
            Stream::Tcp(ref mut s) => s.reregister(registry, token, interests),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => {
                s.reregister(registry, token, interests)
            }
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match *self {
            Stream::Tcp(ref mut s) => s.deregister(registry),
            #[cfg(unix)]
            Stream::Unix(ref mut s) => s.deregister(registry),
        }
    }
}

impl Listener {
    /// Accept a connection, `None` address means a unix socket peer
    pub fn accept(&self) -> io::Result<(Stream, Option<SocketAddr>)> {
        match *self {
            Listener::Tcp(ref l) => {
                let (sock, addr) = l.accept()?;
                // small responses shouldn't wait for more data
                sock.set_nodelay(true)?;
                Ok((Stream::Tcp(sock), Some(addr)))
            }
            #[cfg(unix)]
            Listener::Unix(ref l, _) => {
                let (sock, _) = l.accept()?;
                Ok((Stream::Unix(sock), None))
            }
        }
    }
    /// Address of a TCP listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self {
            Listener::Tcp(ref l) => l.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(..) => None,
        }
    }
}

impl Source for Listener {
    fn register(&mut self, registry: &Registry, token: Token,
        interests: Interest)
        -> io::Result<()>
    {
        match *self {
            Listener::Tcp(ref mut l) => l.register(registry, token, interests),
            #[cfg(unix)]
            Listener::Unix(ref mut l, _) => {
                l.register(registry, token, interests)
            }
        }
    }
    fn reregister(&mut self, registry: &Registry, token: Token,
        interests: Interest)
        -> io::Result<()>
    {
        match *self {
            Listener::Tcp(ref mut l) => {
                l.reregister(registry, token, interests)
            }
            #[cfg(unix)]
            Listener::Unix(ref mut l, _) => {
                l.reregister(registry, token, interests)
            }
        }
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match *self {
            Listener::Tcp(ref mut l) => l.deregister(registry),
            #[cfg(unix)]
            Listener::Unix(ref mut l, _) => l.deregister(registry),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Listener::Unix(_, ref path) = *self {
                fs::remove_file(path).ok();
            }
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &PathBuf, perms: u32) -> io::Result<Listener> {
    use std::os::unix::fs::PermissionsExt;

    // a stale socket from the previous run
    if fs::metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(perms))?;
    Ok(Listener::Unix(listener, path.clone()))
}

/// Bind all the sockets configured
pub fn bind(config: &Config) -> Result<Vec<Listener>, Error> {
    let mut result = Vec::new();
    for addr in &config.listen {
        match *addr {
            SocketAddr::V4(_) if !config.ipv4 => continue,
            SocketAddr::V6(_) if !config.ipv6 => continue,
            _ => {}
        }
        let listener = TcpListener::bind(*addr)?;
        info!("Serving on http://{}",
            listener.local_addr().unwrap_or(*addr));
        result.push(Listener::Tcp(listener));
    }
    #[cfg(unix)]
    {
        if let Some(ref path) = config.unix_socket {
            result.push(bind_unix(path, config.unix_socket_perms)?);
            info!("Serving on {:?}", path);
        }
    }
    if result.is_empty() {
        return Err(Error::NoListeners);
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use server::Config;
    use server::error::Error;
    use super::bind;

    #[test]
    fn no_listeners() {
        assert_matches!(bind(&Config::new()), Err(Error::NoListeners));
    }

    #[test]
    fn family_filter() {
        let mut cfg = Config::new();
        cfg.listen("127.0.0.1:0".parse().unwrap()).ipv4(false);
        assert_matches!(bind(&cfg), Err(Error::NoListeners));
        cfg.ipv4(true);
        let listeners = bind(&cfg).unwrap();
        assert_eq!(listeners.len(), 1);
        assert!(listeners[0].local_addr().unwrap().port() != 0);
    }

    #[cfg(unix)]
    #[test]
    fn unix_socket() {
        use std::env;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let path = env::temp_dir().join(
            format!("tk-httpd-test-{}.sock", ::std::process::id()));
        let mut cfg = Config::new();
        cfg.unix_socket(path.clone()).unix_socket_perms(0o660);
        let listeners = bind(&cfg).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
        drop(listeners);
        assert!(fs::metadata(&path).is_err());
    }
}
