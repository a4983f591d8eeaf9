//! Event loop multiplexing the listeners and client connections
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};

use server::Config;
use server::channel::{Channel, Shared};
use server::dispatcher::Dispatcher;
use server::environ::ServerInfo;
use server::error::Error;
use server::listener::Listener;
use server::task::Application;


/// Token of the waker, listeners take tokens from zero
pub const WAKER: Token = Token(usize::MAX);

/// Wakes up the reactor from other threads
///
/// Worker threads pull it when they have output to flush or when they
/// are done with a channel, so the reactor resumes reading.
#[derive(Clone)]
pub struct Trigger(Arc<Waker>);

impl Trigger {
    pub fn new(waker: Arc<Waker>) -> Trigger {
        Trigger(waker)
    }
    pub fn pull(&self) {
        if let Err(e) = self.0.wake() {
            error!("Can't wake up the reactor: {}", e);
        }
    }
}

/// Channels currently open, by token
pub struct Registry {
    channels: HashMap<Token, Channel>,
    next_token: usize,
}

impl Registry {
    fn new(first_token: usize) -> Registry {
        Registry {
            channels: HashMap::new(),
            next_token: first_token,
        }
    }
    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }
    pub fn len(&self) -> usize {
        self.channels.len()
    }
    /// Tokens of the channels idle for longer than `timeout`
    pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<Token> {
        self.channels.values()
            .filter(|ch| ch.is_idle(now, timeout))
            .map(|ch| ch.token())
            .collect()
    }
}

pub struct Reactor {
    config: Arc<Config>,
    app: Arc<dyn Application>,
    info: Arc<ServerInfo>,
    poll: Poll,
    listeners: Vec<Listener>,
    listen_ready: Vec<bool>,
    registry: Registry,
    dispatcher: Dispatcher,
    trigger: Trigger,
    stop: Arc<AtomicBool>,
    in_connection_overflow: bool,
    next_cleanup: Instant,
}

impl Reactor {
    pub fn new(config: Arc<Config>, app: Arc<dyn Application>,
        info: ServerInfo, mut listeners: Vec<Listener>)
        -> Result<Reactor, Error>
    {
        let poll = Poll::new()?;
        for (idx, listener) in listeners.iter_mut().enumerate() {
            poll.registry().register(listener, Token(idx),
                                     Interest::READABLE)?;
        }
        let waker = Waker::new(poll.registry(), WAKER)?;
        Ok(Reactor {
            next_cleanup: Instant::now() + config.cleanup_interval,
            registry: Registry::new(listeners.len()),
            listen_ready: vec![true; listeners.len()],
            config: config,
            app: app,
            info: Arc::new(info),
            poll: poll,
            listeners: listeners,
            dispatcher: Dispatcher::new(),
            trigger: Trigger::new(Arc::new(waker)),
            stop: Arc::new(AtomicBool::new(false)),
            in_connection_overflow: false,
        })
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn local_addrs(&self) -> Vec<::std::net::SocketAddr> {
        self.listeners.iter().filter_map(|l| l.local_addr()).collect()
    }

    /// Run until the stop flag is set
    pub fn run(&mut self) -> Result<(), Error> {
        self.dispatcher.set_thread_count(self.config.threads)?;
        info!("Started {} worker threads", self.dispatcher.thread_count());
        let mut events = Events::with_capacity(1024);
        let result = self.run_loop(&mut events);
        self.close_all();
        if !self.dispatcher.shutdown(true, self.config.shutdown_timeout) {
            warn!("Some worker threads are still busy, exiting anyway");
        }
        result
    }

    fn run_loop(&mut self, events: &mut Events) -> Result<(), Error> {
        while !self.stop.load(Ordering::SeqCst) {
            match self.poll.poll(events, Some(self.config.poll_timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            for event in events.iter() {
                match event.token() {
                    WAKER => {}
                    Token(idx) if idx < self.listeners.len() => {
                        self.listen_ready[idx] = true;
                    }
                    token => {
                        if let Some(ch) = self.registry.channels
                            .get_mut(&token)
                        {
                            ch.ready(
                                event.is_readable() || event.is_read_closed(),
                                event.is_writable() ||
                                    event.is_write_closed() ||
                                    event.is_error());
                        }
                    }
                }
            }
            let now = Instant::now();
            if now >= self.next_cleanup {
                self.next_cleanup = now + self.config.cleanup_interval;
                self.maintenance(now);
            }
            if self.accepting() {
                self.accept();
            }
            self.drive_all();
        }
        Ok(())
    }

    /// Checks connection limit, logging when its state changes
    fn accepting(&mut self) -> bool {
        let open = self.registry.len();
        if !self.in_connection_overflow &&
            open >= self.config.connection_limit
        {
            self.in_connection_overflow = true;
            warn!("total open connections reached the connection limit, \
                no longer accepting new connections");
        } else if self.in_connection_overflow &&
            open < self.config.connection_limit
        {
            self.in_connection_overflow = false;
            info!("total open connections dropped below the connection \
                limit, listening again");
        }
        !self.in_connection_overflow
    }

    fn accept(&mut self) {
        for idx in 0..self.listeners.len() {
            while self.listen_ready[idx] &&
                self.registry.len() < self.config.connection_limit
            {
                match self.listeners[idx].accept() {
                    Ok((stream, addr)) => self.add_channel(stream, addr),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.listen_ready[idx] = false;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        // mostly EMFILE, retried on the next iteration
                        warn!("Error accepting connection: {}", e);
                        break;
                    }
                }
            }
        }
    }

    fn add_channel(&mut self, stream: ::server::listener::Stream,
        addr: Option<::std::net::SocketAddr>)
    {
        let token = self.registry.next_token();
        let shared = Arc::new(Shared::new(self.config.clone(),
            self.app.clone(), self.info.clone(), self.trigger.clone(), addr));
        let mut channel = Channel::new(token, stream, shared,
                                       self.config.clone());
        if let Err(e) = channel.register(self.poll.registry()) {
            error!("Can't register connection from {:?}: {}", addr, e);
            return;
        }
        debug!("Accepted connection from {:?}", addr);
        self.registry.channels.insert(token, channel);
    }

    fn drive_all(&mut self) {
        let mut closed = Vec::new();
        for (token, channel) in self.registry.channels.iter_mut() {
            if !channel.drive(&self.dispatcher) {
                closed.push(*token);
            }
        }
        for token in closed {
            self.close_channel(token);
        }
    }

    fn close_channel(&mut self, token: Token) {
        if let Some(mut channel) = self.registry.channels.remove(&token) {
            channel.close(self.poll.registry());
        }
    }

    fn maintenance(&mut self, now: Instant) {
        for token in self.registry.idle(now, self.config.channel_timeout) {
            debug!("Closing idle connection {:?}", token);
            self.close_channel(token);
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.registry.channels.keys()
            .cloned().collect();
        for token in tokens {
            self.close_channel(token);
        }
    }
}
