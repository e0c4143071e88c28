//! The reactor: one thread, one poller, one listening socket.
//!
//! Each turn blocks until something is ready, then accepts new clients or
//! hands the connection's readiness to the manager. Registrations are
//! edge-triggered, so the manager drains reads, accepts and flushes until
//! the socket would block.

use crate::config::Config;
use crate::error::{ConnectionError, ServerError};
use crate::runtime::manager::ConnectionManager;
use crate::storage::MessageStore;
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, trace};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Single-threaded reactor: the listening socket, the poller and every
/// connection it serves.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    manager: ConnectionManager,
}

impl Reactor {
    /// Bind the listening socket and set up readiness notification.
    ///
    /// Everything acquired before a failing step is released on return.
    pub fn build(config: &Config, store: Arc<MessageStore>) -> Result<Self, ServerError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::from(&config.host),
            config.port,
        ));

        let listener = create_listener(addr, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(ServerError::Register)?;
        let registry = poll.registry().try_clone().map_err(ServerError::Poll)?;

        info!(
            addr = %addr,
            backlog = config.backlog,
            max_events = config.max_events,
            max_line_length = config.max_line_length,
            "Server configured"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_events),
            listener,
            manager: ConnectionManager::new(registry, store, config.max_line_length),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the readiness wait fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait once for readiness and handle every event it produced.
    ///
    /// An interrupted wait counts as a turn with no events.
    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            error!(error = %e, "Readiness wait failed");
            return Err(ServerError::Wait(e));
        }

        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if event.is_readable() {
                        self.manager.accept_all(&self.listener);
                    }
                }
                token => dispatch(&mut self.manager, token, Readiness::from(event)),
            }
        }
        Ok(())
    }
}

/// What a single poll event reported for a connection.
#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    readable: bool,
    writable: bool,
    /// Socket error, or both directions shut down
    hangup: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_error() || (event.is_read_closed() && event.is_write_closed()),
        }
    }
}

fn dispatch(manager: &mut ConnectionManager, token: Token, readiness: Readiness) {
    if !manager.contains(token) {
        trace!(conn = token.0, "Ignoring stale event");
        return;
    }

    if readiness.hangup {
        manager.close(token, &ConnectionError::Hangup);
        return;
    }

    if readiness.readable {
        manager.read(token);
    }

    // Re-check connection exists (the read may have closed it)
    if readiness.writable && manager.contains(token) {
        manager.flush(token);
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener, ServerError> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(ServerError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(|source| ServerError::Configure {
            option: "setsockopt(SO_REUSEADDR)",
            source,
        })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| ServerError::Configure {
            option: "set O_NONBLOCK",
            source,
        })?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket.listen(backlog).map_err(ServerError::Listen)?;

    Ok(socket.into())
}
