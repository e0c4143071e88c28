//! Connection table and per-connection I/O.
//!
//! Owns every live connection, keyed by its slab slot (which doubles as
//! the poll token). All readiness registration changes for a connection
//! go through [`ConnectionManager::set_interest`], so the write-interest
//! flag and the poller never disagree:
//!
//! ```text
//!            output queued, send would block
//!   ReadOnly ───────────────────────────────▶ ReadWrite
//!      ▲                                          │
//!      └──────────── outbound drained ────────────┘
//! ```

use crate::address::Ipv4Address;
use crate::error::ConnectionError;
use crate::protocol;
use crate::runtime::connection::{Connection, ReadStatus, WriteInterest};
use crate::storage::MessageStore;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Live connections plus the handles needed to serve them.
pub struct ConnectionManager {
    connections: Slab<Connection<TcpStream>>,
    registry: Registry,
    store: Arc<MessageStore>,
    max_line_length: usize,
}

impl ConnectionManager {
    pub fn new(registry: Registry, store: Arc<MessageStore>, max_line_length: usize) -> Self {
        Self {
            connections: Slab::new(),
            registry,
            store,
            max_line_length,
        }
    }

    /// Check if `token` names a live connection.
    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains(token.0)
    }

    /// Accept until the listener would block.
    ///
    /// A connection that fails to set up is dropped (closing its socket)
    /// and accepting continues with the next one.
    pub fn accept_all(&mut self, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => match self.admit(stream, addr) {
                    Ok(token) => {
                        let peer = self.connections[token.0].peer();
                        info!(
                            conn = token.0,
                            peer = %peer,
                            active = self.connections.len(),
                            "Accepted new connection"
                        );
                    }
                    Err(e) => warn!(peer = %addr, error = %e, "Discarding new connection"),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    error!(error = %ConnectionError::Accept(e), "Accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<Token, ConnectionError> {
        // mio hands out accepted streams already in non-blocking mode
        let peer = Ipv4Address::from_socket_addr(addr)?;
        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());

        let mut conn = Connection::new(stream, peer);
        self.registry
            .register(conn.stream_mut(), token, Interest::READABLE)
            .map_err(ConnectionError::Register)?;

        entry.insert(conn);
        Ok(token)
    }

    /// Drain the socket, then dispatch every complete line it produced.
    pub fn read(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };

        match conn.read_available(self.max_line_length) {
            Ok(ReadStatus::Drained) => {}
            Ok(ReadStatus::Closed) => {
                return self.close(token, &ConnectionError::Disconnected);
            }
            Ok(ReadStatus::Overflow) => {
                let len = conn.partial_line_len();
                return self.close(token, &ConnectionError::LineTooLong(len));
            }
            Err(e) => return self.close(token, &ConnectionError::Recv(e)),
        }

        loop {
            // A response may have closed the connection
            let Some(conn) = self.connections.get_mut(token.0) else {
                return;
            };
            let Some(line) = conn.next_line() else {
                return;
            };
            if line.is_empty() {
                continue;
            }

            debug!(conn = token.0, peer = %conn.peer(), command = %line, "Processing command");
            let response = protocol::handle_line(&line, conn.peer().as_str(), &self.store);
            self.enqueue(token, &response);
        }
    }

    /// Queue response bytes, sending right away when nothing is pending.
    pub fn enqueue(&mut self, token: Token, bytes: &[u8]) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };
        conn.queue(bytes);

        if conn.interest() == WriteInterest::ReadWrite {
            // Already waiting for write-readiness; flush will pick it up
            return;
        }

        if let Err(e) = conn.send_once() {
            return self.close(token, &ConnectionError::Send(e));
        }

        if conn.has_pending_output() {
            trace!(conn = token.0, pending = conn.pending_output().len(), "Send would block");
            if let Err(e) = Self::set_interest(&self.registry, token, conn, WriteInterest::ReadWrite)
            {
                self.close(token, &ConnectionError::Register(e));
            }
        }
    }

    /// Handle write-readiness: send what the kernel will take.
    pub fn flush(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };

        if let Err(e) = conn.send_available() {
            return self.close(token, &ConnectionError::Send(e));
        }

        if !conn.has_pending_output() {
            if let Err(e) = Self::set_interest(&self.registry, token, conn, WriteInterest::ReadOnly)
            {
                self.close(token, &ConnectionError::Register(e));
            }
        }
    }

    /// Remove a connection and release its socket. Unknown tokens are ignored.
    pub fn close(&mut self, token: Token, reason: &ConnectionError) {
        let Some(mut conn) = self.connections.try_remove(token.0) else {
            return;
        };

        if let Err(e) = self.registry.deregister(conn.stream_mut()) {
            // The kernel may already have dropped it on hangup
            if e.raw_os_error() != Some(libc::ENOENT) {
                warn!(conn = token.0, error = %e, "Failed to deregister connection");
            }
        }

        info!(
            conn = token.0,
            peer = %conn.peer(),
            %reason,
            os_error = ?reason.raw_os_error(),
            "Closing connection"
        );
    }

    /// The only place a connection's readiness registration changes.
    fn set_interest(
        registry: &Registry,
        token: Token,
        conn: &mut Connection<TcpStream>,
        interest: WriteInterest,
    ) -> io::Result<()> {
        if conn.interest() == interest {
            return Ok(());
        }

        let watch = match interest {
            WriteInterest::ReadOnly => Interest::READABLE,
            WriteInterest::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        };
        registry.reregister(conn.stream_mut(), token, watch)?;
        conn.set_interest(interest);
        trace!(conn = token.0, ?interest, "Registration updated");
        Ok(())
    }

    /// Current write interest of a connection.
    #[cfg(test)]
    pub fn interest(&self, token: Token) -> Option<WriteInterest> {
        self.connections.get(token.0).map(|c| c.interest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::io::{Read, Write};
    use std::time::Duration;

    struct Harness {
        poll: Poll,
        listener: TcpListener,
        manager: ConnectionManager,
    }

    fn harness(max_line_length: usize) -> Harness {
        let poll = Poll::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        poll.registry()
            .register(&mut listener, Token(usize::MAX), Interest::READABLE)
            .unwrap();
        let registry = poll.registry().try_clone().unwrap();
        let manager = ConnectionManager::new(registry, MessageStore::new(), max_line_length);
        Harness {
            poll,
            listener,
            manager,
        }
    }

    impl Harness {
        /// Connect a client and accept it on the server side.
        fn connect(&mut self) -> (std::net::TcpStream, Token) {
            let client = std::net::TcpStream::connect(self.listener.local_addr().unwrap()).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let before = self.manager.connections.len();
            for _ in 0..50 {
                self.manager.accept_all(&self.listener);
                if self.manager.connections.len() > before {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            let token = Token(self.manager.connections.iter().last().unwrap().0);
            (client, token)
        }

        /// Poll once and deliver any events for `token`.
        fn pump_once(&mut self, token: Token, timeout: Duration) -> bool {
            let mut events = Events::with_capacity(16);
            self.poll.poll(&mut events, Some(timeout)).unwrap();
            let mut delivered = false;
            for event in events.iter().filter(|e| e.token() == token) {
                if event.is_readable() {
                    self.manager.read(token);
                }
                if event.is_writable() && self.manager.contains(token) {
                    self.manager.flush(token);
                }
                delivered = true;
            }
            delivered
        }

        /// Poll until an event for `token` has been delivered.
        fn pump(&mut self, token: Token) {
            for _ in 0..20 {
                if self.pump_once(token, Duration::from_millis(250)) {
                    return;
                }
            }
            panic!("no readiness event for {token:?}");
        }
    }

    fn read_exact_str(client: &mut std::net::TcpStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_accept_and_respond() {
        let mut h = harness(1024);
        let (mut client, token) = h.connect();
        assert_eq!(h.manager.interest(token), Some(WriteInterest::ReadOnly));

        client.write_all(b"POST hello\n").unwrap();
        h.pump(token);

        let expected = "OK: Message 0 posted.\n";
        assert_eq!(read_exact_str(&mut client, expected.len()), expected);
        // Small responses go out immediately without write registration
        assert_eq!(h.manager.interest(token), Some(WriteInterest::ReadOnly));
    }

    #[test]
    fn test_disconnect_removes_connection() {
        let mut h = harness(1024);
        let (client, token) = h.connect();

        drop(client);
        h.pump(token);
        assert!(!h.manager.contains(token));

        // Closing twice is a no-op
        h.manager.close(token, &ConnectionError::Disconnected);
        assert!(h.manager.connections.is_empty());
    }

    #[test]
    fn test_overlong_line_closes_connection() {
        let mut h = harness(16);
        let (mut client, token) = h.connect();

        client.write_all(&[b'x'; 64]).unwrap();
        h.pump(token);
        assert!(!h.manager.contains(token));
    }

    impl Harness {
        /// Remove a connection from the poller behind the manager's back,
        /// so its next registration change fails.
        fn forget_registration(&mut self, token: Token) {
            let conn = self.manager.connections.get_mut(token.0).unwrap();
            self.manager.registry.deregister(conn.stream_mut()).unwrap();
        }
    }

    #[test]
    fn test_failed_write_registration_closes_connection() {
        let mut h = harness(1024);
        let (_client, token) = h.connect();
        let (mut other, other_token) = h.connect();
        h.forget_registration(token);

        // Too large for one send, so enqueue has to ask for write-readiness
        h.manager.enqueue(token, &vec![b'a'; 4 * 1024 * 1024]);
        assert!(!h.manager.contains(token));

        other.write_all(b"GET\n").unwrap();
        h.pump(other_token);
        let expected = "Stack is empty.\n";
        assert_eq!(read_exact_str(&mut other, expected.len()), expected);
    }

    #[test]
    fn test_failed_read_only_registration_closes_connection() {
        let mut h = harness(1024);
        let (mut client, token) = h.connect();

        let payload = vec![b'a'; 4 * 1024 * 1024];
        h.manager.enqueue(token, &payload);
        assert_eq!(h.manager.interest(token), Some(WriteInterest::ReadWrite));
        h.forget_registration(token);

        // Every byte still arrives; dropping back to read-only then fails
        let mut received = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while received < payload.len() {
            received += client.read(&mut buf).unwrap();
            h.manager.flush(token);
        }

        assert_eq!(received, payload.len());
        assert!(!h.manager.contains(token));
    }

    #[test]
    fn test_backpressure_registers_and_clears_write_interest() {
        let mut h = harness(1024);
        let (mut client, token) = h.connect();

        // Far more than a socket send buffer holds
        let payload = vec![b'a'; 4 * 1024 * 1024];
        h.manager.enqueue(token, &payload);
        assert_eq!(h.manager.interest(token), Some(WriteInterest::ReadWrite));

        let mut received = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while received < payload.len() {
            received += client.read(&mut buf).unwrap();
            if h.manager.interest(token) == Some(WriteInterest::ReadWrite) {
                h.pump_once(token, Duration::from_millis(20));
            }
        }

        assert_eq!(received, payload.len());
        assert_eq!(h.manager.interest(token), Some(WriteInterest::ReadOnly));
    }
}
