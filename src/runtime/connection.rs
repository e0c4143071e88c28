//! Per-client connection state.
//!
//! Each connection owns its stream, the peer address it is labelled with,
//! and two byte buffers:
//! - inbound: bytes received but not yet terminated by `\n`
//! - outbound: response bytes not yet accepted by the kernel
//!
//! The write-interest flag mirrors what the poller is watching. Only the
//! connection manager changes it, together with the registration.

use crate::address::Ipv4Address;
use crate::protocol;
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};

/// Bytes pulled from the socket per `read` call.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Which readiness conditions the poller watches for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteInterest {
    /// Only read-readiness; outbound buffer is empty.
    ReadOnly,
    /// Read- and write-readiness; output is pending.
    ReadWrite,
}

/// Outcome of draining the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Socket would block; connection stays open.
    Drained,
    /// Peer performed an orderly shutdown.
    Closed,
    /// The unterminated tail grew past the line limit.
    Overflow,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: Ipv4Address,
    inbound: BytesMut,
    outbound: BytesMut,
    interest: WriteInterest,
}

impl<S> Connection<S> {
    /// Create a new connection, watched for reads only.
    pub fn new(stream: S, peer: Ipv4Address) -> Self {
        Self {
            stream,
            peer,
            inbound: BytesMut::with_capacity(READ_CHUNK_SIZE),
            outbound: BytesMut::new(),
            interest: WriteInterest::ReadOnly,
        }
    }

    pub fn peer(&self) -> &Ipv4Address {
        &self.peer
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn interest(&self) -> WriteInterest {
        self.interest
    }

    pub(crate) fn set_interest(&mut self, interest: WriteInterest) {
        self.interest = interest;
    }

    /// Append response bytes to the outbound buffer.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn pending_output(&self) -> &[u8] {
        &self.outbound
    }

    /// Take the next complete line out of the inbound buffer.
    ///
    /// The line is stripped of its terminator and surrounding whitespace
    /// and may therefore be empty. Bytes that are not valid UTF-8 are
    /// replaced with U+FFFD, so a posted message is always valid text.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.inbound.iter().position(|&b| b == b'\n')?;
        let raw = self.inbound.split_to(pos + 1);
        let line = String::from_utf8_lossy(&raw[..pos]);
        Some(trim(&line).to_string())
    }

    /// Length of the unterminated tail of the inbound buffer.
    pub fn partial_line_len(&self) -> usize {
        match self.inbound.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.inbound.len() - pos - 1,
            None => self.inbound.len(),
        }
    }
}

impl<S: Read> Connection<S> {
    /// Read until the socket would block or the peer shuts down.
    ///
    /// `limit` bounds the unterminated tail so a client that never sends
    /// `\n` cannot grow the buffer without bound.
    pub fn read_available(&mut self, limit: usize) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if self.partial_line_len() > limit {
                        return Ok(ReadStatus::Overflow);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::Drained)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: Write> Connection<S> {
    /// One non-blocking send from the head of the outbound buffer.
    ///
    /// Returns the number of bytes the kernel took; would-block yields 0.
    pub fn send_once(&mut self) -> io::Result<usize> {
        if self.outbound.is_empty() {
            return Ok(0);
        }
        loop {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.outbound.advance(n);
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Send until the outbound buffer is empty or the socket would block.
    pub fn send_available(&mut self) -> io::Result<()> {
        while self.has_pending_output() {
            if self.send_once()? == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// Whitespace stripped from both ends of a command line.
fn trim(line: &str) -> &str {
    line.trim_matches(protocol::is_space)
}
