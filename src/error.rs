//! Error types for the board server.
//!
//! Startup and reactor failures are fatal and surface to the operator.
//! Connection failures only tear down the affected connection; their
//! Display text is the close reason that gets logged.

use crate::address::AddressError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Fatal startup and reactor errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket() failed: {0}")]
    Socket(#[source] io::Error),

    #[error("{option} failed: {source}")]
    Configure {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("bind() to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen() failed: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to create readiness notification context: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to register listening socket: {0}")]
    Register(#[source] io::Error),

    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Per-connection errors; each one closes only its own connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to resolve peer address: {0}")]
    Resolve(#[from] AddressError),

    #[error("readiness registration failed: {0}")]
    Register(#[source] io::Error),

    #[error("recv error: {0}")]
    Recv(#[source] io::Error),

    #[error("send error: {0}")]
    Send(#[source] io::Error),

    #[error("line too long ({0} bytes without newline)")]
    LineTooLong(usize),

    #[error("disconnected")]
    Disconnected,

    #[error("error or hangup reported by poll")]
    Hangup,
}

impl ConnectionError {
    /// Underlying OS error code, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ConnectionError::Accept(e)
            | ConnectionError::Register(e)
            | ConnectionError::Recv(e)
            | ConnectionError::Send(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
