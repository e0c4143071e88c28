//! Single-threaded, readiness-based runtime.
//!
//! - `event_loop`: the reactor that owns the listener and the poller
//! - `manager`: the connection table, buffered I/O and backpressure
//! - `connection`: per-client buffers and write-interest state

mod connection;
mod event_loop;
mod manager;

pub use event_loop::Reactor;
