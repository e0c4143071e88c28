//! In-memory message store.
//!
//! Provides a thread-safe, append-only board of messages with:
//! - Monotonic identifier allocation
//! - Insertion-ordered listing
//! - In-place reactions
//!
//! Every operation is a single critical section under one mutex, so
//! identifier allocation and the append it belongs to can never be split.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, trace};

/// Reaction attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reaction {
    #[default]
    None,
    Happy,
    Sad,
}

impl Reaction {
    /// Wire name, empty for no reaction
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::None => "",
            Reaction::Happy => "HAPPY",
            Reaction::Sad => "SAD",
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single posted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub text: String,
    /// Dotted-decimal address of the poster
    pub sender: String,
    pub reaction: Reaction,
}

#[derive(Debug, Default)]
struct Board {
    messages: Vec<Message>,
    next_id: u64,
}

/// Thread-safe message store
#[derive(Debug, Default)]
pub struct MessageStore {
    board: Mutex<Board>,
}

impl MessageStore {
    /// Create a new, empty store
    pub fn new() -> Arc<Self> {
        info!("Initializing message store");
        Arc::new(Self::default())
    }

    // Each critical section leaves the board consistent, so a panic while
    // holding the lock cannot leave a torn message behind.
    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message and return its freshly allocated identifier
    pub fn post(&self, text: &str, sender: &str) -> u64 {
        let mut board = self.lock();
        let id = board.next_id;
        board.next_id += 1;
        board.messages.push(Message {
            id,
            text: text.to_string(),
            sender: sender.to_string(),
            reaction: Reaction::None,
        });
        trace!(id, sender, "Message posted");
        id
    }

    /// Snapshot of all messages in insertion order
    pub fn list(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Set the reaction of message `id`; returns whether it exists
    pub fn react(&self, id: u64, reaction: Reaction) -> bool {
        let mut board = self.lock();
        match board.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.reaction = reaction;
                trace!(id, %reaction, "Reaction set");
                true
            }
            None => false,
        }
    }
}
