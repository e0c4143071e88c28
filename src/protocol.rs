//! Message board text protocol parser and response generator.
//!
//! One command per `\n`-terminated line:
//! - `POST <text>`: append a message
//! - `GET`: list every message
//! - `HAPPY <id>` / `SAD <id>`: react to a message
//!
//! Failures never close the connection; they are answered with an
//! `ERR: ...` line and the client may carry on.

use crate::storage::{MessageStore, Reaction};
use bytes::BytesMut;
use std::fmt::Write;
use thiserror::Error;

/// Protocol-level errors, reported back to the client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid POST format. Usage: POST <message>.")]
    InvalidPostFormat,

    #[error("Message ID not provided for {0}.")]
    MissingId(&'static str),

    #[error("Invalid message ID format '{0}'. Must be an integer.")]
    InvalidId(String),

    #[error("Message ID {0} not found.")]
    NotFound(u64),

    #[error("Unknown command '{0}'.")]
    UnknownCommand(String),
}

/// Parsed board command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Post the verbatim remainder of the line
    Post { text: &'a str },
    /// List all messages
    Get,
    /// React to a message
    React { id: u64, reaction: Reaction },
}

/// Token separator: the six C-locale whitespace characters. Non-ASCII
/// spaces such as U+00A0 belong to the token they appear in.
pub fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}

/// Parse one trimmed, non-empty command line.
pub fn parse(line: &str) -> Result<Command<'_>, ProtocolError> {
    let mut tokens = line.split(is_space).filter(|token| !token.is_empty());
    let command = tokens.next().unwrap_or_default();

    match command {
        "POST" => line
            .strip_prefix("POST ")
            .map(|text| Command::Post { text })
            .ok_or(ProtocolError::InvalidPostFormat),
        "GET" => Ok(Command::Get),
        "HAPPY" => parse_reaction("HAPPY", Reaction::Happy, tokens.next()),
        "SAD" => parse_reaction("SAD", Reaction::Sad, tokens.next()),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_reaction(
    name: &'static str,
    reaction: Reaction,
    token: Option<&str>,
) -> Result<Command<'static>, ProtocolError> {
    let token = token.ok_or(ProtocolError::MissingId(name))?;
    let id = parse_id(token).ok_or_else(|| ProtocolError::InvalidId(token.to_string()))?;
    Ok(Command::React { id, reaction })
}

/// Digits only: `str::parse` would also accept a leading `+`.
fn parse_id(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Execute a parsed command against the store.
pub fn execute(
    command: &Command<'_>,
    sender: &str,
    store: &MessageStore,
) -> Result<BytesMut, ProtocolError> {
    match *command {
        Command::Post { text } => {
            let id = store.post(text, sender);
            Ok(Response::line(format_args!("OK: Message {id} posted.")))
        }
        Command::Get => {
            let messages = store.list();
            if messages.is_empty() {
                return Ok(Response::line(format_args!("Stack is empty.")));
            }
            let mut out = String::new();
            for m in &messages {
                let _ = writeln!(
                    out,
                    "ID: {}, From: {}, Reaction: [{}], Msg: \"{}\"",
                    m.id, m.sender, m.reaction, m.text
                );
            }
            Ok(BytesMut::from(out.as_bytes()))
        }
        Command::React { id, reaction } => {
            if store.react(id, reaction) {
                Ok(Response::line(format_args!("OK: Reaction set for message {id}.")))
            } else {
                Err(ProtocolError::NotFound(id))
            }
        }
    }
}

/// Parse and execute one command line, producing the bytes to send back.
///
/// `line` must already be trimmed and non-empty.
pub fn handle_line(line: &str, sender: &str, store: &MessageStore) -> BytesMut {
    match parse(line).and_then(|command| execute(&command, sender, store)) {
        Ok(response) => response,
        Err(e) => Response::error(&e),
    }
}

/// Response formatting helpers
pub struct Response;

impl Response {
    /// Single newline-terminated line
    pub fn line(args: std::fmt::Arguments<'_>) -> BytesMut {
        let mut out = String::new();
        let _ = out.write_fmt(args);
        out.push('\n');
        BytesMut::from(out.as_bytes())
    }

    /// `ERR: <reason>` line
    pub fn error(e: &ProtocolError) -> BytesMut {
        Self::line(format_args!("ERR: {e}"))
    }
}
