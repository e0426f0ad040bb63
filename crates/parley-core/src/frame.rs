//! Line-delimited wire protocol for the parley relay.
//!
//! Every unit on the wire is one line, tagged with a type prefix.
//! Client → server lines are [`Command`]s; server → client lines are
//! [`ServerFrame`]s. File payloads travel base64-encoded inside a text
//! line, so lines never contain the delimiter inside unescaped fields.

use crate::error::{ParleyError, ParleyResult};

/// Reserved recipient token meaning "every other active session".
pub const BROADCAST_TARGET: &str = "ALL";

/// Credentials presented on the handshake line as `<username>:<secret>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    /// Parse the handshake line. The secret may itself contain colons.
    pub fn parse(line: &str) -> ParleyResult<Self> {
        let mut parts = line.splitn(2, ':');
        let username = parts.next().unwrap_or_default();
        let secret = parts
            .next()
            .ok_or_else(|| ParleyError::MalformedHandshake("expected <username>:<secret>".into()))?;

        if username.is_empty() {
            return Err(ParleyError::MalformedHandshake("empty username".into()));
        }

        Ok(Self {
            username: username.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// A command decoded from one client → server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `MSG:<recipient|ALL>:<text>` — chat message.
    Msg { recipient: String, text: String },
    /// `USERS` — request a roster snapshot.
    Users,
    /// `FILE:<recipient>:<filename>:<base64>` — file transfer.
    File {
        recipient: String,
        filename: String,
        data_b64: String,
    },
    /// `QUIT` — graceful termination.
    Quit,
}

impl Command {
    /// Decode one line into a command.
    ///
    /// Lines with a known tag but the wrong field count are errors; the
    /// session reports them to the sender and keeps running. Unknown tags
    /// are errors too.
    pub fn parse(line: &str) -> ParleyResult<Self> {
        if line == "USERS" {
            return Ok(Command::Users);
        }
        if line == "QUIT" {
            return Ok(Command::Quit);
        }

        if let Some(rest) = line.strip_prefix("MSG:") {
            let mut parts = rest.splitn(2, ':');
            let recipient = parts.next().unwrap_or_default();
            let text = parts
                .next()
                .ok_or_else(|| ParleyError::MalformedCommand("MSG needs <recipient>:<text>".into()))?;
            if recipient.is_empty() {
                return Err(ParleyError::MalformedCommand("MSG with empty recipient".into()));
            }
            return Ok(Command::Msg {
                recipient: recipient.to_string(),
                text: text.to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix("FILE:") {
            let mut parts = rest.splitn(3, ':');
            let recipient = parts.next().unwrap_or_default();
            let filename = parts.next().unwrap_or_default();
            let data = parts.next().ok_or_else(|| {
                ParleyError::MalformedCommand("FILE needs <recipient>:<filename>:<base64>".into())
            })?;
            if recipient.is_empty() || filename.is_empty() {
                return Err(ParleyError::MalformedCommand(
                    "FILE with empty recipient or filename".into(),
                ));
            }
            return Ok(Command::File {
                recipient: recipient.to_string(),
                filename: filename.to_string(),
                data_b64: data.to_string(),
            });
        }

        Err(ParleyError::MalformedCommand(format!(
            "unrecognized line: {}",
            truncate(line, 32)
        )))
    }

    /// Encode the command as one wire line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            Command::Msg { recipient, text } => format!("MSG:{recipient}:{text}"),
            Command::Users => "USERS".to_string(),
            Command::File {
                recipient,
                filename,
                data_b64,
            } => format!("FILE:{recipient}:{filename}:{data_b64}"),
            Command::Quit => "QUIT".to_string(),
        }
    }
}

/// A frame delivered on one server → client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// First line of the handshake.
    Welcome,
    /// Sent once the connection is admitted and registered.
    Connected,
    /// Estimated wait in minutes, repeated while queued.
    Waiting(u64),
    /// Fatal handshake error; the server closes the socket afterwards.
    Error(String),
    /// Broadcast chat, already formatted with timestamp and sender.
    Group(String),
    /// Private chat, already formatted with timestamp and sender.
    Private(String),
    /// System notice (joins, departures, local error notices).
    Server(String),
    /// Roster snapshot, comma-joined usernames.
    Users(Vec<String>),
    /// Forwarded file transfer.
    File {
        sender: String,
        filename: String,
        data_b64: String,
    },
}

impl ServerFrame {
    /// Encode the frame as one wire line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            ServerFrame::Welcome => "WELCOME".to_string(),
            ServerFrame::Connected => "CONNECTED".to_string(),
            ServerFrame::Waiting(minutes) => format!("WAITING:{minutes} minutes"),
            ServerFrame::Error(reason) => format!("ERROR:{reason}"),
            ServerFrame::Group(text) => format!("GROUP:{text}"),
            ServerFrame::Private(text) => format!("PRIVATE:{text}"),
            ServerFrame::Server(text) => format!("SERVER:{text}"),
            ServerFrame::Users(names) => format!("USERS:{}", names.join(",")),
            ServerFrame::File {
                sender,
                filename,
                data_b64,
            } => format!("FILE:{sender}:{filename}:{data_b64}"),
        }
    }

    /// Decode one line into a frame. Used by the client and by tests.
    pub fn parse(line: &str) -> ParleyResult<Self> {
        if line == "WELCOME" {
            return Ok(ServerFrame::Welcome);
        }
        if line == "CONNECTED" {
            return Ok(ServerFrame::Connected);
        }
        if let Some(rest) = line.strip_prefix("WAITING:") {
            let minutes = rest
                .strip_suffix(" minutes")
                .unwrap_or(rest)
                .parse::<u64>()
                .map_err(|_| ParleyError::MalformedCommand(format!("bad WAITING line: {rest}")))?;
            return Ok(ServerFrame::Waiting(minutes));
        }
        if let Some(rest) = line.strip_prefix("ERROR:") {
            return Ok(ServerFrame::Error(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("GROUP:") {
            return Ok(ServerFrame::Group(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("PRIVATE:") {
            return Ok(ServerFrame::Private(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("SERVER:") {
            return Ok(ServerFrame::Server(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("USERS:") {
            let names = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(',').map(|s| s.to_string()).collect()
            };
            return Ok(ServerFrame::Users(names));
        }
        if let Some(rest) = line.strip_prefix("FILE:") {
            let mut parts = rest.splitn(3, ':');
            let sender = parts.next().unwrap_or_default();
            let filename = parts.next().unwrap_or_default();
            let data = parts.next().ok_or_else(|| {
                ParleyError::MalformedCommand("FILE frame needs <sender>:<filename>:<base64>".into())
            })?;
            return Ok(ServerFrame::File {
                sender: sender.to_string(),
                filename: filename.to_string(),
                data_b64: data.to_string(),
            });
        }

        Err(ParleyError::MalformedCommand(format!(
            "unrecognized frame: {}",
            truncate(line, 32)
        )))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
