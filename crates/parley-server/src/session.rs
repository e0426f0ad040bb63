//! Per-connection transport plumbing and the active-session read loop.
//!
//! A [`Connection`] wraps one accepted TCP stream: a buffered read half for
//! line-delimited input and a write half for outbound frames. During the
//! handshake and while queued the connection is driven directly; once
//! admitted it is split, the write half moves into a writer task fed by the
//! roster handle's channel, and the read half drives [`read_loop`].

use crate::server::Shared;
use parley_core::{Command, ParleyResult, ServerFrame};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// One client connection, owned by the task driving it.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer,
        }
    }

    /// Read the next line, with the delimiter trimmed. `None` on EOF.
    pub async fn read_line(&mut self) -> ParleyResult<Option<String>> {
        next_line(&mut self.reader).await
    }

    /// Write one frame as a line.
    pub async fn send(&mut self, frame: &ServerFrame) -> ParleyResult<()> {
        write_frame(&mut self.writer, frame).await
    }

    /// Split into the halves used by an admitted session.
    pub fn into_parts(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Read one line from a buffered read half, trimming the delimiter.
pub async fn next_line(reader: &mut BufReader<OwnedReadHalf>) -> ParleyResult<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Write one frame followed by the line delimiter.
pub async fn write_frame(writer: &mut OwnedWriteHalf, frame: &ServerFrame) -> ParleyResult<()> {
    let mut line = frame.to_line();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// The active-session read loop: decode one command per line and dispatch.
///
/// Returns when the client sends `QUIT`, closes the connection, or the read
/// fails. Malformed commands produce a local notice and the loop continues;
/// they never end the session.
pub async fn read_loop(shared: &Shared, username: &str, reader: &mut BufReader<OwnedReadHalf>) {
    loop {
        let line = match next_line(reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(username, "session read loop ended (peer closed)");
                break;
            }
            Err(e) => {
                debug!(username, error = %e, "session read loop ended");
                break;
            }
        };

        if line.is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Msg { recipient, text }) => {
                shared.router.route(username, &recipient, &text).await;
            }
            Ok(Command::Users) => {
                shared.router.send_roster_to(username).await;
            }
            Ok(Command::File {
                recipient,
                filename,
                data_b64,
            }) => {
                shared
                    .relay
                    .handle(username, &recipient, &filename, &data_b64)
                    .await;
            }
            Ok(Command::Quit) => {
                debug!(username, "session quit");
                break;
            }
            Err(e) => {
                shared
                    .roster
                    .send_to(username, ServerFrame::Server(e.to_string()))
                    .await;
            }
        }
    }
}
