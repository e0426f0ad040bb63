//! parley — line-mode client for the parley chat relay.
//!
//! Connects, authenticates, then bridges stdin lines to relay commands and
//! prints incoming frames. Received files are decoded into a downloads
//! directory. No message history is kept; this is a thin test/debug surface
//! over the wire protocol.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use parley_core::{Command, ServerFrame};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// parley — chat relay client
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Line-mode client for the parley chat relay")]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 9876)]
    port: u16,

    /// Username to log in as
    username: String,

    /// Secret for the username
    #[arg(short, long)]
    secret: String,

    /// Directory for received files
    #[arg(long, default_value = "downloads")]
    downloads: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    /// Ready-to-send relay command.
    Command(Command),
    /// `/send <user> <path>` — read and encode a local file first.
    SendFile { recipient: String, path: String },
    Quit,
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if !line.starts_with('/') {
        // Bare text goes to everyone.
        return Input::Command(Command::Msg {
            recipient: parley_core::BROADCAST_TARGET.to_string(),
            text: line.to_string(),
        });
    }

    let mut parts = line.splitn(3, ' ');
    let verb = parts.next().unwrap_or_default();
    match verb {
        "/msg" => match (parts.next(), parts.next()) {
            (Some(user), Some(text)) => Input::Command(Command::Msg {
                recipient: user.to_string(),
                text: text.to_string(),
            }),
            _ => Input::Invalid("usage: /msg <user> <text>".into()),
        },
        "/send" => match (parts.next(), parts.next()) {
            (Some(user), Some(path)) => Input::SendFile {
                recipient: user.to_string(),
                path: path.to_string(),
            },
            _ => Input::Invalid("usage: /send <user> <path>".into()),
        },
        "/users" => Input::Command(Command::Users),
        "/quit" => Input::Quit,
        other => Input::Invalid(format!("unknown command: {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let addr = format!("{}:{}", cli.host, cli.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut server_lines = BufReader::new(read_half).lines();

    // Handshake: WELCOME, then credentials.
    let greeting = server_lines
        .next_line()
        .await?
        .context("server closed before greeting")?;
    if ServerFrame::parse(&greeting)? != ServerFrame::Welcome {
        bail!("unexpected greeting: {greeting}");
    }
    write_half
        .write_all(format!("{}:{}\n", cli.username, cli.secret).as_bytes())
        .await?;

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    println!("connected to {addr} as {} — /msg /send /users /quit", cli.username);

    loop {
        tokio::select! {
            line = server_lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_frame(&line, &cli.downloads).await? {
                            break;
                        }
                    }
                    None => {
                        println!("server closed the connection");
                        break;
                    }
                }
            }

            line = stdin_lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_input(&line) {
                    Input::Command(cmd) => {
                        write_half
                            .write_all(format!("{}\n", cmd.to_line()).as_bytes())
                            .await?;
                    }
                    Input::SendFile { recipient, path } => {
                        match encode_file(&path).await {
                            Ok((filename, data_b64)) => {
                                let cmd = Command::File { recipient, filename, data_b64 };
                                write_half
                                    .write_all(format!("{}\n", cmd.to_line()).as_bytes())
                                    .await?;
                            }
                            Err(e) => println!("cannot send {path}: {e}"),
                        }
                    }
                    Input::Quit => {
                        write_half.write_all(b"QUIT\n").await?;
                        break;
                    }
                    Input::Invalid(reason) => println!("{reason}"),
                }
            }
        }
    }

    Ok(())
}

/// Render one server frame. Returns `false` when the session is over.
async fn handle_frame(line: &str, downloads: &Path) -> Result<bool> {
    match ServerFrame::parse(line) {
        Ok(ServerFrame::Connected) => println!("* connected"),
        Ok(ServerFrame::Waiting(minutes)) => {
            println!("* server full — estimated wait {minutes} minutes")
        }
        Ok(ServerFrame::Error(reason)) => {
            println!("! {reason}");
            return Ok(false);
        }
        Ok(ServerFrame::Group(body)) => println!("{body}"),
        Ok(ServerFrame::Private(body)) => println!("(private) {body}"),
        Ok(ServerFrame::Server(body)) => println!("* {body}"),
        Ok(ServerFrame::Users(names)) => println!("* online: {}", names.join(", ")),
        Ok(ServerFrame::File {
            sender,
            filename,
            data_b64,
        }) => match save_file(downloads, &filename, &data_b64).await {
            Ok(path) => println!("* {sender} sent {filename} — saved to {}", path.display()),
            Err(e) => {
                warn!(filename, error = %e, "could not save received file");
                println!("* {sender} sent {filename} — save failed: {e}");
            }
        },
        Ok(ServerFrame::Welcome) => debug!("stray WELCOME after handshake"),
        Err(e) => debug!(error = %e, "unparseable frame"),
    }
    Ok(true)
}

/// Read and base64-encode a local file for a `FILE:` command.
async fn encode_file(path: &str) -> Result<(String, String)> {
    let filename = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no filename")?
        .to_string();
    let bytes = tokio::fs::read(path).await?;
    Ok((filename, BASE64.encode(bytes)))
}

/// Decode a received payload into the downloads directory.
async fn save_file(downloads: &Path, filename: &str, data_b64: &str) -> Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .context("unusable filename")?;
    let bytes = BASE64.decode(data_b64).context("undecodable payload")?;
    tokio::fs::create_dir_all(downloads).await?;
    let path = downloads.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_text_broadcasts() {
        assert_eq!(
            parse_input("hello everyone"),
            Input::Command(Command::Msg {
                recipient: "ALL".into(),
                text: "hello everyone".into()
            })
        );
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            parse_input("/msg bob see you at: noon"),
            Input::Command(Command::Msg {
                recipient: "bob".into(),
                text: "see you at: noon".into()
            })
        );
        assert_eq!(parse_input("/users"), Input::Command(Command::Users));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(
            parse_input("/send bob notes.docx"),
            Input::SendFile {
                recipient: "bob".into(),
                path: "notes.docx".into()
            }
        );
    }

    #[test]
    fn invalid_inputs() {
        assert!(matches!(parse_input("/msg bob"), Input::Invalid(_)));
        assert!(matches!(parse_input("/send bob"), Input::Invalid(_)));
        assert!(matches!(parse_input("/nope"), Input::Invalid(_)));
    }
}
