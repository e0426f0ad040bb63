//! Core server: accepts connections, runs the handshake, and coordinates
//! admission, session lifecycle, and promotion.
//!
//! One task per accepted connection runs the handshake and, if admitted,
//! the session read loop. A single periodic task drives the admission
//! gate's wait-time refresh.

use crate::admission::{AdmissionGate, AdmitOutcome, WaitingEntry};
use crate::config::ServerConfig;
use crate::gateway::CredentialGateway;
use crate::relay::FileRelay;
use crate::roster::{Roster, SessionHandle};
use crate::router::Router;
use crate::session::{self, Connection};
use crate::store::FileStore;
use parley_core::{Credentials, ParleyResult, ServerFrame};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared relay state threaded through every connection task.
pub struct Shared {
    pub roster: Arc<Roster>,
    pub gate: Arc<AdmissionGate>,
    pub router: Arc<Router>,
    pub relay: Arc<FileRelay>,
    pub gateway: Arc<dyn CredentialGateway>,
}

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    shared: Arc<Shared>,
}

impl RelayServer {
    /// Assemble a server from its configuration and collaborators.
    pub fn new(
        config: ServerConfig,
        gateway: Arc<dyn CredentialGateway>,
        store: Arc<dyn FileStore>,
    ) -> Self {
        let roster = Arc::new(Roster::new());
        let gate = Arc::new(AdmissionGate::new(config.max_active));
        let router = Arc::new(Router::new(roster.clone(), gateway.clone()));
        let relay = Arc::new(FileRelay::new(
            roster.clone(),
            store,
            gateway.clone(),
            config.allowed_extensions.clone(),
        ));

        Self {
            config,
            shared: Arc::new(Shared {
                roster,
                gate,
                router,
                relay,
                gateway,
            }),
        }
    }

    /// Bind the listen socket from the configured port.
    pub async fn bind(&self) -> ParleyResult<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self, listener: TcpListener) -> ParleyResult<()> {
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            max_active = self.config.max_active,
            "parley-server ready"
        );

        // Periodic wait-time refresh for queued connections.
        let tick_gate = self.shared.gate.clone();
        let tick_interval = std::time::Duration::from_secs(self.config.wait_tick_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                tick_gate.tick().await;
            }
        });

        loop {
            let (stream, peer) = listener.accept().await?;
            let shared = self.shared.clone();
            tokio::spawn(async move {
                handle_connection(shared, stream, peer).await;
            });
        }
    }
}

/// Run the handshake for one raw connection, then admit or enqueue it.
///
/// Handshake failures (malformed line, duplicate username, bad credentials)
/// are fatal to the attempt: an `ERROR:` frame goes out and the socket is
/// closed; the connection never reaches the roster or the waiting queue.
async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: std::net::SocketAddr) {
    debug!(peer = %peer, "incoming connection");
    let mut conn = Connection::new(stream, peer);

    if conn.send(&ServerFrame::Welcome).await.is_err() {
        return;
    }

    let line = match conn.read_line().await {
        Ok(Some(line)) => line,
        Ok(None) | Err(_) => {
            debug!(peer = %peer, "connection closed during handshake");
            return;
        }
    };

    let creds = match Credentials::parse(&line) {
        Ok(creds) => creds,
        Err(_) => {
            let _ = conn
                .send(&ServerFrame::Error("Invalid credentials format".into()))
                .await;
            return;
        }
    };

    // A username may be active or queued, never both — and never twice.
    if shared.roster.contains(&creds.username).await
        || shared.gate.is_waiting(&creds.username).await
    {
        warn!(peer = %peer, username = %creds.username, "duplicate login rejected");
        let _ = conn
            .send(&ServerFrame::Error("User already logged in".into()))
            .await;
        return;
    }

    if !shared
        .gateway
        .authenticate(&creds.username, &creds.secret)
        .await
    {
        warn!(peer = %peer, username = %creds.username, "authentication failed");
        let _ = conn
            .send(&ServerFrame::Error("Invalid username or password".into()))
            .await;
        return;
    }

    let entry = WaitingEntry::new(creds.username, conn);
    match shared.gate.try_admit(entry).await {
        AdmitOutcome::Admitted(entry) => start_session(shared, entry).await,
        AdmitOutcome::Queued(position) => {
            debug!(position, "connection queued");
        }
    }
}

/// Build and register a session for an admitted connection, then start its
/// read loop. Promotion after a release runs through here as well, so a
/// promoted client goes through the same registration and broadcast path
/// as an immediate admission.
///
/// Returns a boxed future: teardown recurses back into session start when
/// it promotes, and the concrete return type keeps that cycle spawnable.
pub fn start_session(
    shared: Arc<Shared>,
    entry: WaitingEntry,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let WaitingEntry { username, conn, .. } = entry;
        let (mut reader, mut writer) = conn.into_parts();

        let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
        let handle = SessionHandle::new(username.clone(), tx);

        if let Err(e) = shared.roster.insert(handle).await {
            // Handshake pre-checks make this unreachable in practice; give
            // the slot back rather than leak it.
            warn!(username = %username, error = %e, "roster registration failed");
            let _ = session::write_frame(
                &mut writer,
                &ServerFrame::Error("User already logged in".into()),
            )
            .await;
            if let Some(next) = shared.gate.release().await {
                start_session(shared, next).await;
            }
            return;
        }

        // Writer task: drains the outbound channel in order; exits when the
        // channel closes (roster removal) or the peer stops reading.
        let writer_username = username.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if session::write_frame(&mut writer, &frame).await.is_err() {
                    debug!(username = %writer_username, "outbound write failed");
                    break;
                }
            }
        });

        shared
            .roster
            .send_to(&username, ServerFrame::Connected)
            .await;
        info!(username = %username, "session admitted");

        shared
            .router
            .broadcast_notice(&format!("{username} has joined the chat."))
            .await;
        shared.router.push_roster_to_all().await;

        tokio::spawn(async move {
            session::read_loop(&shared, &username, &mut reader).await;
            teardown(shared, username).await;
        });
    })
}

/// Session teardown, run exactly once per admitted session on every
/// termination path: remove from the roster first, then release the slot,
/// then announce. The remove-before-release ordering keeps the roster at or
/// under capacity even while a promotion is in flight.
async fn teardown(shared: Arc<Shared>, username: String) {
    shared.roster.remove(&username).await;
    let promoted = shared.gate.release().await;

    shared
        .router
        .broadcast_notice(&format!("{username} has left the chat."))
        .await;
    shared.router.push_roster_to_all().await;
    info!(username = %username, "session closed");

    if let Some(next) = promoted {
        start_session(shared, next).await;
    }
}
