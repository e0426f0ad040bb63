//! Connection admission: the bounded-concurrency gate and its FIFO
//! waiting queue.
//!
//! At most `max_active` sessions hold a slot at any time. Authenticated
//! connections that miss a slot wait in arrival order; the queue and the
//! slot counter live under one lock because promotion touches both. The
//! roster has its own lock and is never held at the same time as this one.

use crate::session::Connection;
use parley_core::ServerFrame;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// An authenticated connection waiting for a slot.
pub struct WaitingEntry {
    pub username: String,
    pub conn: Connection,
    pub enqueued_at: Instant,
}

impl WaitingEntry {
    pub fn new(username: String, conn: Connection) -> Self {
        Self {
            username,
            conn,
            enqueued_at: Instant::now(),
        }
    }
}

/// Outcome of an admission attempt.
pub enum AdmitOutcome {
    /// A slot was acquired; the caller builds and registers the session.
    Admitted(WaitingEntry),
    /// No slot free; the entry joined the queue at this 1-based position.
    Queued(usize),
}

struct GateState {
    /// Free slots, `0..=max_active`.
    available: usize,
    queue: VecDeque<WaitingEntry>,
}

/// Bounded counting gate plus FIFO waiting queue.
pub struct AdmissionGate {
    state: Mutex<GateState>,
}

impl AdmissionGate {
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: max_active,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Try to acquire a slot without blocking.
    ///
    /// On failure the entry joins the tail of the queue and immediately
    /// receives its first wait estimate; a failed write drops the entry on
    /// the spot.
    pub async fn try_admit(&self, mut entry: WaitingEntry) -> AdmitOutcome {
        let mut state = self.state.lock().await;
        if state.available > 0 {
            state.available -= 1;
            return AdmitOutcome::Admitted(entry);
        }

        let position = state.queue.len() + 1;
        info!(username = %entry.username, position, "server full, queueing connection");
        if entry
            .conn
            .send(&ServerFrame::Waiting(estimate_minutes(position)))
            .await
            .is_err()
        {
            debug!(username = %entry.username, "connection died while enqueueing");
            return AdmitOutcome::Queued(position);
        }
        state.queue.push_back(entry);
        AdmitOutcome::Queued(position)
    }

    /// Release a slot after session teardown; called exactly once per
    /// session.
    ///
    /// If anyone is waiting the head of the queue is popped and returned —
    /// its promotion keeps the slot, so the counter is untouched. The
    /// caller runs the popped entry through the same registration and
    /// broadcast path as an immediate admission.
    pub async fn release(&self) -> Option<WaitingEntry> {
        let mut state = self.state.lock().await;
        match state.queue.pop_front() {
            Some(entry) => {
                info!(username = %entry.username, "promoting queued connection");
                Some(entry)
            }
            None => {
                state.available += 1;
                None
            }
        }
    }

    /// Periodic wait-time refresh: push an updated estimate to every
    /// waiting connection in queue order, pruning entries whose connection
    /// is dead. Pruning never promotes.
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            return;
        }
        debug!(waiting = state.queue.len(), "refreshing wait estimates");

        let mut dead = Vec::new();
        for (idx, entry) in state.queue.iter_mut().enumerate() {
            let frame = ServerFrame::Waiting(estimate_minutes(idx + 1));
            if entry.conn.send(&frame).await.is_err() {
                info!(username = %entry.username, "client disconnected while waiting");
                dead.push(idx);
            }
        }
        for idx in dead.into_iter().rev() {
            state.queue.remove(idx);
        }
    }

    /// Whether a username is currently queued. Used by the handshake to
    /// reject re-submission while the first attempt is still waiting.
    pub async fn is_waiting(&self, username: &str) -> bool {
        let state = self.state.lock().await;
        state.queue.iter().any(|e| e.username == username)
    }

    /// Number of queued connections.
    pub async fn waiting_count(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

/// Two minutes per position ahead of you, 1-based.
fn estimate_minutes(position: usize) -> u64 {
    (position as u64) * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Server-side connection plus the client end to observe writes.
    async fn conn_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Connection::new(server, peer), client)
    }

    async fn entry(name: &str) -> (WaitingEntry, TcpStream) {
        let (conn, client) = conn_pair().await;
        (WaitingEntry::new(name.to_string(), conn), client)
    }

    async fn read_client_line(client: TcpStream) -> String {
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn admits_up_to_capacity_then_queues() {
        let gate = AdmissionGate::new(2);

        let (e1, _c1) = entry("a").await;
        let (e2, _c2) = entry("b").await;
        let (e3, c3) = entry("c").await;

        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        assert!(matches!(gate.try_admit(e2).await, AdmitOutcome::Admitted(_)));
        match gate.try_admit(e3).await {
            AdmitOutcome::Queued(position) => assert_eq!(position, 1),
            AdmitOutcome::Admitted(_) => panic!("third connection should queue"),
        }

        // Enqueueing pushes the first estimate right away.
        assert_eq!(read_client_line(c3).await, "WAITING:2 minutes");
        assert_eq!(gate.waiting_count().await, 1);
    }

    #[tokio::test]
    async fn release_promotes_fifo_head() {
        let gate = AdmissionGate::new(1);

        let (e1, _c1) = entry("a").await;
        let (e2, _c2) = entry("b").await;
        let (e3, _c3) = entry("c").await;

        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        gate.try_admit(e2).await;
        gate.try_admit(e3).await;

        let first = gate.release().await.expect("head promoted");
        assert_eq!(first.username, "b");
        let second = gate.release().await.expect("next promoted");
        assert_eq!(second.username, "c");

        // Queue drained — now the slot really frees up.
        assert!(gate.release().await.is_none());
        let (e4, _c4) = entry("d").await;
        assert!(matches!(gate.try_admit(e4).await, AdmitOutcome::Admitted(_)));
    }

    #[tokio::test]
    async fn promotion_does_not_grow_capacity() {
        // One slot, one waiter: releasing hands the slot to the waiter,
        // so a fresh connection still queues.
        let gate = AdmissionGate::new(1);

        let (e1, _c1) = entry("a").await;
        let (e2, _c2) = entry("b").await;
        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        gate.try_admit(e2).await;

        assert!(gate.release().await.is_some());

        let (e3, _c3) = entry("c").await;
        assert!(matches!(gate.try_admit(e3).await, AdmitOutcome::Queued(1)));
    }

    #[tokio::test]
    async fn tick_updates_positions_in_order() {
        let gate = AdmissionGate::new(1);

        let (e1, _c1) = entry("a").await;
        let (e2, c2) = entry("b").await;
        let (e3, c3) = entry("c").await;

        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        gate.try_admit(e2).await;
        gate.try_admit(e3).await;

        gate.tick().await;

        // Initial estimate on enqueue, then the tick's refresh.
        let mut r2 = BufReader::new(c2);
        let mut line = String::new();
        r2.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "WAITING:2 minutes");
        line.clear();
        r2.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "WAITING:2 minutes");

        let mut r3 = BufReader::new(c3);
        line.clear();
        r3.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "WAITING:4 minutes");
        line.clear();
        r3.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "WAITING:4 minutes");
    }

    #[tokio::test]
    async fn tick_prunes_dead_waiters_without_promotion() {
        let gate = AdmissionGate::new(1);

        let (e1, _c1) = entry("a").await;
        let (e2, c2) = entry("b").await;
        let (e3, _c3) = entry("c").await;

        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        gate.try_admit(e2).await;
        gate.try_admit(e3).await;

        // b disconnects while waiting.
        drop(c2);

        // One tick fills the send buffer error path; a second tick observes
        // the broken pipe. Two are enough on loopback.
        gate.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        gate.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        gate.tick().await;

        assert!(!gate.is_waiting("b").await);
        assert!(gate.is_waiting("c").await);
    }

    #[tokio::test]
    async fn is_waiting_sees_queued_usernames() {
        let gate = AdmissionGate::new(1);
        let (e1, _c1) = entry("a").await;
        let (e2, _c2) = entry("b").await;

        assert!(matches!(gate.try_admit(e1).await, AdmitOutcome::Admitted(_)));
        gate.try_admit(e2).await;

        assert!(gate.is_waiting("b").await);
        assert!(!gate.is_waiting("a").await);
    }
}
