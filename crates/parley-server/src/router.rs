//! Message routing: group broadcast, private unicast, roster snapshots,
//! and system notices.
//!
//! Delivered chat frames are stamped with the wall-clock time of formatting
//! and prefixed with the sender. Every routed chat is also reported to the
//! credential gateway's audit sink; audit failure is logged by the gateway
//! and never blocks delivery.

use crate::gateway::CredentialGateway;
use crate::roster::Roster;
use parley_core::{ServerFrame, BROADCAST_TARGET};
use std::sync::Arc;
use tracing::debug;

pub struct Router {
    roster: Arc<Roster>,
    gateway: Arc<dyn CredentialGateway>,
}

impl Router {
    pub fn new(roster: Arc<Roster>, gateway: Arc<dyn CredentialGateway>) -> Self {
        Self { roster, gateway }
    }

    /// Route a chat message to the broadcast audience or a single user.
    ///
    /// Broadcast excludes the sender (the originating client echoes its own
    /// messages locally). A private message to an absent recipient is
    /// reported back to the sender with a local notice.
    pub async fn route(&self, sender: &str, target: &str, text: &str) {
        // Audit first; delivery happens regardless of the outcome.
        self.gateway.record_message(sender, target, text).await;

        let formatted = format_chat(sender, text);
        if target == BROADCAST_TARGET {
            self.roster
                .broadcast_except(sender, ServerFrame::Group(formatted))
                .await;
        } else if !self
            .roster
            .send_to(target, ServerFrame::Private(formatted))
            .await
        {
            debug!(sender, target, "private message to absent recipient");
            self.roster
                .send_to(
                    sender,
                    ServerFrame::Server(format!("User {target} is not available.")),
                )
                .await;
        }
    }

    /// Send the current roster snapshot to one session only.
    pub async fn send_roster_to(&self, username: &str) {
        let names = self.roster.names().await;
        self.roster
            .send_to(username, ServerFrame::Users(names))
            .await;
    }

    /// Push the current roster to every active session.
    pub async fn push_roster_to_all(&self) {
        let names = self.roster.names().await;
        self.roster.broadcast(ServerFrame::Users(names)).await;
    }

    /// Deliver a timestamped system notice to every active session.
    pub async fn broadcast_notice(&self, text: &str) {
        self.roster
            .broadcast(ServerFrame::Server(format_notice(text)))
            .await;
    }
}

/// `[HH:MM:SS] sender: text`
fn format_chat(sender: &str, text: &str) -> String {
    format!("[{}] {sender}: {text}", timestamp())
}

/// `[HH:MM:SS]text`
fn format_notice(text: &str) -> String {
    format!("[{}]{text}", timestamp())
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryCredentials;
    use crate::roster::SessionHandle;
    use tokio::sync::mpsc;

    fn fixture() -> (
        Arc<Roster>,
        Arc<MemoryCredentials>,
        Router,
    ) {
        let roster = Arc::new(Roster::new());
        let gateway = Arc::new(MemoryCredentials::new());
        let router = Router::new(roster.clone(), gateway.clone());
        (roster, gateway, router)
    }

    async fn join(
        roster: &Roster,
        name: &str,
    ) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        roster
            .insert(SessionHandle::new(name.to_string(), tx))
            .await
            .unwrap();
        rx
    }

    fn assert_timestamped(body: &str) {
        // "[HH:MM:SS] ..." — 8 chars between the brackets, two colons.
        assert_eq!(&body[0..1], "[");
        let stamp = &body[1..9];
        assert_eq!(stamp.matches(':').count(), 2);
        assert_eq!(&body[9..10], "]");
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_sender() {
        let (roster, _gateway, router) = fixture();
        let mut rx_a = join(&roster, "alice").await;
        let mut rx_b = join(&roster, "bob").await;
        let mut rx_c = join(&roster, "carol").await;

        router.route("alice", "ALL", "hello").await;

        for rx in [&mut rx_b, &mut rx_c] {
            match rx.recv().await {
                Some(ServerFrame::Group(body)) => {
                    assert_timestamped(&body);
                    assert!(body.ends_with("alice: hello"));
                }
                other => panic!("expected GROUP frame, got {other:?}"),
            }
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn private_delivery_and_audit() {
        let (roster, gateway, router) = fixture();
        let _rx_a = join(&roster, "alice").await;
        let mut rx_b = join(&roster, "bob").await;

        router.route("alice", "bob", "psst").await;

        match rx_b.recv().await {
            Some(ServerFrame::Private(body)) => assert!(body.ends_with("alice: psst")),
            other => panic!("expected PRIVATE frame, got {other:?}"),
        }
        assert_eq!(
            gateway.recorded(),
            vec![("alice".to_string(), "bob".to_string(), "psst".to_string())]
        );
    }

    #[tokio::test]
    async fn absent_recipient_notifies_sender() {
        let (roster, _gateway, router) = fixture();
        let mut rx_a = join(&roster, "alice").await;

        router.route("alice", "ghost", "anyone there?").await;

        match rx_a.recv().await {
            Some(ServerFrame::Server(notice)) => {
                assert_eq!(notice, "User ghost is not available.")
            }
            other => panic!("expected SERVER notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn roster_snapshot_only_to_requester() {
        let (roster, _gateway, router) = fixture();
        let mut rx_a = join(&roster, "alice").await;
        let mut rx_b = join(&roster, "bob").await;

        router.send_roster_to("alice").await;

        assert_eq!(
            rx_a.recv().await,
            Some(ServerFrame::Users(vec!["alice".into(), "bob".into()]))
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn notice_reaches_everyone() {
        let (roster, _gateway, router) = fixture();
        let mut rx_a = join(&roster, "alice").await;
        let mut rx_b = join(&roster, "bob").await;

        router.broadcast_notice("bob has joined the chat.").await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await {
                Some(ServerFrame::Server(body)) => {
                    assert_timestamped(&body);
                    assert!(body.ends_with("bob has joined the chat."));
                }
                other => panic!("expected SERVER frame, got {other:?}"),
            }
        }
    }
}
