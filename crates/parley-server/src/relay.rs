//! File relay: allowlist validation, persistence, and forwarding.

use crate::gateway::CredentialGateway;
use crate::roster::Roster;
use crate::store::FileStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parley_core::{ServerFrame, BROADCAST_TARGET};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct FileRelay {
    roster: Arc<Roster>,
    store: Arc<dyn FileStore>,
    gateway: Arc<dyn CredentialGateway>,
    allowed_extensions: Vec<String>,
}

impl FileRelay {
    pub fn new(
        roster: Arc<Roster>,
        store: Arc<dyn FileStore>,
        gateway: Arc<dyn CredentialGateway>,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            roster,
            store,
            gateway,
            allowed_extensions,
        }
    }

    /// Validate, persist, and forward one file transfer.
    ///
    /// Rejections (broadcast target, extension outside the allowlist,
    /// undecodable payload) and an absent recipient all produce a local
    /// notice to the sender; none of them end the session.
    pub async fn handle(&self, sender: &str, recipient: &str, filename: &str, data_b64: &str) {
        if recipient == BROADCAST_TARGET {
            self.notify(sender, "Files must be sent to a specific user.")
                .await;
            return;
        }

        if !self.extension_allowed(filename) {
            self.notify(sender, &format!("Unsupported file type for file {filename}"))
                .await;
            return;
        }

        let payload = match BASE64.decode(data_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(sender, filename, error = %e, "undecodable file payload");
                self.notify(sender, &format!("Unreadable file data for {filename}"))
                    .await;
                return;
            }
        };

        if let Err(e) = self.store.save(filename, &payload).await {
            warn!(filename, error = %e, "file persistence failed");
            self.notify(sender, &format!("Failed to save file {filename}"))
                .await;
            return;
        }

        self.gateway
            .record_message(sender, recipient, filename)
            .await;

        let forwarded = self
            .roster
            .send_to(
                recipient,
                ServerFrame::File {
                    sender: sender.to_string(),
                    filename: filename.to_string(),
                    data_b64: data_b64.to_string(),
                },
            )
            .await;

        if forwarded {
            debug!(sender, recipient, filename, "file forwarded");
        } else {
            self.notify(
                sender,
                &format!("User {recipient} is not available for file transfer."),
            )
            .await;
        }
    }

    fn extension_allowed(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            }
            _ => false,
        }
    }

    async fn notify(&self, username: &str, text: &str) {
        self.roster
            .send_to(username, ServerFrame::Server(text.to_string()))
            .await;
    }
}
