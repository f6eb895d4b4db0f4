//! Chat protocol support: IRC parsing, command vocabulary, outbound rate
//! limiting, and the per-tenant chat session.

pub mod commands;
pub mod irc;
pub mod rate_limit;
pub mod session;

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

/// Registry of outbound chat queues, one per connected tenant session.
///
/// The dispatcher and lifecycle controller push through this without
/// holding a session handle; a tenant with no connected session drops the
/// message (chat echo is best-effort).
#[derive(Default)]
pub struct ChatOutbox {
    senders: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl ChatOutbox {
    pub fn new() -> Self {
        ChatOutbox::default()
    }

    pub async fn register(&self, tenant_id: &str, tx: mpsc::UnboundedSender<String>) {
        self.senders.write().await.insert(tenant_id.to_owned(), tx);
    }

    pub async fn unregister(&self, tenant_id: &str) {
        self.senders.write().await.remove(tenant_id);
    }

    pub async fn is_connected(&self, tenant_id: &str) -> bool {
        self.senders.read().await.contains_key(tenant_id)
    }

    /// Queue a message into the tenant's channel. Returns false when no
    /// session is connected.
    pub async fn send(&self, tenant_id: &str, text: impl Into<String>) -> bool {
        let senders = self.senders.read().await;
        match senders.get(tenant_id) {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => {
                debug!(tenant_id, "chat echo dropped, no session connected");
                false
            }
        }
    }
}
