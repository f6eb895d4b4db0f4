//! Room multiplexer: per-tenant subscriber sets and fan-out.
//!
//! Each subscriber owns an unbounded queue; fan-out enqueues per subscriber
//! so delivery is ordered per subscriber and best-effort across them. A
//! subscriber that disconnects drops with all its pending messages; other
//! members are unaffected.

use ov_protocol::ServerMessage;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub type SubscriberId = Uuid;
pub type SubscriberSender = mpsc::UnboundedSender<ServerMessage>;

/// The multicast group name for a tenant.
pub fn room_name(tenant_id: &str) -> String {
    format!("user:{tenant_id}")
}

struct Member {
    tx: SubscriberSender,
    /// Tenant identity for authenticated subscribers; `None` for anonymous
    /// overlay members. Read-only membership either way — mutation checks
    /// happen at the protocol layer.
    auth_tenant: Option<String>,
}

#[derive(Default)]
pub struct Rooms {
    rooms: RwLock<HashMap<String, HashMap<SubscriberId, Member>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Rooms::default()
    }

    /// Add a subscriber to a tenant's room. Re-joining replaces the
    /// existing membership, so repeated joins keep exactly one entry.
    ///
    /// Returns true when the subscriber was not already a member.
    pub async fn join(
        &self,
        tenant_id: &str,
        subscriber_id: SubscriberId,
        tx: SubscriberSender,
        auth_tenant: Option<String>,
    ) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(tenant_id.to_owned()).or_default();
        let fresh = members
            .insert(subscriber_id, Member { tx, auth_tenant })
            .is_none();
        if fresh {
            debug!(room = %room_name(tenant_id), %subscriber_id, "subscriber joined");
        }
        fresh
    }

    /// Drop a subscriber from every room it joined.
    pub async fn leave_all(&self, subscriber_id: SubscriberId) {
        let mut rooms = self.rooms.write().await;
        for members in rooms.values_mut() {
            members.remove(&subscriber_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    /// Relay one message to every member of a tenant's room.
    ///
    /// Members whose queue is gone (receiver dropped) are pruned.
    pub async fn broadcast(&self, tenant_id: &str, message: &ServerMessage) {
        let dead: Vec<SubscriberId> = {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(tenant_id) else {
                return;
            };
            members
                .iter()
                .filter(|(_, m)| m.tx.send(message.clone()).is_err())
                .map(|(id, _)| *id)
                .collect()
        };
        if !dead.is_empty() {
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get_mut(tenant_id) {
                for id in dead {
                    members.remove(&id);
                }
            }
        }
    }

    pub async fn member_count(&self, tenant_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(tenant_id)
            .map_or(0, HashMap::len)
    }

    /// True when the subscriber is an authenticated member of any room.
    pub async fn is_authenticated(&self, subscriber_id: SubscriberId) -> bool {
        self.rooms
            .read()
            .await
            .values()
            .any(|members| {
                members
                    .get(&subscriber_id)
                    .is_some_and(|m| m.auth_tenant.is_some())
            })
    }
}
