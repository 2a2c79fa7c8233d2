use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use hallway_types::events::GatewayEvent;

/// Routes row events to the connections of the users they concern.
/// A user may hold several gateway connections at once (phone and laptop);
/// each gets its own channel.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> [(conn_id, sender)]
    user_channels: RwLock<HashMap<Uuid, Vec<(Uuid, mpsc::UnboundedSender<GatewayEvent>)>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push((conn_id, tx));
        (conn_id, rx)
    }

    /// Drop one connection. Other connections of the same user stay.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.retain(|(id, _)| *id != conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send an event to every connection of one user. Returns how many
    /// connections accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        channels.get(&user_id).map_or(0, |conns| {
            conns
                .iter()
                .filter(|(_, tx)| tx.send(event.clone()).is_ok())
                .count()
        })
    }

    /// Send an event to each listed user once, even if a user appears twice.
    pub async fn publish(&self, event: GatewayEvent, recipients: &[Uuid]) {
        let mut delivered = 0usize;

        for (i, user_id) in recipients.iter().enumerate() {
            if recipients[..i].contains(user_id) {
                continue;
            }
            delivered += self.send_to_user(*user_id, event.clone()).await;
        }

        trace!("{:?} delivered to {} connection(s)", event.table(), delivered);
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}
