use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerMessage;

/// Handle to one connected client: its id and the outbound message channel.
#[derive(Clone)]
pub struct ClientHandle {
    pub client_id: String,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Process-wide map of sheet UUID -> clients currently viewing it.
///
/// Pure in-memory bookkeeping; rebuilt from nothing on restart. A client
/// appears under at most one UUID, and a sheet's entry is dropped as soon as
/// its last client leaves.
#[derive(Clone, Default)]
pub struct SheetRegistry {
    sheets: Arc<DashMap<String, DashMap<String, ClientHandle>>>,
}

impl SheetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, uuid: &str, client: ClientHandle) {
        let clients = self.sheets.entry(uuid.to_string()).or_default();
        clients.insert(client.client_id.clone(), client);
    }

    /// Idempotent; removing an absent client is a silent no-op.
    pub fn unregister(&self, uuid: &str, client_id: &str) {
        if let Some(clients) = self.sheets.get(uuid) {
            clients.remove(client_id);
        }
        // Re-check emptiness under the outer entry lock so a register racing
        // with this cleanup can never have its client swept away.
        if self
            .sheets
            .remove_if(uuid, |_, clients| clients.is_empty())
            .is_some()
        {
            debug!("last client left sheet {}", uuid);
        }
    }

    /// Deliver a message to every client on the sheet except the sender.
    /// A client whose channel is already closed is skipped; there is no
    /// buffering or retry.
    pub fn broadcast_except(&self, uuid: &str, sender_id: &str, message: ServerMessage) {
        if let Some(clients) = self.sheets.get(uuid) {
            for client in clients.iter() {
                if client.client_id != sender_id {
                    let _ = client.tx.send(message.clone());
                }
            }
        }
    }

    pub fn client_count(&self, uuid: &str) -> usize {
        self.sheets.get(uuid).map(|c| c.len()).unwrap_or(0)
    }
}
