use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::fields::SheetField;
use crate::handlers::SharedStorage;
use crate::protocol::{generate_client_id, ClientMessage, ServerMessage};
use crate::registry::{ClientHandle, SheetRegistry};
use crate::storage::{SheetStore, StoreError};

/// Store calls made from the channel must resolve within this window;
/// expiry counts as a persistence failure for the message being handled.
const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the sync channel: the registry plus the sheet store.
#[derive(Clone)]
pub struct SyncState {
    pub registry: SheetRegistry,
    pub storage: SharedStorage,
}

impl SyncState {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            registry: SheetRegistry::new(),
            storage,
        }
    }
}

/// WebSocket upgrade handler for `GET /ws`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<SyncState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection message loop. States: unjoined (no sheet association),
/// joined (edits flow), closed (loop exited, session unregistered).
async fn handle_socket(socket: WebSocket, state: SyncState) {
    let client_id = generate_client_id();
    let (mut sender, mut receiver) = socket.split();

    // Outbound messages funnel through a channel so broadcasts from other
    // connections never contend with this loop for the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let forward_client_id = client_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!("message sender task ended for client {}", forward_client_id);
    });

    debug!("websocket connected: client={}", client_id);

    // The sheet this connection has joined, if any.
    let mut joined: Option<String> = None;

    // Messages are handled one at a time: the next frame is not read until
    // the current one, including its store call, has resolved.
    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(e) => {
                error!("websocket error from client {}: {}", client_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                handle_text_frame(&text, &client_id, &mut joined, &state, &tx).await;
            }
            Message::Close(_) => {
                debug!("close frame from client {}", client_id);
                break;
            }
            // The protocol is text-only; Ping/Pong/Binary frames are ignored.
            _ => {}
        }
    }

    if let Some(uuid) = joined {
        state.registry.unregister(&uuid, &client_id);
        debug!("client {} left sheet {}", client_id, uuid);
    }

    debug!("websocket disconnected: client={}", client_id);
}

/// Parse one text frame and dispatch it. Failures of any kind are reported
/// to the sender as an `error` message and never terminate the connection.
async fn handle_text_frame(
    text: &str,
    client_id: &str,
    joined: &mut Option<String>,
    state: &SyncState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_msg) => {
            if let Err(e) = handle_client_message(client_msg, client_id, joined, state, tx).await {
                error!("error handling message from client {}: {}", client_id, e);
                let _ = tx.send(ServerMessage::Error {
                    message: format!("failed to process message: {}", e),
                });
            }
        }
        Err(e) => {
            warn!("malformed message from client {}: {}", client_id, e);
            let _ = tx.send(ServerMessage::Error {
                message: format!("invalid message format: {}", e),
            });
        }
    }
}

async fn handle_client_message(
    message: ClientMessage,
    client_id: &str,
    joined: &mut Option<String>,
    state: &SyncState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    match message {
        ClientMessage::Join { uuid } => {
            // A second join moves the connection; drop the old association
            // first so no stale registry entry lingers.
            if let Some(prev) = joined.take() {
                state.registry.unregister(&prev, client_id);
            }

            let sheet = match store_call(state.storage.get(&uuid)).await? {
                Some(sheet) => sheet,
                // Unknown UUID: create it with empty defaults so the join
                // always yields a snapshot.
                None => store_call(state.storage.create(&uuid)).await?,
            };

            state.registry.register(
                &uuid,
                ClientHandle {
                    client_id: client_id.to_string(),
                    tx: tx.clone(),
                },
            );
            *joined = Some(uuid.clone());

            tx.send(ServerMessage::Init {
                data: sheet.to_wire(),
            })?;
            debug!("client {} joined sheet {}", client_id, uuid);
        }
        ClientMessage::Update { field, value } => {
            // Edits mean nothing until the connection has joined a sheet.
            let Some(uuid) = joined.as_deref() else {
                warn!("update from client {} before join; ignoring", client_id);
                return Ok(());
            };

            let sheet_field = SheetField::from_wire(&field)?;

            // Persist first. Peers only ever see values the store accepted,
            // so a peer re-reading after a broadcast observes the update.
            store_call(state.storage.update_field(uuid, sheet_field, &value)).await?;

            state
                .registry
                .broadcast_except(uuid, client_id, ServerMessage::Update { field, value });
        }
    }
    Ok(())
}

/// Run a store operation under the channel timeout.
async fn store_call<T>(
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(STORE_CALL_TIMEOUT, op)
        .await
        .map_err(|_| StoreError::Backend("store call timed out".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Sheet, SheetStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        id: String,
        joined: Option<String>,
        tx: mpsc::UnboundedSender<ServerMessage>,
        rx: UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                id: generate_client_id(),
                joined: None,
                tx,
                rx,
            }
        }

        async fn send(&mut self, state: &SyncState, message: ClientMessage) -> Result<()> {
            handle_client_message(message, &self.id, &mut self.joined, state, &self.tx).await
        }

        async fn join(&mut self, state: &SyncState, uuid: &str) {
            self.send(state, ClientMessage::Join { uuid: uuid.into() })
                .await
                .unwrap();
            // consume the init snapshot
            assert!(matches!(
                self.rx.try_recv().unwrap(),
                ServerMessage::Init { .. }
            ));
        }

        async fn frame(&mut self, state: &SyncState, text: &str) {
            handle_text_frame(text, &self.id, &mut self.joined, state, &self.tx).await;
        }

        async fn update(&mut self, state: &SyncState, field: &str, value: &str) -> Result<()> {
            self.send(
                state,
                ClientMessage::Update {
                    field: field.into(),
                    value: value.into(),
                },
            )
            .await
        }
    }

    fn state_with_memory_store() -> SyncState {
        SyncState::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn join_returns_snapshot_with_empty_defaults() {
        let state = state_with_memory_store();
        state.storage.create("r1").await.unwrap();

        let mut c1 = Client::new();
        c1.send(&state, ClientMessage::Join { uuid: "r1".into() })
            .await
            .unwrap();

        match c1.rx.try_recv().unwrap() {
            ServerMessage::Init { data } => {
                assert_eq!(data.len(), SheetField::ALL.len());
                assert!(data.values().all(|v| v.as_str() == Some("")));
            }
            other => panic!("expected init, got {:?}", other),
        }
        assert_eq!(c1.joined.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn join_to_unknown_sheet_creates_it() {
        let state = state_with_memory_store();

        let mut c1 = Client::new();
        c1.join(&state, "fresh").await;

        assert!(state.storage.get("fresh").await.unwrap().is_some());
        assert_eq!(state.registry.client_count("fresh"), 1);
    }

    #[tokio::test]
    async fn update_is_persisted_and_fanned_out_to_peers_only() {
        let state = state_with_memory_store();
        state.storage.create("r1").await.unwrap();

        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c2.join(&state, "r1").await;

        c1.update(&state, "captain", "Kirk").await.unwrap();

        match c2.rx.try_recv().unwrap() {
            ServerMessage::Update { field, value } => {
                assert_eq!(field, "captain");
                assert_eq!(value, "Kirk");
            }
            other => panic!("expected update, got {:?}", other),
        }
        // no self-echo
        assert!(c1.rx.try_recv().is_err());

        let sheet = state.storage.get("r1").await.unwrap().unwrap();
        assert_eq!(sheet.captain, "Kirk");
    }

    #[tokio::test]
    async fn update_does_not_reach_other_sheets() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c2.join(&state, "r2").await;

        c1.update(&state, "captain", "Kirk").await.unwrap();

        assert!(c2.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fan_out_covers_every_other_client() {
        let state = state_with_memory_store();
        let mut clients = Vec::new();
        for _ in 0..4 {
            let mut c = Client::new();
            c.join(&state, "r1").await;
            clients.push(c);
        }

        clients[0].update(&state, "pilot", "Sulu").await.unwrap();

        assert!(clients[0].rx.try_recv().is_err());
        for c in clients.iter_mut().skip(1) {
            assert!(matches!(
                c.rx.try_recv().unwrap(),
                ServerMessage::Update { .. }
            ));
        }
    }

    #[tokio::test]
    async fn unknown_field_is_rejected_without_persistence_or_broadcast() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c2.join(&state, "r1").await;

        let err = c1.update(&state, "warpCoreStatus", "x").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidField(_))
        ));

        assert!(c2.rx.try_recv().is_err());
        let sheet = state.storage.get("r1").await.unwrap().unwrap();
        assert_eq!(sheet, {
            let mut expected = Sheet::new("r1".into());
            expected.created_at = sheet.created_at;
            expected.updated_at = sheet.updated_at;
            expected
        });
    }

    #[tokio::test]
    async fn update_before_join_is_silently_ignored() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();

        c1.update(&state, "captain", "Kirk").await.unwrap();

        assert!(c1.rx.try_recv().is_err());
        assert!(state.storage.get("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejoin_moves_the_registration() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c1.join(&state, "r2").await;
        c2.join(&state, "r1").await;

        assert_eq!(state.registry.client_count("r1"), 1);
        assert_eq!(state.registry.client_count("r2"), 1);

        // an edit on r1 no longer reaches c1
        c2.update(&state, "captain", "Kirk").await.unwrap();
        assert!(c1.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_after_leave_reflects_persisted_edits() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();
        c1.join(&state, "r1").await;
        c1.update(&state, "engineer", "Scotty").await.unwrap();

        // connection closes
        state.registry.unregister("r1", &c1.id);
        assert_eq!(state.registry.client_count("r1"), 0);

        let mut c2 = Client::new();
        c2.send(&state, ClientMessage::Join { uuid: "r1".into() })
            .await
            .unwrap();
        match c2.rx.try_recv().unwrap() {
            ServerMessage::Init { data } => assert_eq!(data["engineer"], "Scotty"),
            other => panic!("expected init, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_reports_error_and_keeps_the_session() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();

        c1.frame(&state, "not json at all").await;
        assert!(matches!(
            c1.rx.try_recv().unwrap(),
            ServerMessage::Error { .. }
        ));

        // a frame missing required attributes is malformed too
        c1.frame(&state, r#"{"type":"update"}"#).await;
        assert!(matches!(
            c1.rx.try_recv().unwrap(),
            ServerMessage::Error { .. }
        ));

        // the connection is still usable afterwards
        c1.frame(&state, r#"{"type":"join","uuid":"r1"}"#).await;
        assert!(matches!(
            c1.rx.try_recv().unwrap(),
            ServerMessage::Init { .. }
        ));
        assert_eq!(state.registry.client_count("r1"), 1);
    }

    #[tokio::test]
    async fn failed_update_is_reported_to_the_sender_only() {
        let state = state_with_memory_store();
        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c2.join(&state, "r1").await;

        c1.frame(
            &state,
            r#"{"type":"update","field":"warpCoreStatus","value":"x"}"#,
        )
        .await;

        match c1.rx.try_recv().unwrap() {
            ServerMessage::Error { message } => {
                assert!(message.contains("warpCoreStatus"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(c2.rx.try_recv().is_err());

        // the sender can keep editing on the same connection
        c1.frame(
            &state,
            r#"{"type":"update","field":"captain","value":"Kirk"}"#,
        )
        .await;
        assert!(c1.rx.try_recv().is_err());
        assert!(matches!(
            c2.rx.try_recv().unwrap(),
            ServerMessage::Update { .. }
        ));
    }

    /// Store double whose writes always fail, for the persist-before-broadcast
    /// contract: no broadcast may happen when persistence does not complete.
    struct BrokenWrites;

    #[async_trait]
    impl SheetStore for BrokenWrites {
        async fn get(&self, uuid: &str) -> Result<Option<Sheet>, StoreError> {
            Ok(Some(Sheet::new(uuid.to_string())))
        }

        async fn create(&self, uuid: &str) -> Result<Sheet, StoreError> {
            Ok(Sheet::new(uuid.to_string()))
        }

        async fn replace(&self, _sheet: Sheet) -> Result<Sheet, StoreError> {
            Err(StoreError::Backend("write refused".into()))
        }

        async fn update_field(
            &self,
            _uuid: &str,
            _field: SheetField,
            _value: &str,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("write refused".into()))
        }
    }

    #[tokio::test]
    async fn persistence_failure_suppresses_the_broadcast() {
        let state = SyncState::new(Arc::new(BrokenWrites));
        let mut c1 = Client::new();
        let mut c2 = Client::new();
        c1.join(&state, "r1").await;
        c2.join(&state, "r1").await;

        let err = c1.update(&state, "captain", "Kirk").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Backend(_))
        ));

        assert!(c2.rx.try_recv().is_err());
    }
}
