//! Event bus and WebSocket fan-out
//!
//! Services publish a [`DomainEvent`] after every committed change. WebSocket
//! clients receive every event until they subscribe to specific entity ids.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

/// Kind of record an event refers to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Engagement,
    Message,
    Activation,
    Withdrawal,
}

/// Notification that a record changed
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DomainEvent {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Status after the change, e.g. `negotiating` or `approved`
    pub state: String,
    /// Engagement the entity belongs to, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement_id: Option<Uuid>,
}

impl DomainEvent {
    pub fn new(entity_type: EntityKind, entity_id: Uuid, state: impl ToString) -> Self {
        Self {
            entity_type,
            entity_id,
            state: state.to_string(),
            engagement_id: None,
        }
    }

    pub fn for_engagement(mut self, engagement_id: Uuid) -> Self {
        self.engagement_id = Some(engagement_id);
        self
    }

    fn concerns(&self, ids: &[Uuid]) -> bool {
        ids.contains(&self.entity_id)
            || self.engagement_id.map_or(false, |id| ids.contains(&id))
    }
}

/// Broadcast bus shared by services and WebSocket connections
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
    /// Connected clients registry
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub subscribed_ids: Vec<Uuid>,
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { entity_ids: Vec<Uuid> },
    Unsubscribe { entity_ids: Vec<Uuid> },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: DomainEvent },
    Subscribed { entity_ids: Vec<Uuid> },
    Unsubscribed { entity_ids: Vec<Uuid> },
    Pong,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn publish(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    async fn register_client(&self, client_id: String) {
        let mut clients = self.clients.write().await;
        clients.insert(
            client_id.clone(),
            ClientInfo {
                client_id,
                subscribed_ids: vec![],
            },
        );
    }

    async fn unregister_client(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(client_id);
        tracing::info!("Client {} disconnected", client_id);
    }

    async fn update_subscriptions(&self, client_id: &str, update: impl FnOnce(&mut Vec<Uuid>)) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            update(&mut client.subscribed_ids);
        }
    }

    async fn wants(&self, client_id: &str, event: &DomainEvent) -> bool {
        let clients = self.clients.read().await;
        clients.get(client_id).map_or(false, |client| {
            client.subscribed_ids.is_empty() || event.concerns(&client.subscribed_ids)
        })
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(bus): State<EventBus>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, bus))
}

async fn handle_socket(socket: WebSocket, bus: EventBus) {
    let client_id = Uuid::new_v4().to_string();
    bus.register_client(client_id.clone()).await;

    let (mut sender, mut receiver) = socket.split();

    // Confirmations and pongs from the receive task
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = bus.subscribe();
    let send_bus = bus.clone();
    let send_client = client_id.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        if !send_bus.wants(&send_client, &event).await {
                            continue;
                        }
                        ServerMessage::Event { event }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Client {} lagged, skipped {} events", send_client, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = internal_rx.recv() => msg,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&outgoing) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_bus = bus.clone();
    let recv_client = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                        tracing::debug!("Ignoring malformed message from {}", recv_client);
                        continue;
                    };
                    let response = match client_msg {
                        ClientMessage::Subscribe { entity_ids } => {
                            let added = entity_ids.clone();
                            recv_bus
                                .update_subscriptions(&recv_client, |ids| {
                                    for id in added {
                                        if !ids.contains(&id) {
                                            ids.push(id);
                                        }
                                    }
                                })
                                .await;
                            tracing::info!("Client {} subscribed", recv_client);
                            ServerMessage::Subscribed { entity_ids }
                        }
                        ClientMessage::Unsubscribe { entity_ids } => {
                            let removed = entity_ids.clone();
                            recv_bus
                                .update_subscriptions(&recv_client, |ids| {
                                    ids.retain(|id| !removed.contains(id))
                                })
                                .await;
                            tracing::info!("Client {} unsubscribed", recv_client);
                            ServerMessage::Unsubscribed { entity_ids }
                        }
                        ClientMessage::Ping => ServerMessage::Pong,
                    };
                    if internal_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    bus.unregister_client(&client_id).await;
}
