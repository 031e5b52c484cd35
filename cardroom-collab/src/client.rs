//! WebSocket room client.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - A [`ClientReducer`] mirror fed by every frame from the server
//! - One helper per mutation kind
//!
//! There is no offline queue: mutations made while disconnected fail with
//! [`ClientError::NotConnected`].

use std::sync::Arc;

use cardroom_core::{Activity, Card, ClientReducer, Message, ProtocolError};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the room client.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Handshake accepted
    Connected,
    /// Full activity received (first frame, or after a resync)
    Snapshot(Activity),
    /// A mutation applied by the room, in room order
    Applied(Message),
    /// Connection lost or closed
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("handshake rejected with HTTP {0}")]
    Rejected(u16),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection task has stopped")]
    ChannelClosed,
}

/// The room client.
pub struct RoomClient {
    server_url: String,
    room_id: String,
    token: String,

    state: Arc<RwLock<ConnectionState>>,
    reducer: Arc<RwLock<ClientReducer>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    event_rx: Option<mpsc::Receiver<RoomEvent>>,
    event_tx: mpsc::Sender<RoomEvent>,
}

impl RoomClient {
    /// `server_url` is the base WebSocket URL, e.g. `ws://127.0.0.1:9090`.
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            room_id: room_id.into(),
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            reducer: Arc::new(RwLock::new(ClientReducer::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RoomEvent>> {
        self.event_rx.take()
    }

    pub fn url(&self) -> String {
        format!("{}/rooms/{}", self.server_url.trim_end_matches('/'), self.room_id)
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match self.open().await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(WsMessage::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(WsMessage::Close(None)).await;
        });

        self.reducer.write().await.set_connected(true);
        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, RoomEvent::Connected);

        // Reader task: apply frames in receipt order
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let reducer = self.reducer.clone();
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Text(data)) => match Message::decode(data.as_str()) {
                        Ok(Some(message)) => {
                            reducer.write().await.apply_authoritative(&message);
                            let event = match message {
                                Message::Activity { activity } => RoomEvent::Snapshot(activity),
                                message => RoomEvent::Applied(message),
                            };
                            emit(&event_tx, event);
                        }
                        Ok(None) => log::debug!("Room {room_id}: ignoring unknown message type"),
                        Err(e) => log::warn!("Room {room_id}: undecodable frame: {e}"),
                    },
                    Ok(WsMessage::Close(frame)) => {
                        log::info!("Room {room_id}: server closed connection: {frame:?}");
                        break;
                    }
                    Err(e) => {
                        log::error!("Room {room_id}: transport error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            reducer.write().await.set_connected(false);
            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, RoomEvent::Disconnected);
        });

        Ok(())
    }

    async fn open(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        ClientError,
    > {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => Ok(ws_stream),
            Err(WsError::Http(response)) => Err(ClientError::Rejected(response.status().as_u16())),
            Err(e) => Err(ClientError::Connect(e.to_string())),
        }
    }

    /// Close the connection. Pending outgoing frames are flushed first;
    /// mutations fail with [`ClientError::NotConnected`] from here on.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        self.reducer.write().await.set_connected(false);
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn update_name(&self, name: impl Into<String>) -> Result<(), ClientError> {
        self.send(&Message::name(name)).await
    }

    pub async fn update_dates(
        &self,
        start_date: impl Into<String>,
        end_date: Option<String>,
        start_time: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&Message::dates(start_date, end_date, start_time))
            .await
    }

    pub async fn create_card(&self, card: Card) -> Result<(), ClientError> {
        self.send(&Message::card_create(card)).await
    }

    /// Create a note card under a fresh id and return that id.
    pub async fn create_note(&self, title: impl Into<String>) -> Result<String, ClientError> {
        let card = Card::note(Card::new_id(), title);
        let id = card.id.clone();
        self.create_card(card).await?;
        Ok(id)
    }

    pub async fn update_card(&self, card: Card) -> Result<(), ClientError> {
        self.send(&Message::card_update(card)).await
    }

    pub async fn delete_card(&self, card_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(&Message::card_delete(card_id)).await
    }

    /// Reorder optimistically: the local mirror moves the card before the
    /// server echoes the reorder back. Nothing moves unless the reorder is
    /// queued for sending.
    pub async fn reorder_card(
        &self,
        card_id: impl Into<String>,
        new_index: i64,
    ) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        let message = Message::card_reorder(card_id, new_index);
        let text = message.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        let permit = tx.reserve().await.map_err(|_| ClientError::ChannelClosed)?;
        self.reducer.write().await.apply_local(&message);
        permit.send(text);
        Ok(())
    }

    pub async fn add_card_extra_data(
        &self,
        card_id: impl Into<String>,
        item: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&Message::extra_data_add(card_id, item)).await
    }

    pub async fn update_card_extra_data(
        &self,
        card_id: impl Into<String>,
        index: i64,
        item: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&Message::extra_data_update(card_id, index, item))
            .await
    }

    pub async fn delete_card_extra_data(
        &self,
        card_id: impl Into<String>,
        index: i64,
    ) -> Result<(), ClientError> {
        self.send(&Message::extra_data_delete(card_id, index)).await
    }

    async fn send(&self, message: &Message) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        let text = message.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(text).await.map_err(|_| ClientError::ChannelClosed)
    }

    async fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.outgoing_tx.is_none() || *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    /// Copy of the mirrored activity.
    pub async fn activity(&self) -> Activity {
        self.reducer.read().await.activity().clone()
    }

    pub async fn card_ids(&self) -> Vec<String> {
        let reducer = self.reducer.read().await;
        reducer
            .activity()
            .card_ids()
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub async fn is_loading(&self) -> bool {
        self.reducer.read().await.is_loading()
    }

    pub async fn can_mutate(&self) -> bool {
        self.reducer.read().await.can_mutate()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Hand an event to the caller without waiting. The mirror keeps applying
/// frames whether or not anyone drains the event channel.
fn emit(event_tx: &mpsc::Sender<RoomEvent>, event: RoomEvent) {
    if let Err(e) = event_tx.try_send(event) {
        log::debug!("Dropping room event: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let client = RoomClient::new("ws://127.0.0.1:9090/", "trip", "secret");
        assert_eq!(client.url(), "ws://127.0.0.1:9090/rooms/trip");
        assert_eq!(client.room_id(), "trip");
    }

    #[tokio::test]
    async fn test_mutations_fail_while_disconnected() {
        let client = RoomClient::new("ws://127.0.0.1:9", "trip", "secret");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(matches!(
            client.update_name("Lisbon").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.reorder_card("a", 0).await,
            Err(ClientError::NotConnected)
        ));
        assert!(client.is_loading().await);
        assert!(!client.can_mutate().await);
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = RoomClient::new(format!("ws://127.0.0.1:{port}"), "trip", "secret");
        assert!(matches!(client.connect().await, Err(ClientError::Connect(_))));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    async fn connected_client(outgoing_tx: mpsc::Sender<String>) -> RoomClient {
        let mut client = RoomClient::new("ws://localhost", "trip", "secret");
        let mut activity = Activity::new();
        for id in ["a", "b", "c"] {
            activity.insert_card(Card::note(id, id.to_uppercase()));
        }
        {
            let mut reducer = client.reducer.write().await;
            reducer.apply_authoritative(&Message::snapshot(&activity));
            reducer.set_connected(true);
        }
        *client.state.write().await = ConnectionState::Connected;
        client.outgoing_tx = Some(outgoing_tx);
        client
    }

    #[tokio::test]
    async fn test_reorder_is_not_applied_when_writer_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let client = connected_client(tx).await;

        assert!(matches!(
            client.reorder_card("a", 2).await,
            Err(ClientError::ChannelClosed)
        ));
        assert_eq!(client.card_ids().await, vec!["a", "b", "c"]);
        assert_eq!(client.reducer.read().await.pending_reorders(), 0);
    }

    #[tokio::test]
    async fn test_reorder_moves_card_and_queues_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = connected_client(tx).await;

        client.reorder_card("a", 2).await.unwrap();
        assert_eq!(client.card_ids().await, vec!["b", "c", "a"]);
        assert_eq!(
            Message::decode(&rx.recv().await.unwrap()).unwrap(),
            Some(Message::card_reorder("a", 2))
        );
    }

    #[tokio::test]
    async fn test_create_note_uses_fresh_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = connected_client(tx).await;

        let first = client.create_note("Flights").await.unwrap();
        let second = client.create_note("Hotel").await.unwrap();
        assert_ne!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());

        match Message::decode(&rx.recv().await.unwrap()).unwrap() {
            Some(Message::CardCreate { card }) => assert_eq!(card.id, first),
            other => panic!("expected card-create, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_blocks_mutations_immediately() {
        let (tx, _rx) = mpsc::channel(4);
        let mut client = connected_client(tx).await;
        assert!(client.can_mutate().await);

        client.disconnect().await;
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(!client.can_mutate().await);
        assert!(matches!(
            client.update_name("Lisbon").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_emit_never_waits_on_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, RoomEvent::Connected);
        emit(&tx, RoomEvent::Disconnected);
        assert!(matches!(rx.try_recv(), Ok(RoomEvent::Connected)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_take_event_rx_once() {
        let mut client = RoomClient::new("ws://localhost", "trip", "secret");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
