//! One WebSocket connection attached to one room.
//!
//! The handshake request carries the attach parameters: the room id in the
//! path (`/rooms/{roomId}`) and a bearer credential in the `Authorization`
//! header or the `token` query parameter. Requests that fail either check
//! are refused before the upgrade and never reach a room.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cardroom_core::Message;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::auth::{bearer_token, query_token, Authenticator, UserId};
use crate::authority::{Attachment, RoomError, RoomHandle};
use crate::broadcast::{Frame, SessionInfo};
use crate::registry::RoomRegistry;
use crate::server::AtomicServerStats;

pub type SessionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Verified attach parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub room_id: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeRejection {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
}

impl HandshakeRejection {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Room id from `/rooms/{roomId}`. Ids are opaque and contain no `/`.
pub fn room_id_from_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix("/rooms/")?;
    let id = id.strip_suffix('/').unwrap_or(id);
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

/// Validate the handshake request: path first, then credential.
pub fn parse_attach_request(
    request: &Request,
    authenticator: &dyn Authenticator,
) -> Result<AttachRequest, HandshakeRejection> {
    let room_id =
        room_id_from_path(request.uri().path()).ok_or(HandshakeRejection::NotFound)?;

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .or_else(|| request.uri().query().and_then(query_token))
        .ok_or(HandshakeRejection::Unauthorized)?;

    let user_id = authenticator
        .verify(token)
        .map_err(|_| HandshakeRejection::Unauthorized)?;

    Ok(AttachRequest {
        room_id: room_id.to_string(),
        user_id,
    })
}

/// Shared state every session needs.
pub(crate) struct SessionContext {
    pub registry: Arc<RoomRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub stats: Arc<AtomicServerStats>,
    pub heartbeat: Option<Duration>,
}

/// Handshake, attach, and serve one connection until it closes.
pub(crate) async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
) -> SessionResult {
    let mut accepted: Option<AttachRequest> = None;
    let mut rejected: Option<HandshakeRejection> = None;
    let authenticator = ctx.authenticator.as_ref();

    let callback = |request: &Request, response: Response| {
        match parse_attach_request(request, authenticator) {
            Ok(attach) => {
                accepted = Some(attach);
                Ok(response)
            }
            Err(rejection) => {
                rejected = Some(rejection);
                Err(rejection.into_response())
            }
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            if let Some(rejection) = rejected {
                ctx.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
                log::info!("Refused handshake from {addr}: {rejection}");
                return Ok(());
            }
            return Err(e.into());
        }
    };
    let Some(AttachRequest { room_id, user_id }) = accepted else {
        return Ok(());
    };

    ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let session = SessionInfo::new(user_id);
    let session_id = session.session_id;

    let result = match ctx.registry.attach(&room_id, session.clone()).await {
        Ok((room, attachment)) => {
            log::info!("{addr} attached to room {room_id} as {}", session.user_id);
            let result = serve(&ctx, &room, &session, attachment, &mut ws_sender, ws_receiver).await;
            ctx.registry.detach(&room_id, session_id).await;
            result
        }
        Err(RoomError::Full(_)) => {
            let close = CloseFrame {
                code: CloseCode::Policy,
                reason: String::from("room is full").into(),
            };
            ws_sender
                .send(WsMessage::Close(Some(close)))
                .await
                .map_err(Into::into)
        }
        Err(e) => Err(e.into()),
    };

    ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("Connection from {addr} to room {room_id} ended");
    result
}

type WsSender = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<TcpStream>,
    WsMessage,
>;
type WsReceiver = futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<TcpStream>>;

async fn serve(
    ctx: &SessionContext,
    room: &RoomHandle,
    session: &SessionInfo,
    attachment: Attachment,
    ws_sender: &mut WsSender,
    mut ws_receiver: WsReceiver,
) -> SessionResult {
    let session_id = session.session_id;
    let mut frames = attachment.frames;
    ws_sender.send(text(&attachment.snapshot)).await?;

    let period = ctx.heartbeat.unwrap_or(Duration::from_secs(3600));
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(data))) => {
                        ctx.stats.total_messages.fetch_add(1, Ordering::Relaxed);
                        match Message::decode(data.as_str()) {
                            Ok(Some(message)) => {
                                room.submit(session_id, session.user_id.clone(), message).await?;
                            }
                            Ok(None) => {
                                log::debug!("Session {session_id}: ignoring unknown message type");
                            }
                            Err(e) => {
                                log::warn!("Session {session_id}: dropped malformed frame: {e}");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sender.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::error!("Session {session_id}: transport error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            frame = frames.recv() => {
                match frame {
                    Ok(frame) => ws_sender.send(text(&frame)).await?,
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Session {session_id} lagged by {missed} frames, resyncing");
                        let resync = room.resync(session_id).await?;
                        frames = resync.frames;
                        ws_sender.send(text(&resync.snapshot)).await?;
                    }
                    Err(RecvError::Closed) => {
                        log::info!("Room {} closed under session {session_id}", room.room_id());
                        break;
                    }
                }
            }

            _ = heartbeat.tick(), if ctx.heartbeat.is_some() => {
                ws_sender.send(WsMessage::Ping(Default::default())).await?;
            }
        }
    }

    Ok(())
}

fn text(frame: &Frame) -> WsMessage {
    WsMessage::text(frame.to_string())
}
