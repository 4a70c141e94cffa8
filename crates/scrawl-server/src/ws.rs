//! Transport adapter: maps one WebSocket connection to at most one player,
//! routes inbound events to the room engine, and drains the player's
//! outbound queue back to the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use scrawl_core::codes::{PlayerId, new_session_id};
use scrawl_core::net::messages::{ClientEvent, JoinReplyMsg, ServerEvent};
use scrawl_core::net::protocol::{
    MAX_MESSAGE_SIZE, decode_client_event, decode_message_type, encode_server_event,
};
use scrawl_core::player::validate_name;

use crate::engine::RoomCommand;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let ip = addr.ip();
    if !state.connect_limiter.check(ip).await {
        tracing::warn!(%ip, "connection attempts rate limited");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip, "per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, ip_guard))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, _ip_guard: IpConnectionGuard) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The first frame must create or join a room.
    let first = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };

    let session = new_session_id();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);

    let joined = match decode_client_event(&first) {
        Ok(ClientEvent::RoomCreate(create)) => {
            let Some(name) = validate_name(&create.player_name) else {
                send_join_error(&mut ws_sender, "invalid player name").await;
                return;
            };
            state
                .registry
                .create_room(name, create.avatar, None, create.settings, session, tx)
                .await
        },
        Ok(ClientEvent::RoomJoin(join)) => {
            let Some(name) = validate_name(&join.player_name) else {
                send_join_error(&mut ws_sender, "invalid player name").await;
                return;
            };
            state
                .registry
                .join_room(
                    &join.room_code,
                    name,
                    join.avatar,
                    join.player_id,
                    None,
                    session,
                    tx,
                )
                .await
        },
        _ => {
            send_join_error(&mut ws_sender, "expected room:create or room:join").await;
            return;
        },
    };

    let (accepted, cmd_tx) = match joined {
        Ok(ok) => ok,
        Err(err) => {
            send_join_error(&mut ws_sender, &err.to_string()).await;
            return;
        },
    };

    let reply = ServerEvent::JoinReply(JoinReplyMsg {
        success: true,
        room_id: Some(accepted.room_id),
        room_code: Some(accepted.room_code.clone()),
        player_id: Some(accepted.player_id),
        messages: accepted.messages,
        error: None,
    });
    match encode_server_event(&reply) {
        Ok(data) => {
            if ws_sender.send(Message::Binary(data.into())).await.is_err() {
                let _ = cmd_tx.try_send(RoomCommand::Disconnect {
                    player_id: accepted.player_id,
                    session,
                });
                return;
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to encode join reply");
            return;
        },
    }

    spawn_writer(ws_sender, rx);

    let player_id = accepted.player_id;
    let room_code = accepted.room_code;
    let left = read_loop(&mut ws_receiver, &state, &cmd_tx, &room_code, player_id).await;

    if !left
        && cmd_tx
            .try_send(RoomCommand::Disconnect { player_id, session })
            .is_err()
    {
        tracing::debug!(room = %room_code, player_id = %player_id, "room gone at disconnect");
    }

    tracing::info!(room = %room_code, player_id = %player_id, "connection closed");
}

async fn send_join_error(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    error: &str,
) {
    let reply = ServerEvent::JoinReply(JoinReplyMsg::failure(error));
    if let Ok(data) = encode_server_event(&reply)
        && let Err(e) = ws_sender.send(Message::Binary(data.into())).await
    {
        tracing::debug!(error = %e, "failed to send join error");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection token bucket for inbound frames.
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Relay inbound frames into the room's inbox until the socket closes.
/// Returns `true` when the client left the room explicitly.
async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    cmd_tx: &mpsc::Sender<RoomCommand>,
    room_code: &str,
    player_id: PlayerId,
) -> bool {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data: Bytes = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(room = room_code, player_id = %player_id, "rate limited");
            continue;
        }
        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let msg_type = match decode_message_type(&data) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // The room state machine is server-authoritative.
        if msg_type.is_server_only() {
            tracing::warn!(
                room = room_code,
                player_id = %player_id,
                ?msg_type,
                "rejected server-only message from client"
            );
            continue;
        }

        // Drawing frames are authorised in the room task and forwarded
        // verbatim; their payload is never decoded here.
        if msg_type.is_draw() {
            route(cmd_tx, RoomCommand::Draw {
                player_id,
                frame: data,
            });
            continue;
        }

        let event = match decode_client_event(&data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(room = room_code, player_id = %player_id, error = %e, "bad frame");
                continue;
            },
        };

        match event {
            ClientEvent::RoomLeave(_) => {
                route(cmd_tx, RoomCommand::Leave { player_id });
                return true;
            },
            ClientEvent::Chat(chat) => {
                route(cmd_tx, RoomCommand::Chat {
                    player_id,
                    text: chat.message,
                });
            },
            ClientEvent::RoomSettings(settings) => {
                route(cmd_tx, RoomCommand::Settings {
                    player_id,
                    draw_time: settings.draw_time,
                    max_rounds: settings.max_rounds,
                });
            },
            ClientEvent::GameStart(_) => {
                route(cmd_tx, RoomCommand::Start { player_id });
            },
            ClientEvent::SelectWord(select) => {
                route(cmd_tx, RoomCommand::SelectWord {
                    player_id,
                    word: select.word,
                });
            },
            ClientEvent::PlayAgain(_) => {
                route(cmd_tx, RoomCommand::PlayAgain { player_id });
            },
            ClientEvent::PlayerKick(kick) => {
                route(cmd_tx, RoomCommand::Kick {
                    player_id,
                    target: kick.player_id,
                });
            },
            // a second create/join on a live connection is a protocol error
            ClientEvent::RoomCreate(_) | ClientEvent::RoomJoin(_) => {
                tracing::debug!(
                    room = room_code,
                    player_id = %player_id,
                    "ignoring join on an already-joined connection"
                );
            },
        }
    }
    false
}

/// Best-effort enqueue; a full inbox drops the command like a slow client.
fn route(cmd_tx: &mpsc::Sender<RoomCommand>, cmd: RoomCommand) {
    if let Err(e) = cmd_tx.try_send(cmd) {
        let reason = match e {
            mpsc::error::TrySendError::Full(_) => "room inbox full",
            mpsc::error::TrySendError::Closed(_) => "room gone",
        };
        tracing::debug!(reason, "dropped inbound command");
    }
}
