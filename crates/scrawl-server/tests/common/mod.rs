use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use scrawl_core::net::messages::{
    ClientEvent, CreateSettings, JoinReplyMsg, RoomCreateMsg, RoomJoinMsg, ServerEvent,
};
use scrawl_core::net::protocol::{decode_server_event, encode_client_event};

use scrawl_server::build_app;
use scrawl_server::config::{GameConfig, RoomsConfig, ServerConfig};
use scrawl_server::store::Store;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _serve: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with millisecond game timers and an in-memory store
    /// so whole games run in a fraction of a second.
    pub async fn new() -> Self {
        let config = ServerConfig {
            game: GameConfig {
                start_countdown_ms: 50,
                auto_pick_ms: 150,
                turn_end_delay_ms: 80,
                guess_settle_ms: 30,
                // frozen clock: the drawing timer never ticks during tests
                tick_ms: 3_600_000,
            },
            rooms: RoomsConfig {
                empty_grace_ms: 200,
                sweep_interval_secs: 3600,
                retention_mins: 30,
            },
            ..ServerConfig::default()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let store = Store::memory().await.unwrap();
        let (app, _state) = build_app(config, store);

        let serve = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _serve: serve,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn send_event(stream: &mut WsStream, event: &ClientEvent) {
    let encoded = encode_client_event(event).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

pub async fn send_raw(stream: &mut WsStream, frame: Vec<u8>) {
    stream.send(Message::Binary(frame.into())).await.unwrap();
}

/// Read the next binary frame (5s timeout).
pub async fn read_raw(stream: &mut WsStream) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for WebSocket frame")
}

pub async fn read_event(stream: &mut WsStream) -> ServerEvent {
    let data = read_raw(stream).await;
    decode_server_event(&data).unwrap()
}

/// Read events until `pick` matches, discarding everything in between.
pub async fn wait_for<T>(
    stream: &mut WsStream,
    mut pick: impl FnMut(ServerEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = read_event(stream).await;
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Create a room; returns the join reply (always successful).
pub async fn create_room(stream: &mut WsStream, name: &str, settings: CreateSettings) -> JoinReplyMsg {
    send_event(
        stream,
        &ClientEvent::RoomCreate(RoomCreateMsg {
            player_name: name.to_string(),
            avatar: None,
            settings,
        }),
    )
    .await;
    match read_event(stream).await {
        ServerEvent::JoinReply(reply) => {
            assert!(reply.success, "create failed: {:?}", reply.error);
            reply
        },
        other => panic!("expected JoinReply, got {other:?}"),
    }
}

/// Join an existing room; returns the reply, which may be a failure.
pub async fn join_room(stream: &mut WsStream, code: &str, name: &str) -> JoinReplyMsg {
    send_event(
        stream,
        &ClientEvent::RoomJoin(RoomJoinMsg {
            room_code: code.to_string(),
            player_name: name.to_string(),
            player_id: None,
            avatar: None,
        }),
    )
    .await;
    match read_event(stream).await {
        ServerEvent::JoinReply(reply) => reply,
        other => panic!("expected JoinReply, got {other:?}"),
    }
}
