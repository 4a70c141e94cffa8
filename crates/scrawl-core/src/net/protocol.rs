use serde::{Deserialize, Serialize};

use super::messages::{
    ChatBroadcastMsg, ChatSendMsg, ChooseWordMsg, ClientEvent, CloseGuessMsg, CommandReplyMsg,
    CorrectGuessMsg,
    GameEndedMsg, GameStartMsg, GameStartingMsg, HintMsg, HostChangedMsg, JoinReplyMsg,
    MessageType, PlayAgainMsg, PlayerDisconnectedMsg, PlayerJoinedMsg, PlayerKickMsg,
    PlayerKickedMsg, RoomCreateMsg, RoomJoinMsg, RoomLeaveMsg, RoomSettingsMsg, RoomSyncMsg,
    RoundEndMsg, SelectWordMsg, ServerEvent, ServerShutdownMsg, TimeUpdateMsg, TurnEndMsg,
    TurnStartMsg, WordAssignMsg,
};

/// Maximum frame size in bytes, applied on both encode and the read loop.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(f, "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})")
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload behind a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Frame an already-encoded payload. Used for the opaque drawing relay,
/// whose contents the server never interprets.
pub fn encode_raw(msg_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = 1 + payload.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Encode a `ClientEvent` to wire format.
pub fn encode_client_event(event: &ClientEvent) -> Result<Vec<u8>, ProtocolError> {
    match event {
        ClientEvent::RoomCreate(m) => encode_message(MessageType::RoomCreate, m),
        ClientEvent::RoomJoin(m) => encode_message(MessageType::RoomJoin, m),
        ClientEvent::RoomLeave(m) => encode_message(MessageType::RoomLeave, m),
        ClientEvent::RoomSettings(m) => encode_message(MessageType::RoomSettings, m),
        ClientEvent::GameStart(m) => encode_message(MessageType::GameStart, m),
        ClientEvent::SelectWord(m) => encode_message(MessageType::SelectWord, m),
        ClientEvent::PlayAgain(m) => encode_message(MessageType::PlayAgain, m),
        ClientEvent::Chat(m) => encode_message(MessageType::Chat, m),
        ClientEvent::PlayerKick(m) => encode_message(MessageType::PlayerKick, m),
    }
}

/// Encode a `ServerEvent` to wire format.
pub fn encode_server_event(event: &ServerEvent) -> Result<Vec<u8>, ProtocolError> {
    match event {
        ServerEvent::JoinReply(m) => encode_message(MessageType::JoinReply, m),
        ServerEvent::CommandReply(m) => encode_message(MessageType::CommandReply, m),
        ServerEvent::RoomSync(m) => encode_message(MessageType::RoomSync, m),
        ServerEvent::ChatBroadcast(m) => encode_message(MessageType::ChatBroadcast, m),
        ServerEvent::PlayerJoined(m) => encode_message(MessageType::PlayerJoined, m),
        ServerEvent::PlayerDisconnected(m) => encode_message(MessageType::PlayerDisconnected, m),
        ServerEvent::HostChanged(m) => encode_message(MessageType::HostChanged, m),
        ServerEvent::GameStarting(m) => encode_message(MessageType::GameStarting, m),
        ServerEvent::ChooseWord(m) => encode_message(MessageType::ChooseWord, m),
        ServerEvent::WordAssign(m) => encode_message(MessageType::WordAssign, m),
        ServerEvent::TurnStart(m) => encode_message(MessageType::TurnStart, m),
        ServerEvent::TimeUpdate(m) => encode_message(MessageType::TimeUpdate, m),
        ServerEvent::Hint(m) => encode_message(MessageType::Hint, m),
        ServerEvent::CorrectGuess(m) => encode_message(MessageType::CorrectGuess, m),
        ServerEvent::CloseGuess(m) => encode_message(MessageType::CloseGuess, m),
        ServerEvent::TurnEnd(m) => encode_message(MessageType::TurnEnd, m),
        ServerEvent::RoundEnd(m) => encode_message(MessageType::RoundEnd, m),
        ServerEvent::GameEnded(m) => encode_message(MessageType::GameEnded, m),
        ServerEvent::PlayerKicked(m) => encode_message(MessageType::PlayerKicked, m),
        ServerEvent::ServerShutdown(m) => encode_message(MessageType::ServerShutdown, m),
    }
}

/// Decode raw wire data into a `ClientEvent`. Draw frames and server types
/// are rejected here; the read loop relays draw frames without decoding.
pub fn decode_client_event(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::RoomCreate => Ok(ClientEvent::RoomCreate(decode_payload::<RoomCreateMsg>(
            data,
        )?)),
        MessageType::RoomJoin => Ok(ClientEvent::RoomJoin(decode_payload::<RoomJoinMsg>(data)?)),
        MessageType::RoomLeave => Ok(ClientEvent::RoomLeave(decode_payload::<RoomLeaveMsg>(
            data,
        )?)),
        MessageType::RoomSettings => Ok(ClientEvent::RoomSettings(decode_payload::<
            RoomSettingsMsg,
        >(data)?)),
        MessageType::GameStart => Ok(ClientEvent::GameStart(decode_payload::<GameStartMsg>(
            data,
        )?)),
        MessageType::SelectWord => Ok(ClientEvent::SelectWord(decode_payload::<SelectWordMsg>(
            data,
        )?)),
        MessageType::PlayAgain => Ok(ClientEvent::PlayAgain(decode_payload::<PlayAgainMsg>(
            data,
        )?)),
        MessageType::Chat => Ok(ClientEvent::Chat(decode_payload::<ChatSendMsg>(data)?)),
        MessageType::PlayerKick => Ok(ClientEvent::PlayerKick(decode_payload::<PlayerKickMsg>(
            data,
        )?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerEvent`.
pub fn decode_server_event(data: &[u8]) -> Result<ServerEvent, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::JoinReply => Ok(ServerEvent::JoinReply(decode_payload::<JoinReplyMsg>(
            data,
        )?)),
        MessageType::CommandReply => Ok(ServerEvent::CommandReply(decode_payload::<
            CommandReplyMsg,
        >(data)?)),
        MessageType::RoomSync => Ok(ServerEvent::RoomSync(Box::new(decode_payload::<
            RoomSyncMsg,
        >(data)?))),
        MessageType::ChatBroadcast => Ok(ServerEvent::ChatBroadcast(decode_payload::<
            ChatBroadcastMsg,
        >(data)?)),
        MessageType::PlayerJoined => Ok(ServerEvent::PlayerJoined(decode_payload::<
            PlayerJoinedMsg,
        >(data)?)),
        MessageType::PlayerDisconnected => Ok(ServerEvent::PlayerDisconnected(decode_payload::<
            PlayerDisconnectedMsg,
        >(data)?)),
        MessageType::HostChanged => Ok(ServerEvent::HostChanged(decode_payload::<HostChangedMsg>(
            data,
        )?)),
        MessageType::GameStarting => Ok(ServerEvent::GameStarting(decode_payload::<
            GameStartingMsg,
        >(data)?)),
        MessageType::ChooseWord => Ok(ServerEvent::ChooseWord(decode_payload::<ChooseWordMsg>(
            data,
        )?)),
        MessageType::WordAssign => Ok(ServerEvent::WordAssign(decode_payload::<WordAssignMsg>(
            data,
        )?)),
        MessageType::TurnStart => Ok(ServerEvent::TurnStart(decode_payload::<TurnStartMsg>(
            data,
        )?)),
        MessageType::TimeUpdate => Ok(ServerEvent::TimeUpdate(decode_payload::<TimeUpdateMsg>(
            data,
        )?)),
        MessageType::Hint => Ok(ServerEvent::Hint(decode_payload::<HintMsg>(data)?)),
        MessageType::CorrectGuess => Ok(ServerEvent::CorrectGuess(decode_payload::<
            CorrectGuessMsg,
        >(data)?)),
        MessageType::CloseGuess => Ok(ServerEvent::CloseGuess(decode_payload::<CloseGuessMsg>(
            data,
        )?)),
        MessageType::TurnEnd => Ok(ServerEvent::TurnEnd(decode_payload::<TurnEndMsg>(data)?)),
        MessageType::RoundEnd => Ok(ServerEvent::RoundEnd(decode_payload::<RoundEndMsg>(data)?)),
        MessageType::GameEnded => Ok(ServerEvent::GameEnded(decode_payload::<GameEndedMsg>(
            data,
        )?)),
        MessageType::PlayerKicked => Ok(ServerEvent::PlayerKicked(decode_payload::<
            PlayerKickedMsg,
        >(data)?)),
        MessageType::ServerShutdown => Ok(ServerEvent::ServerShutdown(decode_payload::<
            ServerShutdownMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{new_player_id, new_room_id};
    use crate::net::messages::{ChatBroadcastMsg, CreateSettings, PlayerSnapshot, RankingEntry};
    use crate::room::{ChatMessage, Phase, TurnEndReason};

    fn test_snapshot() -> PlayerSnapshot {
        PlayerSnapshot {
            id: new_player_id(),
            name: "Alice".into(),
            score: 120,
            is_host: true,
            is_drawing: false,
            has_guessed: false,
            avatar: "fox".into(),
            is_connected: true,
        }
    }

    #[test]
    fn roundtrip_room_create() {
        let event = ClientEvent::RoomCreate(RoomCreateMsg {
            player_name: "Alice".into(),
            avatar: Some("fox".into()),
            settings: CreateSettings {
                draw_time: Some(60),
                rounds: Some(2),
                max_players: Some(4),
                theme: Some("animals".into()),
                is_private: Some(true),
            },
        });
        let encoded = encode_client_event(&event).unwrap();
        assert_eq!(encoded[0], MessageType::RoomCreate as u8);
        assert_eq!(decode_client_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_room_join_with_rejoin_id() {
        let event = ClientEvent::RoomJoin(RoomJoinMsg {
            room_code: "ABCDEF".into(),
            player_name: "Bob".into(),
            player_id: Some(new_player_id()),
            avatar: None,
        });
        let encoded = encode_client_event(&event).unwrap();
        assert_eq!(decode_client_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_empty_payload_events() {
        for event in [
            ClientEvent::RoomLeave(RoomLeaveMsg {}),
            ClientEvent::GameStart(GameStartMsg {}),
            ClientEvent::PlayAgain(PlayAgainMsg {}),
        ] {
            let encoded = encode_client_event(&event).unwrap();
            assert_eq!(decode_client_event(&encoded).unwrap(), event);
        }
    }

    #[test]
    fn roundtrip_chat() {
        let event = ClientEvent::Chat(ChatSendMsg {
            message: "is it a horse?".into(),
        });
        let encoded = encode_client_event(&event).unwrap();
        assert_eq!(decode_client_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_join_reply() {
        let event = ServerEvent::JoinReply(JoinReplyMsg {
            success: true,
            room_id: Some(new_room_id()),
            room_code: Some("ABCDEF".into()),
            player_id: Some(new_player_id()),
            messages: vec![ChatMessage {
                id: uuid::Uuid::new_v4(),
                player_id: new_player_id(),
                player_name: "Alice".into(),
                text: "hi".into(),
                timestamp: 123,
                is_guess: false,
                is_close: false,
            }],
            error: None,
        });
        let encoded = encode_server_event(&event).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_turn_start_and_end() {
        let start = ServerEvent::TurnStart(TurnStartMsg {
            drawer_id: new_player_id(),
            word_length: 5,
            masked_word: "_____".into(),
            time_left: 80,
        });
        let encoded = encode_server_event(&start).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), start);

        let end = ServerEvent::TurnEnd(TurnEndMsg {
            word: "horse".into(),
            reason: TurnEndReason::DrawerLeft,
            all_guessed: false,
        });
        let encoded = encode_server_event(&end).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), end);
    }

    #[test]
    fn roundtrip_game_ended() {
        let event = ServerEvent::GameEnded(GameEndedMsg {
            rankings: vec![RankingEntry {
                rank: 1,
                id: new_player_id(),
                name: "Alice".into(),
                score: 263,
                user_id: Some("acct-1".into()),
            }],
            reason: None,
        });
        let encoded = encode_server_event(&event).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_chat_broadcast_with_flags() {
        let event = ServerEvent::ChatBroadcast(ChatBroadcastMsg {
            message: ChatMessage {
                id: uuid::Uuid::new_v4(),
                player_id: new_player_id(),
                player_name: "Bob".into(),
                text: "pome".into(),
                timestamp: 5,
                is_guess: true,
                is_close: true,
            },
        });
        let encoded = encode_server_event(&event).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), event);
    }

    #[test]
    fn roundtrip_room_sync() {
        let event = ServerEvent::RoomSync(Box::new(RoomSyncMsg {
            room: crate::net::messages::RoomStateSnapshot {
                id: new_room_id(),
                code: "ABCDEF".into(),
                phase: Phase::Choosing,
                round: 2,
                turn: 1,
                max_rounds: 3,
                time_left: 0,
                draw_time: 80,
                current_drawer: Some(new_player_id()),
                word_length: None,
                masked_word: None,
                theme: "general".into(),
                is_private: false,
                max_players: 10,
            },
            players: vec![test_snapshot()],
        }));
        let encoded = encode_server_event(&event).unwrap();
        assert_eq!(decode_server_event(&encoded).unwrap(), event);
    }

    #[test]
    fn raw_draw_frames_pass_through() {
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let frame = encode_raw(MessageType::DrawStroke, &payload).unwrap();
        assert_eq!(frame[0], MessageType::DrawStroke as u8);
        assert_eq!(&frame[1..], payload.as_slice());
        assert_eq!(
            decode_message_type(&frame).unwrap(),
            MessageType::DrawStroke
        );
        // draw frames are never decoded as client events
        assert!(decode_client_event(&frame).is_err());
    }

    #[test]
    fn decode_empty_message_fails() {
        assert!(decode_message_type(&[]).is_err());
    }

    #[test]
    fn decode_unknown_type_fails() {
        assert!(decode_message_type(&[0xFF]).is_err());
    }

    #[test]
    fn server_type_rejected_as_client_event() {
        let event = ServerEvent::TimeUpdate(TimeUpdateMsg { time_left: 10 });
        let encoded = encode_server_event(&event).unwrap();
        assert!(decode_client_event(&encoded).is_err());
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let result = encode_raw(MessageType::DrawStroke, &payload);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge(_))));
    }

    #[test]
    fn protocol_error_display() {
        assert_eq!(format!("{}", ProtocolError::EmptyMessage), "empty message");
        assert_eq!(
            format!("{}", ProtocolError::UnknownMessageType(0xFF)),
            "unknown message type: 0xff"
        );
        assert!(format!("{}", ProtocolError::PayloadTooLarge(99999)).contains("99999"));
    }
}
