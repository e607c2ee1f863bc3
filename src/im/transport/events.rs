//! 推送事件定义与帧解码

use crate::im::conversation::models::ConversationUpdate;
use crate::im::error::{Result, SyncError};
use crate::im::presence::models::PresenceUpdate;
use crate::im::serialization::unpack_frame;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// 事件名（订阅键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Reconnected,
    Disconnected,
    Offline,
    ConversationUpdate,
    ConversationDeleted,
    PresenceUpdate,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Reconnected => "reconnected",
            EventKind::Disconnected => "disconnected",
            EventKind::Offline => "offline",
            EventKind::ConversationUpdate => "conversationUpdate",
            EventKind::ConversationDeleted => "conversationDeleted",
            EventKind::PresenceUpdate => "presenceUpdate",
        }
    }

    /// 推送事件（非连接生命周期事件）
    pub const PUSH: [EventKind; 3] = [
        EventKind::ConversationUpdate,
        EventKind::ConversationDeleted,
        EventKind::PresenceUpdate,
    ];

    /// 连接生命周期事件
    pub const LIFECYCLE: [EventKind; 4] = [
        EventKind::Connected,
        EventKind::Reconnected,
        EventKind::Disconnected,
        EventKind::Offline,
    ];
}

/// 服务器下发的会话删除 `conversationDeleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDeleted {
    pub id: String,
}

/// 推送事件，帧格式 `{"event": <name>, "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PushEvent {
    ConversationUpdate(ConversationUpdate),
    ConversationDeleted(ConversationDeleted),
    PresenceUpdate(PresenceUpdate),
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::ConversationUpdate(_) => EventKind::ConversationUpdate,
            PushEvent::ConversationDeleted(_) => EventKind::ConversationDeleted,
            PushEvent::PresenceUpdate(_) => EventKind::PresenceUpdate,
        }
    }

    /// 编码为文本帧（服务端 / 测试使用）
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 传输会话分发给订阅者的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 首次建立连接
    Connected,
    /// 断线后重新建立连接（期间的推送不会重发）
    Reconnected,
    Disconnected { reason: String },
    /// 连续连接失败达到上限
    Offline,
    Push(PushEvent),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Connected => EventKind::Connected,
            TransportEvent::Reconnected => EventKind::Reconnected,
            TransportEvent::Disconnected { .. } => EventKind::Disconnected,
            TransportEvent::Offline => EventKind::Offline,
            TransportEvent::Push(ev) => ev.kind(),
        }
    }
}

/// 解码一帧
///
/// 控制帧返回 `Ok(None)`；无法识别的事件名或畸形载荷返回 `SyncError::Decode`，
/// 由调用方记录后丢弃。
pub fn decode_frame(msg: WsMessage) -> Result<Option<PushEvent>> {
    let bytes = match msg {
        WsMessage::Text(text) => text.into_bytes(),
        WsMessage::Binary(data) => unpack_frame(data)?,
        _ => return Ok(None),
    };
    serde_json::from_slice::<PushEvent>(&bytes)
        .map(Some)
        .map_err(|e| SyncError::Decode(format!("{}, 原始数据: {}", e, String::from_utf8_lossy(&bytes))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::serialization::compress_gzip;

    const UPDATE: &str = r#"{
        "event": "conversationUpdate",
        "data": {
            "id": "c1",
            "type": "group",
            "participant": {"name": "Team", "memberCount": 4},
            "lastMessage": {"text": "hi", "kind": "sticker", "timestamp": 42, "senderID": "u2"},
            "unreadCount": 3,
            "isPinned": true,
            "pinChanged": true
        }
    }"#;

    #[test]
    fn decodes_conversation_update_with_pin_marker() {
        let ev = decode_frame(WsMessage::Text(UPDATE.to_string())).unwrap().unwrap();
        match ev {
            PushEvent::ConversationUpdate(update) => {
                assert!(update.pin_changed);
                assert_eq!(update.summary.id, "c1");
                assert_eq!(update.summary.unread_count, 3);
                assert_eq!(update.summary.participant.member_count, Some(4));
                let msg = update.summary.last_message.unwrap();
                assert_eq!(msg.kind, crate::im::conversation::models::MessageKind::Other);
                assert!(!msg.is_read);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_gzip_binary_presence() {
        let raw = br#"{"event":"presenceUpdate","data":{"peerID":"p1","online":true,"at":7}}"#;
        let frame = WsMessage::Binary(compress_gzip(raw).unwrap());
        let ev = decode_frame(frame).unwrap().unwrap();
        assert_eq!(ev.kind(), EventKind::PresenceUpdate);
    }

    #[test]
    fn unknown_event_and_malformed_payload_are_errors() {
        let unknown = r#"{"event":"typing","data":{"id":"c1"}}"#;
        assert!(matches!(
            decode_frame(WsMessage::Text(unknown.to_string())),
            Err(SyncError::Decode(_))
        ));
        let missing_id = r#"{"event":"conversationDeleted","data":{}}"#;
        assert!(decode_frame(WsMessage::Text(missing_id.to_string())).is_err());
        assert!(decode_frame(WsMessage::Text("not json".to_string())).is_err());
    }

    #[test]
    fn control_frames_are_ignored() {
        assert_eq!(decode_frame(WsMessage::Ping(vec![1])).unwrap(), None);
        assert_eq!(decode_frame(WsMessage::Pong(vec![])).unwrap(), None);
    }

    #[test]
    fn frame_encoding_matches_decoder() {
        let ev = PushEvent::ConversationDeleted(ConversationDeleted { id: "x".to_string() });
        let text = ev.to_frame().unwrap();
        assert_eq!(decode_frame(WsMessage::Text(text)).unwrap(), Some(ev));
    }
}
