use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::models::{ChatMessage, GroupView, Participant, Status};

/// Inbound frames, `{"event": ..., "data": {...}}`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Join {
        username: String,
        avatar: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        text: String,
        group_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        is_typing: bool,
        group_id: Option<String>,
    },
    CreateGroup {
        name: String,
        description: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinGroup {
        group_id: String,
    },
    #[serde(rename_all = "camelCase")]
    LeaveGroup {
        group_id: String,
    },
    SetStatus {
        status: Status,
    },
    GetUsers,
    GetGroups,
    Ping,
    DisconnectUser,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    Users(Vec<Participant>),
    Messages(Vec<ChatMessage>),
    Message(ChatMessage),
    Groups(Vec<GroupView>),
    GroupCreated(GroupView),
    GroupUpdated(GroupView),
    #[serde(rename_all = "camelCase")]
    GroupMessage {
        group_id: String,
        message: ChatMessage,
    },
    GroupJoined(GroupView),
    #[serde(rename_all = "camelCase")]
    GroupLeft {
        group_id: String,
    },
    UserJoined(Participant),
    UserLeft(Participant),
    UserUpdated(Participant),
    #[serde(rename_all = "camelCase")]
    UserTyping {
        username: String,
        is_typing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    Pong,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl From<&crate::error::RouterError> for ServerMessage {
    fn from(err: &crate::error::RouterError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_inbound_events() {
        assert_eq!(
            parse(json!({"event": "join", "data": {"username": "alice"}})),
            ClientMessage::Join { username: "alice".into(), avatar: None }
        );
        assert_eq!(
            parse(json!({"event": "message", "data": {"text": "yo", "groupId": "7"}})),
            ClientMessage::Message { text: "yo".into(), group_id: Some("7".into()) }
        );
        assert_eq!(
            parse(json!({"event": "typing", "data": {"isTyping": true}})),
            ClientMessage::Typing { is_typing: true, group_id: None }
        );
        assert_eq!(
            parse(json!({"event": "leaveGroup", "data": {"groupId": "7"}})),
            ClientMessage::LeaveGroup { group_id: "7".into() }
        );
        assert_eq!(
            parse(json!({"event": "setStatus", "data": {"status": "away"}})),
            ClientMessage::SetStatus { status: Status::Away }
        );
        assert_eq!(parse(json!({"event": "ping"})), ClientMessage::Ping);
        assert_eq!(parse(json!({"event": "getGroups"})), ClientMessage::GetGroups);
    }

    #[test]
    fn rejects_unknown_events() {
        let result = serde_json::from_value::<ClientMessage>(json!({"event": "shout", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn outbound_framing() {
        assert_eq!(serde_json::to_value(ServerMessage::Pong).unwrap(), json!({"event": "pong"}));
        assert_eq!(
            serde_json::to_value(ServerMessage::GroupLeft { group_id: "7".into() }).unwrap(),
            json!({"event": "groupLeft", "data": {"groupId": "7"}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::UserTyping {
                username: "bob".into(),
                is_typing: true,
                group_id: None,
            })
            .unwrap(),
            json!({"event": "userTyping", "data": {"username": "bob", "isTyping": true}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Users(Vec::new())).unwrap(),
            json!({"event": "users", "data": []})
        );
    }

    #[test]
    fn error_frame_carries_code() {
        let frame = ServerMessage::from(&RouterError::NotAMember("7".into()));
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({"event": "error", "data": {"code": "notAMember", "message": "Not a member of group 7"}})
        );
    }
}
