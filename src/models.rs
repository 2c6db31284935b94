use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque per-connection identifier assigned by the transport.
pub type ConnectionId = String;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Online,
    Away,
    Busy,
    Disconnected,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ConnectionId,
    pub username: String,
    pub avatar: String,
    pub status: Status,
    pub join_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ConnectionId, username: String, avatar: String, now: DateTime<Utc>) -> Self {
        Participant {
            id,
            username,
            avatar,
            status: Status::Online,
            join_time: now,
            last_seen: now,
        }
    }

    /// Rebind an existing record to a new connection. Returns the connection
    /// it was bound to before.
    pub fn reconnect(&mut self, id: ConnectionId, avatar: String, now: DateTime<Utc>) -> ConnectionId {
        self.avatar = avatar;
        self.status = Status::Online;
        self.join_time = now;
        self.last_seen = now;
        std::mem::replace(&mut self.id, id)
    }

    pub fn mark_disconnected(&mut self, now: DateTime<Utc>) {
        self.status = Status::Disconnected;
        self.last_seen = now;
    }

    pub fn is_connected(&self) -> bool {
        self.status != Status::Disconnected
    }
}

/// An immutable chat utterance, stamped by the server.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub text: String,
    pub sender: String,
    pub sender_id: ConnectionId,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub creator: ConnectionId,
    members: Vec<ConnectionId>,
    pub created_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

impl Group {
    pub fn new(
        id: String,
        name: String,
        description: String,
        creator: ConnectionId,
        now: DateTime<Utc>,
    ) -> Self {
        Group {
            id,
            name,
            description,
            members: vec![creator.clone()],
            creator,
            created_at: now,
            messages: Vec::new(),
        }
    }

    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.iter().any(|m| m == connection_id)
    }

    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    /// Returns false if the connection was already a member.
    pub fn add_member(&mut self, connection_id: ConnectionId) -> bool {
        if self.is_member(&connection_id) {
            return false;
        }
        self.members.push(connection_id);
        true
    }

    /// Returns true if the connection was a member.
    pub fn remove_member(&mut self, connection_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != connection_id);
        self.members.len() != before
    }

    /// Hand a membership over to another connection, keeping its position.
    pub fn transfer_member(&mut self, from: &str, to: &str) -> bool {
        if !self.is_member(from) {
            return false;
        }
        if self.is_member(to) {
            self.remove_member(from);
        } else if let Some(slot) = self.members.iter_mut().find(|m| *m == from) {
            *slot = to.to_string();
        }
        if self.creator == from {
            self.creator = to.to_string();
        }
        true
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Summary broadcast to everyone; history stays with the members.
    pub fn view(&self) -> GroupView {
        GroupView {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            members: self.members.clone(),
            created_at: self.created_at,
            messages: None,
        }
    }

    pub fn view_with_history(&self) -> GroupView {
        GroupView {
            messages: Some(self.messages().to_vec()),
            ..self.view()
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub creator: ConnectionId,
    pub members: Vec<ConnectionId>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
}

/// Time-based ids, forced strictly increasing so two events in the same
/// millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn next(&mut self, now: DateTime<Utc>) -> u64 {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        self.last = millis.max(self.last + 1);
        self.last
    }
}
