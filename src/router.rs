//! Session router: presence, group membership and message routing.
//!
//! The router never touches a socket. Every operation mutates state and
//! returns the frames to deliver, each paired with its resolved recipients,
//! so the transport can fan them out in the order they were produced.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::RouterError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::models::{
    ChatMessage, ConnectionId, Group, GroupView, IdGenerator, Participant, Status,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: Vec<ConnectionId>,
    pub message: ServerMessage,
}

#[derive(Debug, Clone)]
struct Limits {
    max_message_len: usize,
    max_username_len: usize,
    max_group_name_len: usize,
    max_group_description_len: usize,
    default_avatar: String,
    retention: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_users: usize,
    pub connected_users: usize,
    pub total_messages: usize,
    pub total_groups: usize,
}

pub struct SessionRouter {
    limits: Limits,
    /// Open transport connections, joined or not, in connect order.
    connections: Vec<ConnectionId>,
    /// Participant records keyed by username.
    participants: HashMap<String, Participant>,
    /// Which username each joined connection is bound to.
    by_connection: HashMap<ConnectionId, String>,
    messages: Vec<ChatMessage>,
    groups: HashMap<String, Group>,
    group_order: Vec<String>,
    ids: IdGenerator,
}

type Outcome = Result<Vec<Delivery>, RouterError>;

impl SessionRouter {
    pub fn new(config: &ServerConfig) -> Self {
        SessionRouter {
            limits: Limits {
                max_message_len: config.max_message_len,
                max_username_len: config.max_username_len,
                max_group_name_len: config.max_group_name_len,
                max_group_description_len: config.max_group_description_len,
                default_avatar: config.default_avatar.clone(),
                retention: config.retention,
            },
            connections: Vec::new(),
            participants: HashMap::new(),
            by_connection: HashMap::new(),
            messages: Vec::new(),
            groups: HashMap::new(),
            group_order: Vec::new(),
            ids: IdGenerator::default(),
        }
    }

    pub fn connect(&mut self, connection_id: &str) {
        if !self.connections.iter().any(|c| c == connection_id) {
            self.connections.push(connection_id.to_string());
        }
    }

    /// Run one inbound event to completion. Failures become a private
    /// `error` frame for the sender; they never reach anyone else.
    pub fn dispatch(
        &mut self,
        connection_id: &str,
        message: ClientMessage,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        let outcome = match message {
            ClientMessage::Join { username, avatar } => {
                self.join(connection_id, &username, avatar.as_deref(), now)
            }
            ClientMessage::Message { text, group_id } => {
                self.send_message(connection_id, &text, group_id, now)
            }
            ClientMessage::Typing { is_typing, group_id } => {
                self.set_typing(connection_id, is_typing, group_id)
            }
            ClientMessage::CreateGroup { name, description } => {
                self.create_group(connection_id, &name, description.as_deref(), now)
            }
            ClientMessage::JoinGroup { group_id } => self.join_group(connection_id, &group_id),
            ClientMessage::LeaveGroup { group_id } => self.leave_group(connection_id, &group_id),
            ClientMessage::SetStatus { status } => self.set_status(connection_id, status, now),
            ClientMessage::GetUsers => {
                Ok(vec![self.private(connection_id, ServerMessage::Users(self.roster()))])
            }
            ClientMessage::GetGroups => {
                Ok(vec![self.private(connection_id, ServerMessage::Groups(self.group_views()))])
            }
            ClientMessage::Ping => Ok(vec![self.private(connection_id, ServerMessage::Pong)]),
            ClientMessage::DisconnectUser => self.disconnect_user(connection_id, now),
        };

        outcome.unwrap_or_else(|err| self.reject(connection_id, &err))
    }

    /// Private error frame for a rejected event.
    pub fn reject(&self, connection_id: &str, err: &RouterError) -> Vec<Delivery> {
        warn!("Rejected event from {connection_id}: {err}");
        vec![self.private(connection_id, ServerMessage::from(err))]
    }

    /// Register a participant, or merge into the existing record when the
    /// username is already known.
    pub fn join(
        &mut self,
        connection_id: &str,
        username: &str,
        avatar: Option<&str>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let username = bounded("Username", username, self.limits.max_username_len)?;
        let avatar = avatar
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.limits.default_avatar.as_str())
            .to_string();

        let mut retired = Vec::new();
        if let Some(previous) = self.by_connection.get(connection_id) {
            if *previous != username {
                let previous = previous.clone();
                info!("Connection {connection_id} rejoining as {username}, retiring {previous}");
                self.by_connection.remove(connection_id);
                retired = self.retire(connection_id, &previous, now);
            }
        }

        let mut transferred = Vec::new();
        let participant = match self.participants.get_mut(&username) {
            Some(existing) => {
                let previous = existing.reconnect(connection_id.to_string(), avatar, now);
                let participant = existing.clone();
                // A soft-marked record can point at a connection that has
                // since joined under another name; leave that binding alone.
                let still_bound = self.by_connection.get(&previous) == Some(&username);
                if previous != connection_id && still_bound {
                    debug!("Merging {username} from {previous} into {connection_id}");
                    self.by_connection.remove(&previous);
                    transferred = self.transfer_memberships(&previous, connection_id);
                }
                participant
            }
            None => {
                let participant =
                    Participant::new(connection_id.to_string(), username.clone(), avatar, now);
                self.participants.insert(username.clone(), participant.clone());
                participant
            }
        };
        self.by_connection.insert(connection_id.to_string(), username.clone());

        info!(
            "User {username} joined on {connection_id}. Total users: {}",
            self.connected_count()
        );

        let mut outbound = retired;
        outbound.extend([
            self.everyone(ServerMessage::Users(self.roster())),
            self.private(connection_id, ServerMessage::Messages(self.messages.clone())),
            self.private(connection_id, ServerMessage::Groups(self.group_views())),
            self.everyone(ServerMessage::UserJoined(participant)),
        ]);
        outbound.append(&mut transferred);
        Ok(outbound)
    }

    /// Hand every group membership held by `from` over to `to`.
    fn transfer_memberships(&mut self, from: &str, to: &str) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for group_id in &self.group_order {
            if let Some(group) = self.groups.get_mut(group_id) {
                if group.transfer_member(from, to) {
                    deliveries.push(Delivery {
                        to: self.connections.clone(),
                        message: ServerMessage::GroupUpdated(group.view()),
                    });
                }
            }
        }
        deliveries
    }

    pub fn send_message(
        &mut self,
        connection_id: &str,
        text: &str,
        group_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let sender = self.participant_for(connection_id)?.username.clone();
        let text = bounded("Message", text, self.limits.max_message_len)?;

        if let Some(group_id) = &group_id {
            self.member_group(connection_id, group_id)?;
        }

        let message = ChatMessage {
            id: self.ids.next(now),
            text,
            sender,
            sender_id: connection_id.to_string(),
            timestamp: now,
            group_id: group_id.clone(),
        };
        debug!("Message from {}: {}", message.sender, message.text);

        match group_id {
            None => {
                self.messages.push(message.clone());
                Ok(vec![self.everyone(ServerMessage::Message(message))])
            }
            Some(group_id) => {
                let Some(group) = self.groups.get_mut(&group_id) else {
                    return Err(RouterError::NotFound(group_id));
                };
                group.push_message(message.clone());
                let to = group.members().to_vec();
                Ok(vec![Delivery {
                    to,
                    message: ServerMessage::GroupMessage { group_id, message },
                }])
            }
        }
    }

    pub fn set_typing(
        &mut self,
        connection_id: &str,
        is_typing: bool,
        group_id: Option<String>,
    ) -> Outcome {
        let username = self.participant_for(connection_id)?.username.clone();

        let to = match &group_id {
            Some(group_id) => self
                .member_group(connection_id, group_id)?
                .members()
                .iter()
                .filter(|m| *m != connection_id)
                .cloned()
                .collect(),
            None => self.others(connection_id),
        };

        Ok(vec![Delivery {
            to,
            message: ServerMessage::UserTyping { username, is_typing, group_id },
        }])
    }

    pub fn create_group(
        &mut self,
        connection_id: &str,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let creator = self.participant_for(connection_id)?.username.clone();
        let name = bounded("Group name", name, self.limits.max_group_name_len)?;
        let description = description.map(str::trim).unwrap_or_default();
        if description.chars().count() > self.limits.max_group_description_len {
            return Err(RouterError::Validation(format!(
                "Group description exceeds {} characters",
                self.limits.max_group_description_len
            )));
        }

        let id = self.ids.next(now).to_string();
        let group = Group::new(
            id.clone(),
            name,
            description.to_string(),
            connection_id.to_string(),
            now,
        );
        info!("Group \"{}\" ({id}) created by {creator}", group.name);

        let view = group.view();
        self.groups.insert(id.clone(), group);
        self.group_order.push(id);
        Ok(vec![self.everyone(ServerMessage::GroupCreated(view))])
    }

    pub fn join_group(&mut self, connection_id: &str, group_id: &str) -> Outcome {
        let username = self.participant_for(connection_id)?.username.clone();
        let Some(group) = self.groups.get_mut(group_id) else {
            return Err(RouterError::NotFound(group_id.to_string()));
        };
        if !group.add_member(connection_id.to_string()) {
            return Err(RouterError::AlreadyMember(group_id.to_string()));
        }
        info!("{username} joined group \"{}\"", group.name);

        let joined = group.view_with_history();
        let updated = group.view();
        Ok(vec![
            self.private(connection_id, ServerMessage::GroupJoined(joined)),
            self.everyone(ServerMessage::GroupUpdated(updated)),
        ])
    }

    /// Leaving does not check membership first; it always answers.
    pub fn leave_group(&mut self, connection_id: &str, group_id: &str) -> Outcome {
        let Some(group) = self.groups.get_mut(group_id) else {
            return Err(RouterError::NotFound(group_id.to_string()));
        };
        group.remove_member(connection_id);
        info!("{connection_id} left group \"{}\"", group.name);

        let updated = group.view();
        Ok(vec![
            self.private(
                connection_id,
                ServerMessage::GroupLeft { group_id: group_id.to_string() },
            ),
            self.everyone(ServerMessage::GroupUpdated(updated)),
        ])
    }

    pub fn set_status(&mut self, connection_id: &str, status: Status, now: DateTime<Utc>) -> Outcome {
        if status == Status::Disconnected {
            return Err(RouterError::Validation(
                "Use disconnectUser to leave the chat".to_string(),
            ));
        }
        let username = self.participant_for(connection_id)?.username.clone();
        let Some(participant) = self.participants.get_mut(&username) else {
            return Err(RouterError::NotJoined);
        };
        participant.status = status;
        participant.last_seen = now;
        let updated = participant.clone();

        Ok(vec![
            self.everyone(ServerMessage::UserUpdated(updated)),
            self.everyone(ServerMessage::Users(self.roster())),
        ])
    }

    /// Explicit, client-initiated departure. The socket stays registered.
    pub fn disconnect_user(&mut self, connection_id: &str, now: DateTime<Utc>) -> Outcome {
        if !self.by_connection.contains_key(connection_id) {
            return Err(RouterError::NotJoined);
        }
        Ok(self.depart(connection_id, now))
    }

    /// Transport-detected disconnect.
    pub fn disconnect(&mut self, connection_id: &str, now: DateTime<Utc>) -> Vec<Delivery> {
        self.connections.retain(|c| c != connection_id);
        self.depart(connection_id, now)
    }

    /// Unbind `connection_id`, drop its group memberships and retire the
    /// participant it was bound to.
    fn depart(&mut self, connection_id: &str, now: DateTime<Utc>) -> Vec<Delivery> {
        let Some(username) = self.by_connection.remove(connection_id) else {
            return Vec::new();
        };

        let others = self.others(connection_id);
        let mut deliveries = Vec::new();
        for group_id in &self.group_order {
            if let Some(group) = self.groups.get_mut(group_id) {
                if group.remove_member(connection_id) {
                    deliveries.push(Delivery {
                        to: others.clone(),
                        message: ServerMessage::GroupUpdated(group.view()),
                    });
                }
            }
        }
        deliveries.extend(self.retire(connection_id, &username, now));
        deliveries
    }

    /// Soft-mark `username` and announce the departure to every other
    /// connection. The record stays until the retention sweep purges it.
    fn retire(
        &mut self,
        connection_id: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        let Some(participant) = self.participants.get_mut(username) else {
            return Vec::new();
        };
        participant.mark_disconnected(now);
        let departed = participant.clone();

        info!(
            "User {username} left. Connected users: {}",
            self.connected_count()
        );
        let others = self.others(connection_id);
        vec![
            Delivery {
                to: others.clone(),
                message: ServerMessage::UserLeft(departed),
            },
            Delivery {
                to: others,
                message: ServerMessage::Users(self.roster()),
            },
        ]
    }

    /// Purge disconnected participants older than the retention window.
    /// Returns how many records were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.limits.retention;
        let before = self.participants.len();
        self.participants.retain(|_, p| {
            p.is_connected()
                || (now - p.last_seen)
                    .to_std()
                    .map_or(true, |age| age < retention)
        });
        let purged = before - self.participants.len();
        if !self.participants.is_empty() {
            info!(
                "Users in memory: {}, connected: {}, purged: {purged}",
                self.participants.len(),
                self.connected_count()
            );
        }
        purged
    }

    pub fn stats(&self) -> Stats {
        Stats {
            total_users: self.participants.len(),
            connected_users: self.connected_count(),
            total_messages: self.messages.len(),
            total_groups: self.groups.len(),
        }
    }

    /// Non-disconnected participants, oldest join first.
    pub fn roster(&self) -> Vec<Participant> {
        let mut roster: Vec<Participant> = self
            .participants
            .values()
            .filter(|p| p.is_connected())
            .cloned()
            .collect();
        roster.sort_by(|a, b| {
            a.join_time
                .cmp(&b.join_time)
                .then_with(|| a.username.cmp(&b.username))
        });
        roster
    }

    fn group_views(&self) -> Vec<GroupView> {
        self.group_order
            .iter()
            .filter_map(|id| self.groups.get(id))
            .map(Group::view)
            .collect()
    }

    fn connected_count(&self) -> usize {
        self.participants.values().filter(|p| p.is_connected()).count()
    }

    fn participant_for(&self, connection_id: &str) -> Result<&Participant, RouterError> {
        self.by_connection
            .get(connection_id)
            .and_then(|username| self.participants.get(username))
            .ok_or(RouterError::NotJoined)
    }

    fn member_group(&self, connection_id: &str, group_id: &str) -> Result<&Group, RouterError> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| RouterError::NotFound(group_id.to_string()))?;
        if !group.is_member(connection_id) {
            return Err(RouterError::NotAMember(group_id.to_string()));
        }
        Ok(group)
    }

    fn others(&self, connection_id: &str) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|c| *c != connection_id)
            .cloned()
            .collect()
    }

    fn everyone(&self, message: ServerMessage) -> Delivery {
        Delivery {
            to: self.connections.clone(),
            message,
        }
    }

    fn private(&self, connection_id: &str, message: ServerMessage) -> Delivery {
        Delivery {
            to: vec![connection_id.to_string()],
            message,
        }
    }
}

/// Trim `value` and check it is non-empty and within `max` characters.
fn bounded(what: &str, value: &str, max: usize) -> Result<String, RouterError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RouterError::Validation(format!("{what} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(RouterError::Validation(format!(
            "{what} exceeds {max} characters"
        )));
    }
    Ok(value.to_string())
}
