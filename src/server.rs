use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::config::ServerConfig;
use crate::error::RouterError;
use crate::messages::ClientMessage;
use crate::models::ConnectionId;
use crate::router::{Delivery, SessionRouter};

/// Router state plus the outbound queue of every open socket. Kept behind
/// one lock so frames leave in the order the router produced them.
struct Hub {
    router: SessionRouter,
    outlets: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl Hub {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let frame = match serde_json::to_string(&delivery.message) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to encode outbound frame: {e}");
                    continue;
                }
            };
            for connection_id in &delivery.to {
                if let Some(sender) = self.outlets.get(connection_id) {
                    let _ = sender.send(Message::text(frame.clone()));
                }
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    message: &'static str,
    users: usize,
    messages: usize,
    groups: usize,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsReport {
    total_users: usize,
    connected_users: usize,
    total_messages: usize,
    total_groups: usize,
    uptime: f64,
}

#[derive(Clone)]
pub struct Server {
    hub: Arc<Mutex<Hub>>,
    started: Instant,
}

impl Server {
    pub fn new(config: &ServerConfig) -> Self {
        Server {
            hub: Arc::new(Mutex::new(Hub {
                router: SessionRouter::new(config),
                outlets: HashMap::new(),
            })),
            started: Instant::now(),
        }
    }

    /// Periodically purge disconnected participants past their retention.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let purged = hub.lock().await.router.sweep(Utc::now());
                if purged > 0 {
                    info!("Retention sweep purged {purged} participants");
                }
            }
        })
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let connection_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let mut hub = self.hub.lock().await;
            hub.router.connect(&connection_id);
            hub.outlets.insert(connection_id.clone(), tx);
        }
        info!("Connection opened: {connection_id}");

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    error!("Failed to send WebSocket message: {e}");
                    break;
                }
            }
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) if msg.is_ping() || msg.is_pong() => {}
                Ok(msg) => match msg.to_str() {
                    Ok(text) => self.handle_text(&connection_id, text).await,
                    Err(()) => {
                        let err = RouterError::BadRequest("only text frames are accepted".into());
                        self.reject(&connection_id, &err).await;
                    }
                },
                Err(e) => {
                    error!("WebSocket error on {connection_id}: {e}");
                    break;
                }
            }
        }

        self.handle_disconnect(&connection_id).await;
    }

    async fn handle_text(&self, connection_id: &str, text: &str) {
        debug!("Frame from {connection_id}: {text}");
        let mut hub = self.hub.lock().await;
        let deliveries = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => hub.router.dispatch(connection_id, message, Utc::now()),
            Err(e) => hub
                .router
                .reject(connection_id, &RouterError::BadRequest(e.to_string())),
        };
        hub.deliver(deliveries);
    }

    async fn reject(&self, connection_id: &str, err: &RouterError) {
        let hub = self.hub.lock().await;
        let deliveries = hub.router.reject(connection_id, err);
        hub.deliver(deliveries);
    }

    async fn handle_disconnect(&self, connection_id: &str) {
        let mut hub = self.hub.lock().await;
        hub.outlets.remove(connection_id);
        let deliveries = hub.router.disconnect(connection_id, Utc::now());
        hub.deliver(deliveries);
        info!("Connection closed: {connection_id}");
    }

    async fn health(&self) -> Health {
        let stats = self.hub.lock().await.router.stats();
        Health {
            message: "Chat server running",
            users: stats.connected_users,
            messages: stats.total_messages,
            groups: stats.total_groups,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    async fn stats(&self) -> StatsReport {
        let stats = self.hub.lock().await.router.stats();
        StatsReport {
            total_users: stats.total_users,
            connected_users: stats.connected_users,
            total_messages: stats.total_messages,
            total_groups: stats.total_groups,
            uptime: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// `/ws` upgrade plus the read-only `/` and `/stats` snapshots.
pub fn routes(server: Server) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_server = server.clone();
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = ws_server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket).await;
            })
        });

    let health_server = server.clone();
    let health = warp::path::end().and(warp::get()).then(move || {
        let server = health_server.clone();
        async move { warp::reply::json(&server.health().await) }
    });

    let stats = warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .then(move || {
            let server = server.clone();
            async move { warp::reply::json(&server.stats().await) }
        });

    ws_route
        .or(health)
        .or(stats)
        .with(warp::cors().allow_any_origin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use warp::test::WsClient;

    async fn connect(server: &Server) -> WsClient {
        warp::test::ws()
            .path("/ws")
            .handshake(routes(server.clone()))
            .await
            .expect("handshake")
    }

    async fn recv_json(client: &mut WsClient) -> Value {
        let msg = client.recv().await.expect("frame");
        serde_json::from_str(msg.to_str().expect("text frame")).expect("json frame")
    }

    async fn send_json(client: &mut WsClient, value: Value) {
        client.send_text(value.to_string()).await;
    }

    /// Join and drain the four frames a join produces for the joiner.
    async fn join(client: &mut WsClient, username: &str) -> Vec<Value> {
        send_json(client, json!({"event": "join", "data": {"username": username}})).await;
        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(recv_json(client).await);
        }
        frames
    }

    #[tokio::test]
    async fn join_then_global_message() {
        let server = Server::new(&ServerConfig::default());
        let mut alice = connect(&server).await;
        let frames = join(&mut alice, "alice").await;
        let events: Vec<_> = frames.iter().map(|f| f["event"].clone()).collect();
        assert_eq!(events, [json!("users"), json!("messages"), json!("groups"), json!("userJoined")]);
        assert_eq!(frames[3]["data"]["username"], "alice");
        assert_eq!(frames[3]["data"]["status"], "online");

        let mut bob = connect(&server).await;
        join(&mut bob, "bob").await;
        // alice hears the roster refresh and bob's arrival
        assert_eq!(recv_json(&mut alice).await["event"], "users");
        assert_eq!(recv_json(&mut alice).await["data"]["username"], "bob");

        send_json(&mut alice, json!({"event": "message", "data": {"text": "hi"}})).await;
        for client in [&mut alice, &mut bob] {
            let frame = recv_json(client).await;
            assert_eq!(frame["event"], "message");
            assert_eq!(frame["data"]["text"], "hi");
            assert_eq!(frame["data"]["sender"], "alice");
            assert_eq!(frame["data"]["groupId"], Value::Null);
        }
    }

    #[tokio::test]
    async fn malformed_frames_get_error_and_connection_survives() {
        let server = Server::new(&ServerConfig::default());
        let mut client = connect(&server).await;

        client.send_text("not json").await;
        let frame = recv_json(&mut client).await;
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["data"]["code"], "badRequest");

        send_json(&mut client, json!({"event": "message", "data": {"text": "hi"}})).await;
        assert_eq!(recv_json(&mut client).await["data"]["code"], "notJoined");

        send_json(&mut client, json!({"event": "ping"})).await;
        assert_eq!(recv_json(&mut client).await, json!({"event": "pong"}));
    }

    #[tokio::test]
    async fn binary_frames_are_rejected() {
        let server = Server::new(&ServerConfig::default());
        let mut client = connect(&server).await;

        client.send(Message::binary(vec![1, 2, 3])).await;
        let frame = recv_json(&mut client).await;
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["data"]["code"], "badRequest");

        join(&mut client, "alice").await;
    }

    #[tokio::test]
    async fn explicit_disconnect_notifies_others() {
        let server = Server::new(&ServerConfig::default());
        let mut alice = connect(&server).await;
        join(&mut alice, "alice").await;
        let mut bob = connect(&server).await;
        join(&mut bob, "bob").await;
        recv_json(&mut alice).await;
        recv_json(&mut alice).await;

        send_json(&mut bob, json!({"event": "disconnectUser"})).await;
        let frame = recv_json(&mut alice).await;
        assert_eq!(frame["event"], "userLeft");
        assert_eq!(frame["data"]["status"], "disconnected");
        let frame = recv_json(&mut alice).await;
        assert_eq!(frame["event"], "users");
        assert_eq!(frame["data"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn status_endpoints_report_counts() {
        let server = Server::new(&ServerConfig::default());
        let filter = routes(server.clone());
        let mut alice = connect(&server).await;
        join(&mut alice, "alice").await;
        send_json(&mut alice, json!({"event": "createGroup", "data": {"name": "team"}})).await;
        assert_eq!(recv_json(&mut alice).await["event"], "groupCreated");

        let res = warp::test::request().path("/").reply(&filter).await;
        assert_eq!(res.status(), 200);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["users"], 1);
        assert_eq!(body["groups"], 1);
        assert_eq!(body["messages"], 0);

        let res = warp::test::request().path("/stats").reply(&filter).await;
        assert_eq!(res.status(), 200);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["totalUsers"], 1);
        assert_eq!(body["connectedUsers"], 1);
        assert_eq!(body["totalGroups"], 1);
        assert!(body["uptime"].as_f64().is_some());
    }
}
