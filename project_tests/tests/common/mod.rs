#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use lib_polls::{BroadcastHub, MemoryPollStore, Principal, Role, TokenTable, VoteEngine};
use serde_json::{Value, json};
use servers::poll_logic::routes;
use servers::poll_logic::state::{AppState, ServerStore};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

pub const ADMIN: &str = "admin-token";
pub const MODERATOR: &str = "moderator-token";
pub const ALICE: &str = "alice-token";
pub const BOB: &str = "bob-token";
pub const CAROL: &str = "carol-token";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub base: String,
    pub ws_url: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

fn principal(identity: &str, username: &str, role: Role) -> Principal {
    Principal {
        identity: identity.to_string(),
        username: username.to_string(),
        role,
    }
}

pub async fn spawn_server() -> TestServer {
    let tokens = TokenTable::new()
        .with_token(ADMIN, principal("u-admin", "admin", Role::Admin))
        .with_token(MODERATOR, principal("u-mod", "moderator", Role::Moderator))
        .with_token(ALICE, principal("u-alice", "alice", Role::User))
        .with_token(BOB, principal("u-bob", "bob", Role::User))
        .with_token(CAROL, principal("u-carol", "carol", Role::User));

    let engine = VoteEngine::new(ServerStore::Memory(MemoryPollStore::new()), BroadcastHub::new(64));
    let state = AppState::new(engine, Arc::new(tokens));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = routes::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    TestServer {
        base: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        state,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Creates a poll as admin and returns its id.
    pub async fn create_poll(&self, question: &str, options: &[&str], start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> String {
        let resp = self
            .client
            .post(self.url("/api/polls"))
            .bearer_auth(ADMIN)
            .json(&json!({
                "question": question,
                "options": options,
                "startAt": start_at,
                "endAt": end_at,
            }))
            .send()
            .await
            .expect("create request");
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.expect("create body");
        body["id"].as_str().expect("poll id").to_string()
    }

    pub async fn open_poll(&self, question: &str, options: &[&str]) -> String {
        let now = Utc::now();
        self.create_poll(question, options, now - Duration::hours(1), now + Duration::hours(1))
            .await
    }

    pub async fn vote(&self, token: &str, poll_id: &str, option_index: i64) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/polls/vote/{poll_id}")))
            .bearer_auth(token)
            .json(&json!({ "optionIndex": option_index }))
            .send()
            .await
            .expect("vote request")
    }

    /// Connects a WebSocket viewer and waits for the greeting, after which
    /// the viewer is guaranteed to be registered with the hub.
    pub async fn viewer(&self) -> WsClient {
        let (mut ws, _) = connect_async(self.ws_url.as_str()).await.expect("ws connect");
        let hello = next_frame(&mut ws).await.expect("greeting");
        assert_eq!(hello["type"], "connected");
        ws
    }
}

/// Next JSON text frame, or `None` once the socket closes.
pub async fn next_frame(ws: &mut WsClient) -> Option<Value> {
    let deadline = std::time::Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).expect("json frame")),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

pub async fn error_type(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.expect("error body");
    body["errorType"].as_str().unwrap_or_default().to_string()
}
