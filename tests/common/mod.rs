// Shared in-memory client for driving applications without a server.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::task::JoinHandle;
use trellis::{
    App, AppResult, Message, Scope,
    adapters::channel::{ChannelReceiver, ChannelSender, channel},
    ports::{MessageReceiver, MessageSender, SharedApp},
};

/// Collected HTTP response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Run one HTTP request with a single body chunk and collect the response.
pub async fn send_request(app: &dyn App, scope: Scope, body: &str) -> (AppResult<()>, TestResponse) {
    let (client_tx, app_rx) = channel(16);
    let (app_tx, client_rx) = channel(64);
    client_tx
        .send(Message::request_body(body.to_string(), false))
        .await
        .unwrap();
    let result = app.call(scope, app_rx, app_tx).await;
    (result, collect(&client_rx).await)
}

async fn collect(rx: &ChannelReceiver) -> TestResponse {
    let mut response = TestResponse {
        status: 0,
        headers: Vec::new(),
        body: String::new(),
    };
    while let Some(message) = rx.try_receive().await {
        match message {
            Message::HttpResponseStart { status, headers } => {
                response.status = status;
                response.headers = headers
                    .iter()
                    .map(|(k, v)| {
                        (
                            String::from_utf8_lossy(k).into_owned(),
                            String::from_utf8_lossy(v).into_owned(),
                        )
                    })
                    .collect();
            }
            Message::HttpResponseBody { body, .. } => {
                response.body.push_str(&String::from_utf8_lossy(&body));
            }
            other => panic!("unexpected message {}", other.kind()),
        }
    }
    response
}

/// Client end of a websocket session running on a spawned task.
pub struct WsClient {
    pub tx: Arc<ChannelSender>,
    pub rx: Arc<ChannelReceiver>,
    pub task: JoinHandle<AppResult<()>>,
}

impl WsClient {
    /// Spawn `app` for `scope` and send `websocket.connect`.
    pub async fn connect(app: SharedApp, scope: Scope) -> Self {
        let (tx, app_rx) = channel(16);
        let (app_tx, rx) = channel(16);
        let task = tokio::spawn(async move { app.call(scope, app_rx, app_tx).await });
        tx.send(Message::WebSocketConnect).await.unwrap();
        Self { tx, rx, task }
    }

    pub async fn send(&self, message: Message) {
        self.tx.send(message).await.unwrap();
    }

    pub async fn recv(&self) -> Message {
        self.rx.receive().await.unwrap()
    }
}
