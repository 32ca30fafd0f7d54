// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GraphQL subscription multiplexer over WebSocket.
//!
//! Implements the `graphql-transport-ws` protocol: one socket carries every
//! subscription, each identified by a client-chosen id. Subscriptions can be
//! registered before the multiplexer task starts; commands queue until the
//! connection is up. On transport errors the task reconnects with the
//! session's current bearer and re-subscribes everything that is still live.
//!
//! Delivery into the per-kind channels awaits `send`, so a full channel
//! blocks the socket reader and flow control propagates to the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MythicError, Result};
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ACK_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Messages sent to the server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    ConnectionInit { payload: Value },
    Subscribe { id: &'a str, payload: SubscribePayload<'a> },
    Complete { id: &'a str },
    Pong,
}

#[derive(Debug, Serialize)]
struct SubscribePayload<'a> {
    query: &'a str,
    variables: &'a Value,
}

/// Messages received from the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Next { id: String, payload: Value },
    Error { id: String, payload: Value },
    Complete { id: String },
    Ping,
    Pong,
    #[serde(other)]
    Unknown,
}

/// Consumes the `next` payloads of one subscription.
#[async_trait]
pub(crate) trait StreamHandler: Send + Sync {
    /// Deliver one payload. Returns `false` once the receiver is gone.
    async fn deliver(&self, payload: &Value) -> bool;
}

/// Decodes the stream field named `root` and forwards each element into a
/// bounded channel.
pub(crate) struct ChannelHandler<T> {
    root: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> ChannelHandler<T> {
    pub(crate) fn new(root: &'static str, tx: mpsc::Sender<T>) -> Self {
        Self { root, tx }
    }
}

#[async_trait]
impl<T> StreamHandler for ChannelHandler<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn deliver(&self, payload: &Value) -> bool {
        let Some(items) = payload
            .pointer(&format!("/data/{}", self.root))
            .and_then(Value::as_array)
        else {
            warn!(root = self.root, "subscription payload missing stream field");
            return true;
        };

        for item in items {
            match serde_json::from_value::<T>(item.clone()) {
                Ok(value) => {
                    if self.tx.send(value).await.is_err() {
                        return false;
                    }
                }
                Err(err) => {
                    warn!(root = self.root, error = %err, "failed to decode stream item");
                }
            }
        }
        true
    }
}

struct Subscription {
    id: String,
    query: String,
    variables: Value,
    handler: Arc<dyn StreamHandler>,
}

enum Command {
    Subscribe(Subscription),
    Unsubscribe(String),
    Close,
}

enum Exit {
    Closed,
    Cancelled,
}

/// Handle for registering and releasing subscriptions.
///
/// `run` drives the socket; it is started once by the owning client and ends
/// on `close()` or cancellation.
pub struct SubscriptionClient {
    session: Arc<Session>,
    commands: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl SubscriptionClient {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        Self {
            session,
            commands,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// Register a subscription delivering decoded stream items into `tx`.
    /// Returns the subscription id used for [`unsubscribe`](Self::unsubscribe).
    pub(crate) fn subscribe<T>(
        &self,
        query: &str,
        variables: Value,
        root: &'static str,
        tx: mpsc::Sender<T>,
    ) -> Result<String>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let subscription = Subscription {
            id: id.clone(),
            query: query.to_string(),
            variables,
            handler: Arc::new(ChannelHandler::new(root, tx)),
        };
        self.commands
            .send(Command::Subscribe(subscription))
            .map_err(|_| MythicError::SubscriptionClosed)?;
        Ok(id)
    }

    /// Release one subscription. A `complete` is sent upstream.
    pub fn unsubscribe(&self, id: &str) {
        let _ = self.commands.send(Command::Unsubscribe(id.to_string()));
    }

    /// Complete all subscriptions and shut the multiplexer down.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Drive the socket until `close()` or cancellation. Reconnects on
    /// transport errors.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| MythicError::Protocol("subscription client already running".into()))?;
        let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect(&subscriptions).await {
                Ok(ws) => {
                    info!("subscription socket connected");
                    match self
                        .drive(ws, &mut inbox, &mut subscriptions, &cancel)
                        .await
                    {
                        Ok(Exit::Closed) => {
                            info!("subscription client closed");
                            return Ok(());
                        }
                        Ok(Exit::Cancelled) => return Ok(()),
                        Err(err) => warn!(error = %err, "subscription socket failed, reconnecting"),
                    }
                }
                Err(err) => warn!(error = %err, "subscription connect failed, retrying"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    /// Dial, perform the `connection_init` handshake and re-subscribe
    /// everything already registered.
    async fn connect(&self, subscriptions: &HashMap<String, Subscription>) -> Result<WsStream> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        let mut request = self.session.ws_url().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("graphql-transport-ws"),
        );

        let (mut ws, _) = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::NativeTls(connector)),
        )
        .await?;

        let init = ClientMessage::ConnectionInit {
            payload: json!({"headers": {"Authorization": self.session.bearer()}}),
        };
        ws.send(text_message(&init)?).await?;

        tokio::time::timeout(ACK_TIMEOUT, wait_for_ack(&mut ws))
            .await
            .map_err(|_| MythicError::Protocol("timed out waiting for connection_ack".into()))??;

        for subscription in subscriptions.values() {
            ws.send(subscribe_message(subscription)?).await?;
        }
        Ok(ws)
    }

    async fn drive(
        &self,
        mut ws: WsStream,
        inbox: &mut mpsc::UnboundedReceiver<Command>,
        subscriptions: &mut HashMap<String, Subscription>,
        cancel: &CancellationToken,
    ) -> Result<Exit> {
        loop {
            // Commands are polled before cancellation; a queued `Close` is
            // honored even when both are ready.
            tokio::select! {
                biased;

                command = inbox.recv() => {
                    match command {
                        Some(Command::Subscribe(subscription)) => {
                            // Register before sending so a failed send is
                            // replayed by the reconnect path.
                            let message = subscribe_message(&subscription)?;
                            subscriptions.insert(subscription.id.clone(), subscription);
                            ws.send(message).await?;
                        }
                        Some(Command::Unsubscribe(id)) => {
                            if subscriptions.remove(&id).is_some() {
                                ws.send(text_message(&ClientMessage::Complete { id: &id })?).await?;
                            }
                        }
                        Some(Command::Close) | None => {
                            for id in subscriptions.keys() {
                                if let Ok(message) = text_message(&ClientMessage::Complete { id }) {
                                    let _ = ws.send(message).await;
                                }
                            }
                            subscriptions.clear();
                            let _ = ws.close(None).await;
                            return Ok(Exit::Closed);
                        }
                    }
                }

                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(Exit::Cancelled);
                }

                message = ws.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => return Err(err.into()),
                        None => return Err(MythicError::Protocol("websocket closed".into())),
                    };
                    match message {
                        Message::Text(text) => {
                            self.handle_server_message(&mut ws, subscriptions, &text).await?;
                        }
                        Message::Ping(data) => ws.send(Message::Pong(data)).await?,
                        Message::Close(_) => {
                            return Err(MythicError::Protocol("websocket closed".into()))
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_server_message(
        &self,
        ws: &mut WsStream,
        subscriptions: &mut HashMap<String, Subscription>,
        text: &str,
    ) -> Result<()> {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "unparseable subscription message");
                return Ok(());
            }
        };

        match message {
            ServerMessage::Next { id, payload } => {
                if let Some(subscription) = subscriptions.get(&id) {
                    if !subscription.handler.deliver(&payload).await {
                        // Receiver dropped, release the subscription upstream.
                        debug!(id = %id, "subscription receiver gone");
                        subscriptions.remove(&id);
                        ws.send(text_message(&ClientMessage::Complete { id: &id })?)
                            .await?;
                    }
                }
            }
            ServerMessage::Error { id, payload } => {
                warn!(id = %id, payload = %payload, "subscription error");
            }
            ServerMessage::Complete { id } => {
                subscriptions.remove(&id);
            }
            ServerMessage::Ping => ws.send(text_message(&ClientMessage::Pong)?).await?,
            ServerMessage::ConnectionAck | ServerMessage::Pong | ServerMessage::Unknown => {}
        }
        Ok(())
    }
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<()> {
    loop {
        let message = match ws.next().await {
            Some(message) => message?,
            None => return Err(MythicError::Protocol("websocket closed during ack".into())),
        };
        match message {
            Message::Text(text) => {
                if let Ok(ServerMessage::ConnectionAck) = serde_json::from_str(&text) {
                    return Ok(());
                }
            }
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(_) => {
                return Err(MythicError::Protocol("websocket closed during ack".into()))
            }
            _ => {}
        }
    }
}

fn text_message(message: &ClientMessage<'_>) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(message)?))
}

fn subscribe_message(subscription: &Subscription) -> Result<Message> {
    text_message(&ClientMessage::Subscribe {
        id: &subscription.id,
        payload: SubscribePayload {
            query: &subscription.query,
            variables: &subscription.variables,
        },
    })
}
