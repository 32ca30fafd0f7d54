// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the Mythic client.

use thiserror::Error;

/// Result type using MythicError
pub type Result<T> = std::result::Result<T, MythicError>;

/// Errors produced by the Mythic transport layer.
#[derive(Debug, Error)]
pub enum MythicError {
    /// Login or refresh was rejected by the server.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP transport failure (connect, TLS handshake, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// TLS connector construction failed.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The GraphQL server returned errors for a query or mutation.
    #[error("graphql error: {0}")]
    GraphQl(String),

    /// A response body did not decode.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local file I/O during a download.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscription multiplexer is not accepting commands.
    #[error("subscription client closed")]
    SubscriptionClosed,

    /// The server answered outside the expected protocol.
    #[error("unexpected response: {0}")]
    Protocol(String),
}
