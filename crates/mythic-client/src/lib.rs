// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mythic Client - authenticated transport to a Mythic C2 server.
//!
//! This crate wraps the three surfaces a worker needs from Mythic:
//!
//! - **REST**: `/auth` login and `/refresh` token renewal, the multipart
//!   upload webhook and the direct download endpoint
//! - **GraphQL over HTTPS**: queries and mutations against the Hasura API
//! - **GraphQL over WSS**: a `graphql-transport-ws` multiplexer carrying all
//!   live subscriptions on a single socket
//!
//! # Quick Start
//!
//! ```ignore
//! use mythic_client::MythicClient;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = MythicClient::login("mythic.local", 7443, "user", "pass").await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(100);
//! let subscription_id = client.task_subscription(tx)?;
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(async move { client.run_subscriptions(cancel).await });
//!
//! while let Some(task) = rx.recv().await {
//!     println!("task {} -> {}", task.id, task.status);
//! }
//! ```
//!
//! The session's bearer token is refreshed in place; requests and the
//! subscription socket always read the current value, so a refresh never
//! interrupts in-flight work.

pub mod client;
pub mod error;
pub mod session;
pub mod subscriptions;
pub mod types;

pub use client::MythicClient;
pub use error::{MythicError, Result};
pub use session::Session;
pub use subscriptions::SubscriptionClient;
pub use types::{
    Callback, CallbackCheckin, CallbackHost, CallbackRef, CreatedTask, FileDownload,
    FileDownloadTask, FileUploadResult, OperatorRef, PayloadInfo, PayloadTypeInfo, Proxy, Task,
    TaskOutput,
};
