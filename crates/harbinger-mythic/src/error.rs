// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the Mythic worker.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the worker's own paths. Reader-path upsert failures
/// are logged where they happen and never reach this type.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A Harbinger RPC failed.
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    /// The gRPC channel could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The Mythic transport failed.
    #[error("mythic error: {0}")]
    Mythic(#[from] mythic_client::MythicError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No task builder is registered for the implant's payload family.
    #[error("could not find the mapping for payload: {0}")]
    UnknownPayload(String),

    /// A command requiring a staged file was built without one.
    #[error("no files provided to run task")]
    MissingInputFile,

    /// The root context was cancelled while waiting on a task.
    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}
