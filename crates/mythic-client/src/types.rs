// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the Mythic GraphQL and REST APIs.
//!
//! All structs decode from Hasura-shaped JSON. They are marked
//! `#[serde(default)]` so records with missing fields decode to zero values,
//! and nullable columns use [`null_default`] so explicit `null` does the same.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize `null` as the type's default value.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LoginMessage {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RefreshMessage {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// The payload type a callback was built from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadTypeInfo {
    pub name: String,
}

/// The payload a callback was built from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadInfo {
    #[serde(deserialize_with = "null_default")]
    pub os: String,
    #[serde(deserialize_with = "null_default")]
    pub description: String,
    #[serde(deserialize_with = "null_default")]
    pub uuid: String,
    pub payloadtype: PayloadTypeInfo,
}

/// A running agent as Mythic sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Callback {
    pub id: i64,
    pub display_id: i64,
    #[serde(deserialize_with = "null_default")]
    pub agent_callback_id: String,
    #[serde(deserialize_with = "null_default")]
    pub host: String,
    #[serde(deserialize_with = "null_default")]
    pub os: String,
    #[serde(deserialize_with = "null_default")]
    pub architecture: String,
    #[serde(deserialize_with = "null_default")]
    pub description: String,
    #[serde(deserialize_with = "null_default")]
    pub domain: String,
    #[serde(deserialize_with = "null_default")]
    pub external_ip: String,
    #[serde(deserialize_with = "null_default")]
    pub ip: String,
    pub integrity_level: i64,
    #[serde(deserialize_with = "null_default")]
    pub extra_info: String,
    #[serde(deserialize_with = "null_default")]
    pub sleep_info: String,
    pub pid: i64,
    #[serde(deserialize_with = "null_default")]
    pub user: String,
    pub operation_id: i64,
    #[serde(deserialize_with = "null_default")]
    pub process_name: String,
    #[serde(deserialize_with = "null_default")]
    pub last_checkin: String,
    pub payload: PayloadInfo,
}

/// Minimal callback record delivered by the checkin live query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackCheckin {
    pub id: i64,
    #[serde(deserialize_with = "null_default")]
    pub last_checkin: String,
}

/// Internal and display ids of a callback, as nested under tasks and files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackRef {
    pub id: i64,
    pub display_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorRef {
    #[serde(deserialize_with = "null_default")]
    pub username: String,
}

/// A task issued to a callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: i64,
    pub display_id: i64,
    pub callback: CallbackRef,
    pub operator: OperatorRef,
    #[serde(deserialize_with = "null_default")]
    pub status: String,
    pub completed: bool,
    #[serde(deserialize_with = "null_default")]
    pub original_params: String,
    #[serde(deserialize_with = "null_default")]
    pub display_params: String,
    #[serde(deserialize_with = "null_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_default")]
    pub status_timestamp_processing: String,
    #[serde(deserialize_with = "null_default")]
    pub command_name: String,
}

/// One response record emitted by a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOutput {
    pub id: i64,
    #[serde(deserialize_with = "null_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_default")]
    pub response_text: String,
    pub task: Task,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackHost {
    #[serde(deserialize_with = "null_default")]
    pub host: String,
}

/// A SOCKS port opened on a callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Proxy {
    pub id: i64,
    pub deleted: bool,
    pub local_port: i64,
    #[serde(deserialize_with = "null_default")]
    pub port_type: String,
    pub callback: CallbackHost,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDownloadTask {
    pub callback: CallbackRef,
}

/// A completed file download staged on the Mythic server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDownload {
    pub id: i64,
    #[serde(deserialize_with = "null_default")]
    pub filename_utf8: String,
    #[serde(deserialize_with = "null_default")]
    pub md5: String,
    #[serde(deserialize_with = "null_default")]
    pub sha1: String,
    pub task_id: i64,
    #[serde(deserialize_with = "null_default")]
    pub agent_file_id: String,
    pub task: FileDownloadTask,
}

/// Result of the `createTask` mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatedTask {
    pub id: i64,
    pub display_id: i64,
    #[serde(deserialize_with = "null_default")]
    pub status: String,
    #[serde(deserialize_with = "null_default")]
    pub error: String,
}

/// Result of registering a file via the upload webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileUploadResult {
    pub agent_file_id: String,
    #[serde(deserialize_with = "null_default")]
    pub status: String,
    #[serde(deserialize_with = "null_default")]
    pub error: String,
}
