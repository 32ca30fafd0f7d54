// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! High-level Mythic client: GraphQL queries and mutations, subscription
//! registration and file transfer.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{MythicError, Result};
use crate::session::Session;
use crate::subscriptions::SubscriptionClient;
use crate::types::{
    Callback, CallbackCheckin, CreatedTask, FileDownload, FileUploadResult, Proxy, Task,
    TaskOutput,
};

const TASK_FIELDS: &str = "
  id
  display_id
  status
  completed
  original_params
  display_params
  timestamp
  status_timestamp_processing
  command_name
  operator { username }
  callback { id display_id }
";

const CALLBACK_FIELDS: &str = "
  id
  display_id
  agent_callback_id
  host
  os
  architecture
  description
  domain
  external_ip
  ip
  integrity_level
  extra_info
  sleep_info
  pid
  user
  operation_id
  process_name
  last_checkin
  payload { os description uuid payloadtype { name } }
";

const FILE_DOWNLOAD_FIELDS: &str = "
  id
  filename_utf8
  md5
  sha1
  task_id
  agent_file_id
  task { callback { id display_id } }
";

const PROXY_FIELDS: &str = "
  id
  deleted
  local_port
  port_type
  callback { host }
";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Client for one Mythic server. Owns the authenticated session and the
/// subscription multiplexer.
pub struct MythicClient {
    session: Arc<Session>,
    subscriptions: SubscriptionClient,
}

impl MythicClient {
    /// Log in over HTTPS (the common deployment; the server's self-signed
    /// certificate is tolerated).
    pub async fn login(hostname: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        Self::connect(hostname, port, username, password, true).await
    }

    /// Log in over plain HTTP, for deployments that terminate TLS in front
    /// of the Mythic server.
    pub async fn login_plaintext(
        hostname: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        Self::connect(hostname, port, username, password, false).await
    }

    async fn connect(
        hostname: &str,
        port: u16,
        username: &str,
        password: &str,
        tls: bool,
    ) -> Result<Self> {
        let session = Arc::new(Session::login(hostname, port, username, password, tls).await?);
        let subscriptions = SubscriptionClient::new(session.clone());
        Ok(Self {
            session,
            subscriptions,
        })
    }

    /// Refresh the session's bearer token.
    pub async fn refresh_session(&self) -> Result<()> {
        self.session.refresh().await
    }

    /// The hostname of the connected server.
    pub fn hostname(&self) -> &str {
        self.session.hostname()
    }

    /// The subscription multiplexer handle.
    pub fn subscriptions(&self) -> &SubscriptionClient {
        &self.subscriptions
    }

    /// Drive the subscription multiplexer until close or cancellation.
    pub async fn run_subscriptions(&self, cancel: CancellationToken) -> Result<()> {
        self.subscriptions.run(cancel).await
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .session
            .http()
            .post(format!("{}/graphql/", self.session.base_url()))
            .header(AUTHORIZATION, self.session.bearer())
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQlResponse<T> = response.json().await?;
        if let Some(errors) = body.errors {
            if !errors.is_empty() {
                let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
                return Err(MythicError::GraphQl(messages.join("; ")));
            }
        }
        body.data
            .ok_or_else(|| MythicError::Protocol("graphql response without data".into()))
    }

    /// Every callback known to the server.
    pub async fn get_all_callbacks(&self) -> Result<Vec<Callback>> {
        #[derive(Deserialize)]
        struct Data {
            callback: Vec<Callback>,
        }
        let query = format!("query AllCallbacks {{ callback {{ {CALLBACK_FIELDS} }} }}");
        let data: Data = self.graphql(&query, Value::Null).await?;
        Ok(data.callback)
    }

    /// Callbacks that are still active.
    pub async fn get_all_active_callbacks(&self) -> Result<Vec<Callback>> {
        #[derive(Deserialize)]
        struct Data {
            callback: Vec<Callback>,
        }
        let query = format!(
            "query ActiveCallbacks {{ callback(where: {{active: {{_eq: true}}}}) {{ {CALLBACK_FIELDS} }} }}"
        );
        let data: Data = self.graphql(&query, Value::Null).await?;
        Ok(data.callback)
    }

    /// Every task, newest first.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        #[derive(Deserialize)]
        struct Data {
            task: Vec<Task>,
        }
        let query = format!("query CurrentTasks {{ task(order_by: {{id: desc}}) {{ {TASK_FIELDS} }} }}");
        let data: Data = self.graphql(&query, Value::Null).await?;
        Ok(data.task)
    }

    /// Tasks for one callback, oldest first.
    pub async fn get_all_tasks_for_callback(&self, callback_display_id: i64) -> Result<Vec<Task>> {
        #[derive(Deserialize)]
        struct Data {
            task: Vec<Task>,
        }
        let query = format!(
            "query TasksForCallback($callback_display_id: Int!) {{ task(where: {{callback: {{display_id: {{_eq: $callback_display_id}}}}}}, order_by: {{id: asc}}) {{ {TASK_FIELDS} }} }}"
        );
        let data: Data = self
            .graphql(&query, json!({"callback_display_id": callback_display_id}))
            .await?;
        Ok(data.task)
    }

    /// Output records for one task, oldest first.
    pub async fn get_output_for_task(&self, task_display_id: i64) -> Result<Vec<TaskOutput>> {
        #[derive(Deserialize)]
        struct Data {
            response: Vec<TaskOutput>,
        }
        let query = format!(
            "query OutputForTask($task_display_id: Int!) {{ response(order_by: {{id: asc}}, where: {{task: {{display_id: {{_eq: $task_display_id}}}}}}) {{ id timestamp response_text task {{ {TASK_FIELDS} }} }} }}"
        );
        let data: Data = self
            .graphql(&query, json!({"task_display_id": task_display_id}))
            .await?;
        Ok(data.response)
    }

    /// Every SOCKS proxy port.
    pub async fn get_all_proxies(&self) -> Result<Vec<Proxy>> {
        #[derive(Deserialize)]
        struct Data {
            callbackport: Vec<Proxy>,
        }
        let query = format!(
            "query Proxies {{ callbackport(where: {{port_type: {{_eq: \"socks\"}}}}) {{ {PROXY_FIELDS} }} }}"
        );
        let data: Data = self.graphql(&query, Value::Null).await?;
        Ok(data.callbackport)
    }

    /// Every completed download from an agent.
    pub async fn get_all_file_downloads(&self) -> Result<Vec<FileDownload>> {
        #[derive(Deserialize)]
        struct Data {
            filemeta: Vec<FileDownload>,
        }
        let query = format!(
            "query FileDownloads {{ filemeta(where: {{is_download_from_agent: {{_eq: true}}, complete: {{_eq: true}}}}) {{ {FILE_DOWNLOAD_FIELDS} }} }}"
        );
        let data: Data = self.graphql(&query, Value::Null).await?;
        Ok(data.filemeta)
    }

    /// Resolve a callback's display id from its internal id.
    pub async fn get_callback_display_id_for_id(&self, callback_id: i64) -> Result<i64> {
        #[derive(Deserialize)]
        struct DisplayId {
            display_id: i64,
        }
        #[derive(Deserialize)]
        struct Data {
            callback_by_pk: Option<DisplayId>,
        }
        let query =
            "query CallbackDisplayId($id: Int!) { callback_by_pk(id: $id) { display_id } }";
        let data: Data = self.graphql(query, json!({"id": callback_id})).await?;
        data.callback_by_pk
            .map(|c| c.display_id)
            .ok_or_else(|| MythicError::Protocol(format!("callback {callback_id} not found")))
    }

    /// Issue a command to a callback, addressed by display id.
    pub async fn issue_task(
        &self,
        callback_display_id: i64,
        command: &str,
        params: &str,
    ) -> Result<CreatedTask> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "createTask")]
            create_task: CreatedTask,
        }
        let query = "mutation IssueTask($callback_id: Int!, $command: String!, $params: String!) { createTask(callback_id: $callback_id, command: $command, params: $params) { id display_id status error } }";
        let data: Data = self
            .graphql(
                query,
                json!({
                    "callback_id": callback_display_id,
                    "command": command,
                    "params": params,
                }),
            )
            .await?;
        Ok(data.create_task)
    }

    /// Register a file with Mythic for later use in a task. Returns the
    /// agent file id on success.
    pub async fn register_file(&self, filename: &str, data: Vec<u8>) -> Result<FileUploadResult> {
        let part = multipart::Part::bytes(data).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .session
            .http()
            .post(format!(
                "{}/api/v1.4/task_upload_file_webhook",
                self.session.base_url()
            ))
            .header(AUTHORIZATION, self.session.bearer())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MythicError::Protocol(format!(
                "bad status: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Stream an agent file to a local path.
    pub async fn download_file(&self, path: &Path, agent_file_id: &str) -> Result<()> {
        let response = self
            .session
            .http()
            .get(format!(
                "{}/direct/download/{}",
                self.session.base_url(),
                agent_file_id
            ))
            .header(AUTHORIZATION, self.session.bearer())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MythicError::Protocol(format!(
                "bad status: {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Live task stream, snapshot keyed on now.
    pub fn task_subscription(&self, tx: mpsc::Sender<Task>) -> Result<String> {
        let query = format!(
            "subscription TaskStream($now: timestamp!, $batch_size: Int!) {{ task_stream(batch_size: $batch_size, cursor: {{initial_value: {{timestamp: $now}}}}) {{ {TASK_FIELDS} }} }}"
        );
        self.subscriptions.subscribe(
            &query,
            json!({"now": now_cursor(), "batch_size": 1}),
            "task_stream",
            tx,
        )
    }

    /// Live task-output stream.
    pub fn task_output_subscription(&self, tx: mpsc::Sender<TaskOutput>) -> Result<String> {
        let query = format!(
            "subscription TaskOutputStream($now: timestamp!, $batch_size: Int!) {{ response_stream(cursor: {{initial_value: {{timestamp: $now}}}}, batch_size: $batch_size) {{ id timestamp response_text task {{ {TASK_FIELDS} }} }} }}"
        );
        self.subscriptions.subscribe(
            &query,
            json!({"now": now_cursor(), "batch_size": 1}),
            "response_stream",
            tx,
        )
    }

    /// Live stream of active callbacks.
    pub fn callback_subscription(&self, tx: mpsc::Sender<Callback>) -> Result<String> {
        let query = format!(
            "subscription CallbackStream($now: timestamp!, $batch_size: Int!) {{ callback_stream(where: {{active: {{_eq: true}}}}, cursor: {{initial_value: {{init_callback: $now}}}}, batch_size: $batch_size) {{ {CALLBACK_FIELDS} }} }}"
        );
        self.subscriptions.subscribe(
            &query,
            json!({"now": now_cursor(), "batch_size": 1}),
            "callback_stream",
            tx,
        )
    }

    /// Live query for the most recent checkin.
    pub fn callback_checkin_subscription(
        &self,
        tx: mpsc::Sender<CallbackCheckin>,
    ) -> Result<String> {
        let query = "subscription CallbackCheckins { callback(order_by: {last_checkin: desc}, limit: 1) { id last_checkin } }";
        self.subscriptions
            .subscribe(query, Value::Null, "callback", tx)
    }

    /// Live query over SOCKS proxy ports.
    pub fn proxy_subscription(&self, tx: mpsc::Sender<Proxy>) -> Result<String> {
        let query = format!(
            "subscription ProxyStream {{ callbackport(where: {{port_type: {{_eq: \"socks\"}}}}) {{ {PROXY_FIELDS} }} }}"
        );
        self.subscriptions
            .subscribe(&query, Value::Null, "callbackport", tx)
    }

    /// Live stream of completed agent downloads.
    pub fn file_download_subscription(&self, tx: mpsc::Sender<FileDownload>) -> Result<String> {
        let query = format!(
            "subscription FileDownloadStream($now: timestamp!, $batch_size: Int!) {{ filemeta_stream(where: {{is_download_from_agent: {{_eq: true}}, complete: {{_eq: true}}}}, cursor: {{initial_value: {{timestamp: $now}}}}, batch_size: $batch_size) {{ {FILE_DOWNLOAD_FIELDS} }} }}"
        );
        self.subscriptions.subscribe(
            &query,
            json!({"now": now_cursor(), "batch_size": 1}),
            "filemeta_stream",
            tx,
        )
    }

    /// Stream every update of a single task, from the beginning of time so
    /// an already-completed task is seen immediately.
    pub fn specific_task_subscription(
        &self,
        tx: mpsc::Sender<Task>,
        task_id: i64,
    ) -> Result<String> {
        let query = format!(
            "subscription SpecificTask($task_id: Int!) {{ task_stream(cursor: {{initial_value: {{timestamp: \"1970-01-01\"}}}}, batch_size: 1, where: {{id: {{_eq: $task_id}}}}) {{ {TASK_FIELDS} }} }}"
        );
        self.subscriptions
            .subscribe(&query, json!({"task_id": task_id}), "task_stream", tx)
    }
}

/// Hasura timestamp literal for "now", used as the stream cursor start.
fn now_cursor() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
