// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process mock servers for integration tests: a Harbinger gRPC server
//! capturing every upsert, and a Mythic HTTP/WebSocket server with canned
//! responses.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tonic::{Request, Response, Status, Streaming};

use harbinger_proto::harbinger::harbinger_server::{Harbinger, HarbingerServer};
use harbinger_proto::harbinger::{
    C2ServerStatusRequest, C2ServerStatusResponse, DownloadFileRequest, FileChunk,
    FileExistsRequest, FileExistsResponse, FileRequest, ImplantRequest, ImplantResponse,
    ProxyRequest, ProxyResponse, SaveFileResponse, SettingsRequest, SettingsResponse,
    TaskOutputRequest, TaskOutputResponse, TaskRequest, TaskResponse, UploadFileResponse,
};

// ============================================================================
// Mock Harbinger (gRPC)
// ============================================================================

#[derive(Default)]
pub struct HarbingerState {
    pub tasks: Mutex<Vec<TaskRequest>>,
    pub outputs: Mutex<Vec<TaskOutputRequest>>,
    pub implants: Mutex<Vec<ImplantRequest>>,
    pub proxies: Mutex<Vec<ProxyRequest>>,
    pub files: Mutex<Vec<FileRequest>>,
    pub statuses: Mutex<Vec<C2ServerStatusRequest>>,
    /// sha1 values reported as already stored.
    pub existing_sha1s: Mutex<HashSet<String>>,
    /// Bodies received through UploadFile.
    pub uploads: Mutex<Vec<Vec<u8>>>,
    /// file id -> bytes served through DownloadFile.
    pub stored_files: Mutex<HashMap<String, Vec<u8>>>,
}

pub struct MockHarbinger {
    state: Arc<HarbingerState>,
}

#[tonic::async_trait]
impl Harbinger for MockHarbinger {
    async fn get_settings(
        &self,
        _request: Request<SettingsRequest>,
    ) -> Result<Response<SettingsResponse>, Status> {
        Ok(Response::new(SettingsResponse {
            hostname: "mythic.local".to_string(),
            port: 7443,
            username: "user".to_string(),
            password: "pass".to_string(),
        }))
    }

    async fn save_implant(
        &self,
        request: Request<ImplantRequest>,
    ) -> Result<Response<ImplantResponse>, Status> {
        self.state.implants.lock().push(request.into_inner());
        Ok(Response::new(ImplantResponse {}))
    }

    async fn save_proxy(
        &self,
        request: Request<ProxyRequest>,
    ) -> Result<Response<ProxyResponse>, Status> {
        self.state.proxies.lock().push(request.into_inner());
        Ok(Response::new(ProxyResponse {}))
    }

    async fn save_task(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        self.state.tasks.lock().push(request.into_inner());
        Ok(Response::new(TaskResponse {}))
    }

    async fn save_task_output(
        &self,
        request: Request<TaskOutputRequest>,
    ) -> Result<Response<TaskOutputResponse>, Status> {
        self.state.outputs.lock().push(request.into_inner());
        Ok(Response::new(TaskOutputResponse {}))
    }

    async fn save_file(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<SaveFileResponse>, Status> {
        self.state.files.lock().push(request.into_inner());
        Ok(Response::new(SaveFileResponse {}))
    }

    async fn set_c2_server_status(
        &self,
        request: Request<C2ServerStatusRequest>,
    ) -> Result<Response<C2ServerStatusResponse>, Status> {
        self.state.statuses.lock().push(request.into_inner());
        Ok(Response::new(C2ServerStatusResponse {}))
    }

    async fn check_file_exists(
        &self,
        request: Request<FileExistsRequest>,
    ) -> Result<Response<FileExistsResponse>, Status> {
        let exists = self
            .state
            .existing_sha1s
            .lock()
            .contains(&request.into_inner().sha1);
        Ok(Response::new(FileExistsResponse { exists }))
    }

    type DownloadFileStream = tokio_stream::Iter<std::vec::IntoIter<Result<FileChunk, Status>>>;

    async fn download_file(
        &self,
        request: Request<DownloadFileRequest>,
    ) -> Result<Response<Self::DownloadFileStream>, Status> {
        let file_id = request.into_inner().file_id;
        let data = self
            .state
            .stored_files
            .lock()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| Status::not_found("no such file"))?;
        let chunks = vec![Ok(FileChunk { data })];
        Ok(Response::new(tokio_stream::iter(chunks)))
    }

    async fn upload_file(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        let mut stream = request.into_inner();
        let mut data = Vec::new();
        while let Some(chunk) = stream.message().await? {
            data.extend_from_slice(&chunk.data);
        }
        let mut uploads = self.state.uploads.lock();
        uploads.push(data);
        Ok(Response::new(UploadFileResponse {
            upload_file_id: format!("upload-{}", uploads.len()),
        }))
    }
}

/// Serve a mock Harbinger on an ephemeral port, returning `host:port`.
pub async fn spawn_harbinger(state: Arc<HarbingerState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(HarbingerServer::new(MockHarbinger { state }))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

// ============================================================================
// Mock Mythic (HTTP + WebSocket)
// ============================================================================

#[derive(Default)]
pub struct MythicState {
    /// Remaining direct-download requests to fail with a 500.
    pub download_failures: Mutex<usize>,
    /// Body served by the direct download endpoint.
    pub download_body: Mutex<Vec<u8>>,
    /// Total direct-download requests seen.
    pub download_requests: AtomicUsize,
    /// `data` values keyed by GraphQL operation name.
    pub graphql: Mutex<HashMap<&'static str, Value>>,
    /// Variables of every `createTask` mutation, in order.
    pub issued: Mutex<Vec<Value>>,
    /// Filenames registered through the upload webhook.
    pub registered: Mutex<Vec<String>>,
    /// Items streamed (one `next` each) to any `task_stream` subscriber.
    pub ws_tasks: Mutex<Vec<Value>>,
}

async fn auth(State(_state): State<Arc<MythicState>>) -> impl IntoResponse {
    Json(json!({"access_token": "access-token", "refresh_token": "refresh-token"}))
}

async fn graphql(
    State(state): State<Arc<MythicState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let query = body["query"].as_str().unwrap_or_default().to_string();

    if query.contains("IssueTask") {
        state.issued.lock().push(body["variables"].clone());
    }

    let graphql = state.graphql.lock();
    for (operation, data) in graphql.iter() {
        if query.contains(operation) {
            return Json(json!({"data": data}));
        }
    }
    Json(json!({"errors": [{"message": format!("no canned response for query: {query}")}]}))
}

async fn register(State(state): State<Arc<MythicState>>) -> impl IntoResponse {
    let mut registered = state.registered.lock();
    registered.push("uploaded".to_string());
    Json(json!({
        "agent_file_id": format!("agent-file-{}", registered.len()),
        "status": "success",
        "error": "",
    }))
}

async fn direct_download(
    State(state): State<Arc<MythicState>>,
    Path(_file_id): Path<String>,
) -> impl IntoResponse {
    state.download_requests.fetch_add(1, Ordering::SeqCst);
    {
        let mut failures = state.download_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
        }
    }
    (axum::http::StatusCode::OK, state.download_body.lock().clone())
}

async fn graphql_ws(
    State(state): State<Arc<MythicState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols(["graphql-transport-ws"])
        .on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<MythicState>) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => continue,
        };
        match value["type"].as_str() {
            Some("connection_init") => {
                let ack = json!({"type": "connection_ack"}).to_string();
                if socket.send(WsMessage::Text(ack)).await.is_err() {
                    return;
                }
            }
            Some("subscribe") => {
                let id = value["id"].as_str().unwrap_or_default().to_string();
                let query = value["payload"]["query"].as_str().unwrap_or_default();
                if query.contains("task_stream") {
                    let items = state.ws_tasks.lock().clone();
                    for item in items {
                        let next = json!({
                            "type": "next",
                            "id": id,
                            "payload": {"data": {"task_stream": [item]}},
                        })
                        .to_string();
                        if socket.send(WsMessage::Text(next)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Serve a mock Mythic on an ephemeral port, returning the port.
pub async fn spawn_mythic(state: Arc<MythicState>) -> u16 {
    let app = Router::new()
        .route("/auth", post(auth))
        .route("/refresh", post(auth))
        .route("/graphql/", post(graphql))
        .route("/graphql", get(graphql_ws))
        .route("/api/v1.4/task_upload_file_webhook", post(register))
        .route("/direct/download/:file_id", get(direct_download))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_until<F>(check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("condition not reached within timeout");
}
