// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed wrapper over the generated Harbinger gRPC client.
//!
//! The generated client is cheap to clone (it shares one HTTP/2 channel), so
//! this wrapper clones per call and stays usable from every reader task.

use std::path::Path;

use harbinger_proto::harbinger::harbinger_client::HarbingerClient as GeneratedClient;
use harbinger_proto::harbinger::{
    C2ServerStatusRequest, DownloadFileRequest, FileChunk, FileExistsRequest, FileRequest,
    ImplantRequest, ProxyRequest, SettingsRequest, SettingsResponse, TaskOutputRequest,
    TaskRequest,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::warn;

use crate::error::Result;

/// Upload stream chunk size.
const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Client to the Harbinger gRPC server.
#[derive(Clone)]
pub struct HarbingerClient {
    inner: GeneratedClient<Channel>,
}

impl HarbingerClient {
    /// Connect to Harbinger. A bare `host:port` is dialed over plain HTTP/2,
    /// matching how the server is deployed next to the workers.
    pub async fn connect(host: &str) -> Result<Self> {
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let channel = Endpoint::from_shared(endpoint)?.connect().await?;
        Ok(Self {
            inner: GeneratedClient::new(channel),
        })
    }

    /// Fetch the C2 connection settings stored for this server id.
    pub async fn get_settings(&self, c2_server_id: &str) -> Result<SettingsResponse> {
        let response = self
            .inner
            .clone()
            .get_settings(SettingsRequest {
                c2_server_id: c2_server_id.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn save_task(&self, request: TaskRequest) -> Result<()> {
        self.inner.clone().save_task(request).await?;
        Ok(())
    }

    pub async fn save_task_output(&self, request: TaskOutputRequest) -> Result<()> {
        self.inner.clone().save_task_output(request).await?;
        Ok(())
    }

    pub async fn save_implant(&self, request: ImplantRequest) -> Result<()> {
        self.inner.clone().save_implant(request).await?;
        Ok(())
    }

    pub async fn save_proxy(&self, request: ProxyRequest) -> Result<()> {
        self.inner.clone().save_proxy(request).await?;
        Ok(())
    }

    pub async fn save_file(&self, request: FileRequest) -> Result<()> {
        self.inner.clone().save_file(request).await?;
        Ok(())
    }

    /// Report this worker's status for the C2 server.
    pub async fn set_c2_server_status(
        &self,
        c2_server_id: &str,
        status: &str,
        name: &str,
    ) -> Result<()> {
        self.inner
            .clone()
            .set_c2_server_status(C2ServerStatusRequest {
                c2_server_id: c2_server_id.to_string(),
                status: status.to_string(),
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Whether a file with this sha1 is already stored.
    pub async fn check_file_exists(&self, sha1: &str) -> Result<bool> {
        let response = self
            .inner
            .clone()
            .check_file_exists(FileExistsRequest {
                sha1: sha1.to_string(),
            })
            .await?;
        Ok(response.into_inner().exists)
    }

    /// Drain a server-streamed file into memory.
    pub async fn download_to_vec(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut stream = self
            .inner
            .clone()
            .download_file(DownloadFileRequest {
                file_id: file_id.to_string(),
            })
            .await?
            .into_inner();

        let mut data = Vec::new();
        while let Some(chunk) = stream.message().await? {
            data.extend_from_slice(&chunk.data);
        }
        Ok(data)
    }

    /// Stream a local file to Harbinger in 1 MiB chunks. Returns the stored
    /// file's id.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let (tx, rx) = mpsc::channel::<FileChunk>(4);

        tokio::spawn(async move {
            let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
            loop {
                match file.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = FileChunk {
                            data: buffer[..n].to_vec(),
                        };
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to read upload chunk");
                        break;
                    }
                }
            }
        });

        let response = self
            .inner
            .clone()
            .upload_file(ReceiverStream::new(rx))
            .await?;
        Ok(response.into_inner().upload_file_id)
    }
}
