// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity readers: one task per entity kind, draining a bounded channel and
//! upserting into Harbinger.
//!
//! The channels are the only coupling between the subscription socket and
//! Harbinger: a slow upsert path fills the channel, which blocks the socket
//! reader and flow-controls the server. Upsert failures are logged and the
//! reader keeps going; redelivery is safe because Harbinger keys on
//! `(c2_server_id, internal_id)`.

use std::sync::Arc;

use harbinger_proto::harbinger::{ImplantRequest, ProxyRequest, TaskRequest};
use mythic_client::{Callback, CallbackCheckin, FileDownload, Proxy, Task, TaskOutput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::downloads::DownloadPipeline;
use crate::harbinger::HarbingerClient;
use crate::output::output_request;

/// Capacity of each per-kind channel.
pub const CHANNEL_CAPACITY: usize = 100;

/// The tag recorded on every implant this worker mirrors.
pub const C2_TYPE: &str = "mythic";

/// Senders for every entity kind. The live subscriptions and the backfill
/// feed the same channels, so both paths share one translation.
#[derive(Clone)]
pub struct Channels {
    pub tasks: mpsc::Sender<Task>,
    pub outputs: mpsc::Sender<TaskOutput>,
    pub callbacks: mpsc::Sender<Callback>,
    pub checkins: mpsc::Sender<CallbackCheckin>,
    pub proxies: mpsc::Sender<Proxy>,
    pub downloads: mpsc::Sender<FileDownload>,
}

pub(crate) fn task_request(c2_server_id: &str, task: &Task) -> TaskRequest {
    TaskRequest {
        internal_id: task.id.to_string(),
        c2_server_id: c2_server_id.to_string(),
        status: task.status.clone(),
        original_params: task.original_params.clone(),
        display_params: task.display_params.clone(),
        time_started: task.status_timestamp_processing.clone(),
        time_completed: task.timestamp.clone(),
        command_name: task.command_name.clone(),
        operator: task.operator.username.clone(),
        internal_implant_id: task.callback.id.to_string(),
    }
}

pub(crate) fn implant_request(c2_server_id: &str, callback: &Callback) -> ImplantRequest {
    ImplantRequest {
        c2_server_id: c2_server_id.to_string(),
        internal_id: callback.id.to_string(),
        c2_type: C2_TYPE.to_string(),
        payload_type: callback.payload.payloadtype.name.clone(),
        hostname: callback.host.clone(),
        description: callback.description.clone(),
        os: callback.os.clone(),
        pid: callback.pid as i32,
        architecture: callback.architecture.clone(),
        process: callback.process_name.clone(),
        username: callback.user.clone(),
        ip: callback.ip.clone(),
        external_ip: callback.external_ip.clone(),
        domain: callback.domain.clone(),
        last_checkin: callback.last_checkin.clone(),
    }
}

/// Checkins only touch `last_checkin`; everything else stays as previously
/// upserted.
pub(crate) fn checkin_request(c2_server_id: &str, checkin: &CallbackCheckin) -> ImplantRequest {
    ImplantRequest {
        c2_server_id: c2_server_id.to_string(),
        internal_id: checkin.id.to_string(),
        last_checkin: checkin.last_checkin.clone(),
        ..ImplantRequest::default()
    }
}

pub(crate) fn proxy_request(c2_server_id: &str, hostname: &str, proxy: &Proxy) -> ProxyRequest {
    let status = if proxy.deleted {
        "disconnected"
    } else {
        "connected"
    };
    ProxyRequest {
        host: hostname.to_string(),
        port: proxy.local_port as i32,
        r#type: "socks5".to_string(),
        status: status.to_string(),
        remote_hostname: proxy.callback.host.clone(),
        c2_server_id: c2_server_id.to_string(),
        internal_id: proxy.id.to_string(),
    }
}

pub async fn read_tasks(
    client: HarbingerClient,
    c2_server_id: String,
    mut rx: mpsc::Receiver<Task>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(task) = message else { break };
                if let Err(err) = client.save_task(task_request(&c2_server_id, &task)).await {
                    warn!(internal_id = task.id, error = %err, "failed to save task");
                }
            }
        }
    }
}

pub async fn read_task_output(
    client: HarbingerClient,
    c2_server_id: String,
    mut rx: mpsc::Receiver<TaskOutput>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(output) = message else { break };
                if let Err(err) = client
                    .save_task_output(output_request(&c2_server_id, &output))
                    .await
                {
                    warn!(internal_id = output.id, error = %err, "failed to save task output");
                }
            }
        }
    }
}

pub async fn read_callbacks(
    client: HarbingerClient,
    c2_server_id: String,
    mut rx: mpsc::Receiver<Callback>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(callback) = message else { break };
                if let Err(err) = client
                    .save_implant(implant_request(&c2_server_id, &callback))
                    .await
                {
                    warn!(internal_id = callback.id, error = %err, "failed to save implant");
                }
            }
        }
    }
}

pub async fn read_callback_checkins(
    client: HarbingerClient,
    c2_server_id: String,
    mut rx: mpsc::Receiver<CallbackCheckin>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(checkin) = message else { break };
                if let Err(err) = client
                    .save_implant(checkin_request(&c2_server_id, &checkin))
                    .await
                {
                    warn!(internal_id = checkin.id, error = %err, "failed to save checkin");
                }
            }
        }
    }
}

pub async fn read_proxies(
    client: HarbingerClient,
    c2_server_id: String,
    hostname: String,
    mut rx: mpsc::Receiver<Proxy>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(proxy) = message else { break };
                if let Err(err) = client
                    .save_proxy(proxy_request(&c2_server_id, &hostname, &proxy))
                    .await
                {
                    warn!(internal_id = proxy.id, error = %err, "failed to save proxy");
                }
            }
        }
    }
}

pub async fn read_file_downloads(
    pipeline: Arc<DownloadPipeline>,
    mut rx: mpsc::Receiver<FileDownload>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            message = rx.recv() => {
                let Some(download) = message else { break };
                pipeline.handle(download).await;
            }
        }
    }
}
