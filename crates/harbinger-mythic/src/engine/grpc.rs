// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC backend for the workflow engine's task queue.

use async_trait::async_trait;
use harbinger_proto::taskqueue::task_queue_client::TaskQueueClient;
use harbinger_proto::taskqueue::{
    CompleteActivityTaskRequest, FailActivityTaskRequest, PollActivityTaskRequest,
};
use tonic::transport::{Channel, Endpoint};

use super::{ActivityTask, EngineBackend};
use crate::error::Result;

/// Engine backend over the `taskqueue.v1` service.
pub struct GrpcEngine {
    inner: TaskQueueClient<Channel>,
}

impl GrpcEngine {
    /// Connect to the engine. A bare `host:port` is dialed over plain HTTP/2.
    pub async fn connect(host: &str) -> Result<Self> {
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let channel = Endpoint::from_shared(endpoint)?.connect().await?;
        Ok(Self {
            inner: TaskQueueClient::new(channel),
        })
    }
}

#[async_trait]
impl EngineBackend for GrpcEngine {
    async fn poll(&self, task_queue: &str, identity: &str) -> Result<Option<ActivityTask>> {
        let response = self
            .inner
            .clone()
            .poll_activity_task(PollActivityTaskRequest {
                task_queue: task_queue.to_string(),
                identity: identity.to_string(),
            })
            .await?
            .into_inner();

        if response.task_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(ActivityTask {
            task_token: response.task_token,
            activity_name: response.activity_name,
            input: response.input,
        }))
    }

    async fn complete(&self, task_token: Vec<u8>, result: Vec<u8>) -> Result<()> {
        self.inner
            .clone()
            .complete_activity_task(CompleteActivityTaskRequest { task_token, result })
            .await?;
        Ok(())
    }

    async fn fail(&self, task_token: Vec<u8>, message: String) -> Result<()> {
        self.inner
            .clone()
            .fail_activity_task(FailActivityTaskRequest {
                task_token,
                message,
            })
            .await?;
        Ok(())
    }
}
