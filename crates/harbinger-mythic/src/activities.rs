// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The worker's activities: backfill, job execution and task completion.
//!
//! All three are registered with the workflow engine, and `run_job` also
//! calls `wait_for_task` directly between the steps of a multi-step job.

use std::sync::Arc;

use mythic_client::MythicClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::BuilderRegistry;
use crate::error::{BridgeError, Result};
use crate::harbinger::HarbingerClient;
use crate::jobs::{C2Task, RunJob, StagedFile, WorkflowStepResult};
use crate::readers::Channels;

/// Buffer for the single-task completion stream.
const WAIT_CHANNEL_CAPACITY: usize = 16;

/// Shared state behind every activity.
pub struct MythicBridge {
    pub(crate) mythic: Arc<MythicClient>,
    pub(crate) harbinger: HarbingerClient,
    pub(crate) c2_server_id: String,
    pub(crate) channels: Channels,
    pub(crate) builders: BuilderRegistry,
    pub(crate) cancel: CancellationToken,
}

impl MythicBridge {
    pub fn new(
        mythic: Arc<MythicClient>,
        harbinger: HarbingerClient,
        c2_server_id: String,
        channels: Channels,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mythic,
            harbinger,
            c2_server_id,
            channels,
            builders: BuilderRegistry::with_defaults(),
            cancel,
        }
    }

    /// Fetch the server's full state and feed it through the same channels
    /// the live subscriptions use. Overlap with live delivery is safe; the
    /// upserts are idempotent on internal id.
    pub async fn sync_all(&self) -> Result<()> {
        let callbacks = self.mythic.get_all_callbacks().await?;
        for callback in callbacks {
            self.send(&self.channels.callbacks, callback).await?;
        }

        let tasks = self.mythic.get_all_tasks().await?;
        for task in tasks {
            let display_id = task.display_id;
            self.send(&self.channels.tasks, task).await?;
            // A failed output fetch skips that task's output, not the sync.
            match self.mythic.get_output_for_task(display_id).await {
                Ok(outputs) => {
                    for output in outputs {
                        self.send(&self.channels.outputs, output).await?;
                    }
                }
                Err(err) => {
                    warn!(task_display_id = display_id, error = %err, "failed to fetch task output");
                }
            }
        }

        let proxies = self.mythic.get_all_proxies().await?;
        for proxy in proxies {
            self.send(&self.channels.proxies, proxy).await?;
        }

        let downloads = self.mythic.get_all_file_downloads().await?;
        for download in downloads {
            self.send(&self.channels.downloads, download).await?;
        }

        Ok(())
    }

    async fn send<T>(&self, tx: &mpsc::Sender<T>, value: T) -> Result<()> {
        tx.send(value)
            .await
            .map_err(|_| BridgeError::Other("entity channel closed".to_string()))
    }

    /// Stage the job's input files on Mythic, build the command sequence for
    /// the implant's payload family and issue it in order. Intermediate
    /// steps are awaited before the next one is issued.
    pub async fn run_job(&self, job: RunJob) -> Result<C2Task> {
        info!(job_id = %job.c2_job.id, "running job");

        let mut staged = Vec::new();
        for file in &job.c2_job.input_files {
            let data = match self.harbinger.download_to_vec(&file.id).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(file_id = %file.id, error = %err, "failed to fetch input file");
                    continue;
                }
            };
            match self.mythic.register_file(&file.filename, data).await {
                Ok(result) if result.status == "success" => {
                    staged.push(StagedFile {
                        id: result.agent_file_id,
                        name: file.filename.clone(),
                    });
                }
                Ok(result) => {
                    warn!(filename = %file.filename, error = %result.error, "file registration rejected");
                }
                Err(err) => {
                    warn!(filename = %file.filename, error = %err, "file registration failed");
                }
            }
        }

        let implant_id: i64 = job.c2_implant.internal_id.parse().map_err(|_| {
            BridgeError::Other(format!(
                "invalid implant internal id: {}",
                job.c2_implant.internal_id
            ))
        })?;
        let display_id = self.mythic.get_callback_display_id_for_id(implant_id).await?;

        let tasks = self.builders.build(&job, &staged)?;

        let mut status = String::new();
        let mut internal_id = String::new();
        let last = tasks.len().saturating_sub(1);

        for (step, task) in tasks.iter().enumerate() {
            info!(step, command = %task.command, arguments = %task.arguments, "issuing task");
            let created = self
                .mythic
                .issue_task(display_id, &task.command, &task.arguments)
                .await?;
            status = created.status.clone();
            internal_id = created.id.to_string();

            if step != last {
                info!(internal_id = %internal_id, "waiting for intermediate task to complete");
                let intermediate = C2Task {
                    internal_id: internal_id.clone(),
                    ..C2Task::default()
                };
                if let Err(err) = self.wait_for_task(intermediate).await {
                    warn!(internal_id = %internal_id, error = %err, "failed to wait for intermediate task");
                }
            }
        }

        info!(job_id = %job.c2_job.id, status = %status, "job completed");
        Ok(C2Task {
            internal_id,
            internal_implant_id: job.c2_implant.internal_id.clone(),
            id: String::new(),
            status,
            c2_server_id: self.c2_server_id.clone(),
        })
    }

    /// Block until the task's upstream record arrives with `completed=true`,
    /// or the root context is cancelled. The subscription is always released
    /// before returning.
    pub async fn wait_for_task(&self, task: C2Task) -> Result<WorkflowStepResult> {
        info!(internal_id = %task.internal_id, "waiting for task");

        let task_id: i64 = task.internal_id.parse().map_err(|_| {
            BridgeError::Other(format!("invalid task internal id: {}", task.internal_id))
        })?;

        let (tx, mut rx) = mpsc::channel(WAIT_CHANNEL_CAPACITY);
        let subscription_id = self.mythic.specific_task_subscription(tx, task_id)?;

        let completed = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.mythic.subscriptions().unsubscribe(&subscription_id);
                    return Err(BridgeError::Interrupted);
                }

                message = rx.recv() => {
                    match message {
                        Some(update) => {
                            if update.completed {
                                break update;
                            }
                        }
                        None => {
                            self.mythic.subscriptions().unsubscribe(&subscription_id);
                            return Err(BridgeError::Other(
                                "task subscription closed".to_string(),
                            ));
                        }
                    }
                }
            }
        };
        self.mythic.subscriptions().unsubscribe(&subscription_id);

        let mut status = completed.status;
        if status == "success" {
            status = "completed".to_string();
        }
        info!(internal_id = %task.internal_id, status = %status, "task completed");

        Ok(WorkflowStepResult {
            id: task.id.clone(),
            status,
            ..WorkflowStepResult::default()
        })
    }
}
