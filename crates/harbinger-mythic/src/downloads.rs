// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File-download pipeline: mirror agent downloads from Mythic into Harbinger.
//!
//! Each event is first deduplicated against Harbinger by sha1. New files are
//! fetched into a temporary file (removed on every exit path), retried up to
//! three times, then streamed to Harbinger and recorded with a `SaveFile`
//! upsert. Transfers run on their own tasks, tracked so shutdown can drain
//! them.

use std::sync::Arc;

use mythic_client::{FileDownload, MythicClient};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::harbinger::HarbingerClient;

const DOWNLOAD_ATTEMPTS: usize = 3;

/// Tracks and runs file transfers between Mythic and Harbinger.
pub struct DownloadPipeline {
    mythic: Arc<MythicClient>,
    harbinger: HarbingerClient,
    c2_server_id: String,
    tracker: TaskTracker,
}

impl DownloadPipeline {
    pub fn new(mythic: Arc<MythicClient>, harbinger: HarbingerClient, c2_server_id: String) -> Self {
        Self {
            mythic,
            harbinger,
            c2_server_id,
            tracker: TaskTracker::new(),
        }
    }

    /// Process one download event. Known files are skipped; new ones are
    /// transferred on a tracked background task.
    pub async fn handle(&self, download: FileDownload) {
        match self.harbinger.check_file_exists(&download.sha1).await {
            Err(err) => {
                warn!(sha1 = %download.sha1, error = %err, "failed to check file existence");
                return;
            }
            Ok(true) => {
                info!(sha1 = %download.sha1, "file already exists");
                return;
            }
            Ok(false) => {}
        }

        let mythic = self.mythic.clone();
        let harbinger = self.harbinger.clone();
        let c2_server_id = self.c2_server_id.clone();
        self.tracker.spawn(async move {
            if let Err(err) = transfer(mythic, harbinger, c2_server_id, &download).await {
                warn!(filename = %download.filename_utf8, error = %err, "file transfer failed");
            }
        });
    }

    /// Wait until every in-flight transfer has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn transfer(
    mythic: Arc<MythicClient>,
    harbinger: HarbingerClient,
    c2_server_id: String,
    download: &FileDownload,
) -> Result<()> {
    info!(filename = %download.filename_utf8, "processing file");

    // Removed on drop, which covers every exit path below.
    let staging = tempfile::NamedTempFile::new()?;
    let path = staging.path().to_path_buf();

    let mut downloaded = false;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match mythic.download_file(&path, &download.agent_file_id).await {
            Ok(()) => {
                downloaded = true;
                break;
            }
            Err(err) => {
                warn!(
                    filename = %download.filename_utf8,
                    attempt,
                    error = %err,
                    "download attempt failed"
                );
            }
        }
    }

    if !downloaded {
        return Err(BridgeError::Other(format!(
            "unable to download {} after {} attempts",
            download.filename_utf8, DOWNLOAD_ATTEMPTS
        )));
    }

    let upload_file_id = harbinger.upload_file(&path).await?;
    harbinger
        .save_file(harbinger_proto::harbinger::FileRequest {
            filename: download.filename_utf8.clone(),
            internal_task_id: download.task_id.to_string(),
            internal_implant_id: download.task.callback.id.to_string(),
            c2_server_id,
            upload_file_id,
        })
        .await?;

    info!(filename = %download.filename_utf8, "completed file");
    Ok(())
}
