// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker lifecycle: startup sequencing, session refresh, signal handling
//! and orderly shutdown.
//!
//! Startup order is fixed: Harbinger connection, settings fetch, Mythic
//! login, readers, subscriptions, subscription socket, activity worker,
//! background backfill, then the `running` status. Shutdown unwinds in
//! reverse and drains in-flight file transfers before reporting `exited`.

use std::sync::Arc;
use std::time::Duration;

use mythic_client::MythicClient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activities::MythicBridge;
use crate::config::Config;
use crate::downloads::DownloadPipeline;
use crate::engine::{ActivityWorker, GrpcEngine};
use crate::error::Result;
use crate::harbinger::HarbingerClient;
use crate::jobs::{C2Task, RunJob};
use crate::readers::{
    read_callback_checkins, read_callbacks, read_file_downloads, read_proxies, read_task_output,
    read_tasks, Channels, CHANNEL_CAPACITY, C2_TYPE,
};

const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the worker until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let harbinger = HarbingerClient::connect(&config.harbinger_grpc_host).await?;

    let settings = harbinger.get_settings(&config.c2_server_id).await?;
    info!(hostname = %settings.hostname, "fetched settings");

    let mythic = Arc::new(
        MythicClient::login(
            &settings.hostname,
            settings.port as u16,
            &settings.username,
            &settings.password,
        )
        .await?,
    );
    info!("logged in to mythic");

    let cancel = CancellationToken::new();

    // Bounded per-kind channels: live subscriptions and the backfill feed
    // the same readers.
    let (task_tx, task_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (callback_tx, callback_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (checkin_tx, checkin_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (proxy_tx, proxy_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (download_tx, download_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let channels = Channels {
        tasks: task_tx.clone(),
        outputs: output_tx.clone(),
        callbacks: callback_tx.clone(),
        checkins: checkin_tx.clone(),
        proxies: proxy_tx.clone(),
        downloads: download_tx.clone(),
    };

    let downloads = Arc::new(DownloadPipeline::new(
        mythic.clone(),
        harbinger.clone(),
        config.c2_server_id.clone(),
    ));

    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    readers.push(tokio::spawn(read_tasks(
        harbinger.clone(),
        config.c2_server_id.clone(),
        task_rx,
        cancel.clone(),
    )));
    readers.push(tokio::spawn(read_task_output(
        harbinger.clone(),
        config.c2_server_id.clone(),
        output_rx,
        cancel.clone(),
    )));
    readers.push(tokio::spawn(read_callbacks(
        harbinger.clone(),
        config.c2_server_id.clone(),
        callback_rx,
        cancel.clone(),
    )));
    readers.push(tokio::spawn(read_callback_checkins(
        harbinger.clone(),
        config.c2_server_id.clone(),
        checkin_rx,
        cancel.clone(),
    )));
    readers.push(tokio::spawn(read_proxies(
        harbinger.clone(),
        config.c2_server_id.clone(),
        settings.hostname.clone(),
        proxy_rx,
        cancel.clone(),
    )));
    readers.push(tokio::spawn(read_file_downloads(
        downloads.clone(),
        download_rx,
        cancel.clone(),
    )));

    let mut subscription_ids = Vec::new();
    subscription_ids.push(mythic.task_subscription(task_tx)?);
    subscription_ids.push(mythic.task_output_subscription(output_tx)?);
    subscription_ids.push(mythic.callback_subscription(callback_tx)?);
    subscription_ids.push(mythic.callback_checkin_subscription(checkin_tx)?);
    subscription_ids.push(mythic.proxy_subscription(proxy_tx)?);
    subscription_ids.push(mythic.file_download_subscription(download_tx)?);

    let multiplex = {
        let client = mythic.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = client.run_subscriptions(cancel).await {
                error!(error = %err, "subscription multiplexer failed");
            }
        })
    };

    let bridge = Arc::new(MythicBridge::new(
        mythic.clone(),
        harbinger.clone(),
        config.c2_server_id.clone(),
        channels,
        cancel.clone(),
    ));

    let engine = GrpcEngine::connect(&config.temporal_host).await?;
    let mut activity_worker = ActivityWorker::new(Arc::new(engine), config.task_queue());
    register_activities(&mut activity_worker, bridge.clone());

    let worker_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { activity_worker.run(cancel).await })
    };

    // Initial backfill runs in the background; live events interleave safely.
    {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            match bridge.sync_all().await {
                Ok(()) => info!("initial sync completed"),
                Err(err) => warn!(error = %err, "initial sync failed"),
            }
        });
    }

    if let Err(err) = harbinger
        .set_c2_server_status(&config.c2_server_id, "running", C2_TYPE)
        .await
    {
        warn!(error = %err, "failed to send running status");
    }

    let refresh = {
        let client = mythic.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_REFRESH_INTERVAL);
            interval.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = interval.tick() => {
                        if let Err(err) = client.refresh_session().await {
                            error!(error = %err, "session refresh failed");
                        }
                    }
                }
            }
        })
    };

    info!(c2_server_id = %config.c2_server_id, "worker started, waiting for shutdown signal");
    shutdown_signal().await?;
    info!("shutdown signal received, stopping worker");

    for id in &subscription_ids {
        mythic.subscriptions().unsubscribe(id);
    }
    mythic.subscriptions().close();
    // The multiplexer sends its complete frames and closes the socket
    // before the root context is cancelled.
    if tokio::time::timeout(CLOSE_TIMEOUT, multiplex).await.is_err() {
        warn!("timed out waiting for subscription socket to close");
    }
    cancel.cancel();

    let _ = worker_handle.await;
    let _ = refresh.await;
    for reader in readers {
        let _ = reader.await;
    }
    downloads.drain().await;

    // The root context is gone; the final status update gets its own
    // deadline instead.
    match tokio::time::timeout(
        STATUS_TIMEOUT,
        harbinger.set_c2_server_status(&config.c2_server_id, "exited", C2_TYPE),
    )
    .await
    {
        Err(_) => warn!("timed out sending exited status"),
        Ok(Err(err)) => warn!(error = %err, "failed to send exited status"),
        Ok(Ok(())) => {}
    }

    info!("worker exited");
    Ok(())
}

/// Register the three activities under their engine-visible names.
fn register_activities(worker: &mut ActivityWorker, bridge: Arc<MythicBridge>) {
    {
        let bridge = bridge.clone();
        worker.register("sync_all", move |_input| {
            let bridge = bridge.clone();
            async move {
                bridge.sync_all().await?;
                Ok(b"null".to_vec())
            }
        });
    }
    {
        let bridge = bridge.clone();
        worker.register("run_job", move |input| {
            let bridge = bridge.clone();
            async move {
                let job: RunJob = serde_json::from_slice(&input)?;
                let task = bridge.run_job(job).await?;
                Ok(serde_json::to_vec(&task)?)
            }
        });
    }
    {
        worker.register("wait_for_task", move |input| {
            let bridge = bridge.clone();
            async move {
                let task: C2Task = serde_json::from_slice(&input)?;
                let result = bridge.wait_for_task(task).await?;
                Ok(serde_json::to_vec(&result)?)
            }
        });
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
