// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Postgres LISTEN to Redis fan-out.
//!
//! Every notification payload is published verbatim on the legacy pub/sub
//! channel. Payloads whose `table_name` is on the allow-list are additionally
//! appended to the supervisor stream; malformed payloads are logged and only
//! reach pub/sub. A lost database connection is fatal so a process supervisor
//! restarts the bridge.

use std::time::Duration;

use redis::AsyncCommands;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;

/// PostgreSQL channel carrying row-change events.
pub const PG_CHANNEL: &str = "events";
/// Legacy pub/sub channel; every event goes here.
pub const PUBSUB_CHANNEL: &str = "app_events_stream";
/// Supervisor stream; only allow-listed events go here.
pub const STREAM_KEY: &str = "supervisor:events";

const NOTIFICATION_WAIT: Duration = Duration::from_secs(5);

/// Tables whose events are useful downstream of the supervisor stream.
const USEFUL_TABLES: &[&str] = &[
    // Core environment
    "hosts",
    "ip_addresses",
    "domains",
    "credentials",
    "passwords",
    "kerberos",
    "hashes",
    "shares",
    "share_files",
    "processes",
    "situational_awareness",
    // C2 and operations
    "c2_servers",
    "c2_implants",
    "c2_tasks",
    "c2_task_output",
    "proxies",
    "proxy_jobs",
    "proxy_job_output",
    "socks_servers",
    "files",
    "playbooks",
    // Vulnerabilities and findings
    "issues",
    "certificate_authorities",
    "certificate_templates",
    "certificate_template_permissions",
];

/// Errors that end the bridge.
#[derive(Debug, Error)]
pub enum EventBridgeError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("postgres connection lost")]
    ConnectionLost,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    table_name: String,
}

/// Whether a payload belongs on the supervisor stream. `Err` means the
/// payload is not JSON and must be skipped for the stream path only.
pub fn stream_eligible(payload: &str) -> Result<bool, serde_json::Error> {
    let event: EventPayload = serde_json::from_str(payload)?;
    Ok(USEFUL_TABLES.contains(&event.table_name.as_str()))
}

/// Listen and fan out until cancelled. Returns an error on lost Postgres
/// connectivity or a failed Redis bootstrap.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), EventBridgeError> {
    let client = redis::Client::open(config.redis_url.as_str())?;
    let mut redis = client.get_multiplexed_async_connection().await?;
    let _pong: String = redis::cmd("PING").query_async(&mut redis).await?;
    info!("connected to redis");

    let mut listener = PgListener::connect(&config.pg_dsn).await?;
    listener.listen(PG_CHANNEL).await?;
    info!(
        pg_channel = PG_CHANNEL,
        pubsub_channel = PUBSUB_CHANNEL,
        stream = STREAM_KEY,
        "listening for postgres notifications"
    );

    loop {
        let notification = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("cancelled, closing connections");
                return Ok(());
            }

            received = tokio::time::timeout(NOTIFICATION_WAIT, listener.try_recv()) => {
                match received {
                    Err(_) => continue, // wait timeout, poll cancellation again
                    Ok(Ok(Some(notification))) => notification,
                    Ok(Ok(None)) => return Err(EventBridgeError::ConnectionLost),
                    Ok(Err(err)) => return Err(err.into()),
                }
            }
        };

        let payload = notification.payload();

        // The legacy channel gets everything, before any filtering.
        let published: redis::RedisResult<i64> = redis.publish(PUBSUB_CHANNEL, payload).await;
        if let Err(err) = published {
            warn!(error = %err, "failed to publish to pub/sub channel");
        }

        match stream_eligible(payload) {
            Ok(true) => {
                let added: redis::RedisResult<String> =
                    redis.xadd(STREAM_KEY, "*", &[("payload", payload)]).await;
                if let Err(err) = added {
                    warn!(error = %err, "failed to publish to supervisor stream");
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, payload, "unparseable payload, skipping stream publish");
            }
        }
    }
}
