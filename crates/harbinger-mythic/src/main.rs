// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Harbinger Mythic worker entry point.

use anyhow::Result;
use tracing::{error, info};

use harbinger_mythic::config::Config;
use harbinger_mythic::worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harbinger_mythic=info".parse()?),
        )
        .init();

    info!("Starting Mythic worker");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    worker::run(config).await?;
    Ok(())
}
