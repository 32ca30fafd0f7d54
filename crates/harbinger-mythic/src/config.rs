// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Mythic worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Harbinger-side id of the C2 server this worker mirrors
    pub c2_server_id: String,
    /// Address of the Harbinger gRPC server
    pub harbinger_grpc_host: String,
    /// Address of the workflow engine
    pub temporal_host: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `C2_SERVER_ID`: Harbinger id of the C2 server
    /// - `HARBINGER_GRPC_HOST`: Harbinger gRPC address
    /// - `TEMPORAL_HOST`: workflow engine address
    pub fn from_env() -> Result<Self, ConfigError> {
        let c2_server_id =
            std::env::var("C2_SERVER_ID").map_err(|_| ConfigError::Missing("C2_SERVER_ID"))?;
        let harbinger_grpc_host = std::env::var("HARBINGER_GRPC_HOST")
            .map_err(|_| ConfigError::Missing("HARBINGER_GRPC_HOST"))?;
        let temporal_host =
            std::env::var("TEMPORAL_HOST").map_err(|_| ConfigError::Missing("TEMPORAL_HOST"))?;

        Ok(Self {
            c2_server_id,
            harbinger_grpc_host,
            temporal_host,
        })
    }

    /// Name of the task queue this worker serves.
    pub fn task_queue(&self) -> String {
        format!("{}_jobs", self.c2_server_id)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}
