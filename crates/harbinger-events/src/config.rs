// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use tracing::warn;

/// Event bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string, normalized for this process
    pub pg_dsn: String,
    /// Redis connection URL
    pub redis_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PG_DSN`: PostgreSQL connection string. A `+asyncpg` driver suffix
    ///   is stripped and `?sslmode=disable` appended.
    ///
    /// Redis, one of:
    /// - `REDIS_DSN`: full Redis URL
    /// - `REDIS_HOST` (default `localhost:6379`), `REDIS_PASSWORD`,
    ///   `REDIS_DB` (default 0; invalid values log a warning and use 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_dsn = std::env::var("PG_DSN").map_err(|_| ConfigError::Missing("PG_DSN"))?;
        let pg_dsn = normalize_pg_dsn(&raw_dsn);

        let redis_url = match std::env::var("REDIS_DSN") {
            Ok(dsn) if !dsn.is_empty() => dsn,
            _ => {
                let host = std::env::var("REDIS_HOST")
                    .ok()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "localhost:6379".to_string());
                let password = std::env::var("REDIS_PASSWORD").unwrap_or_default();
                let db = match std::env::var("REDIS_DB") {
                    Ok(raw) if !raw.is_empty() => raw.parse::<i64>().unwrap_or_else(|_| {
                        warn!(value = %raw, "invalid REDIS_DB, defaulting to 0");
                        0
                    }),
                    _ => 0,
                };
                redis_url(&host, &password, db)
            }
        };

        Ok(Self { pg_dsn, redis_url })
    }
}

/// Strip the `+asyncpg` driver marker and force sslmode off; the bridge
/// connects over the internal network.
pub fn normalize_pg_dsn(raw: &str) -> String {
    let stripped = raw.replacen("+asyncpg", "", 1);
    format!("{stripped}?sslmode=disable")
}

/// Assemble a Redis URL from its parts.
pub fn redis_url(host: &str, password: &str, db: i64) -> String {
    if password.is_empty() {
        format!("redis://{host}/{db}")
    } else {
        format!("redis://:{password}@{host}/{db}")
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asyncpg_marker_is_stripped_once() {
        assert_eq!(
            normalize_pg_dsn("postgresql+asyncpg://user:pass@db:5432/harbinger"),
            "postgresql://user:pass@db:5432/harbinger?sslmode=disable"
        );
    }

    #[test]
    fn plain_dsn_only_gains_sslmode() {
        assert_eq!(
            normalize_pg_dsn("postgresql://user@db/harbinger"),
            "postgresql://user@db/harbinger?sslmode=disable"
        );
    }

    #[test]
    fn redis_url_with_and_without_password() {
        assert_eq!(redis_url("redis:6379", "", 0), "redis://redis:6379/0");
        assert_eq!(
            redis_url("redis:6379", "hunter2", 2),
            "redis://:hunter2@redis:6379/2"
        );
    }
}
