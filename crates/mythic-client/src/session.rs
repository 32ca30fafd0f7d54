// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session state: bearer credentials and the authenticated HTTP client.
//!
//! The session owns the tokens returned by `/auth` and the `reqwest` client
//! used for every REST and GraphQL call. The bearer is kept behind a small
//! `RwLock` so the refresh ticker can replace it while the subscription
//! multiplexer and request paths keep reading the current value without
//! coordinating with each other.

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{MythicError, Result};
use crate::types::{AuthResponse, LoginMessage, RefreshMessage};

#[derive(Debug, Clone, Default)]
struct Tokens {
    access: String,
    refresh: String,
}

/// An authenticated session against one Mythic server.
pub struct Session {
    hostname: String,
    port: u16,
    username: String,
    password: String,
    tls: bool,
    http: reqwest::Client,
    tokens: RwLock<Tokens>,
}

impl Session {
    /// Log in and construct a session.
    ///
    /// Mythic serves a self-signed certificate, so certificate verification
    /// is disabled on the HTTP client. `tls: false` targets deployments that
    /// terminate TLS in front of the server.
    pub async fn login(
        hostname: &str,
        port: u16,
        username: &str,
        password: &str,
        tls: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        let session = Self {
            hostname: hostname.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            tls,
            http,
            tokens: RwLock::new(Tokens::default()),
        };

        let auth = session.authenticate().await?;
        session.store(auth);
        Ok(session)
    }

    /// Base URL for REST and GraphQL requests.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.hostname, self.port)
    }

    /// URL of the GraphQL WebSocket endpoint.
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}/graphql", scheme, self.hostname, self.port)
    }

    /// The hostname this session is bound to.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Current `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.tokens.read().access)
    }

    /// The shared HTTP client. Callers attach the bearer per request.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Refresh the access token, falling back to a full login when the
    /// refresh endpoint does not return one.
    pub async fn refresh(&self) -> Result<()> {
        let message = {
            let tokens = self.tokens.read();
            RefreshMessage {
                access_token: tokens.access.clone(),
                refresh_token: tokens.refresh.clone(),
            }
        };

        let response = self
            .http
            .post(format!("{}/refresh", self.base_url()))
            .json(&message)
            .send()
            .await?;
        let auth: AuthResponse = response.json().await?;

        if auth.access_token.is_empty() {
            warn!("no access token received, logging in again");
            let auth = self.authenticate().await?;
            self.store(auth);
        } else {
            self.store(auth);
        }
        Ok(())
    }

    async fn authenticate(&self) -> Result<AuthResponse> {
        let message = LoginMessage {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        let response = self
            .http
            .post(format!("{}/auth", self.base_url()))
            .json(&message)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MythicError::Auth(
                "incorrect username or password".to_string(),
            ));
        }
        Ok(response.json().await?)
    }

    fn store(&self, auth: AuthResponse) {
        let mut tokens = self.tokens.write();
        tokens.access = auth.access_token;
        tokens.refresh = auth.refresh_token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_tokens(access: &str, refresh: &str) -> Session {
        Session {
            hostname: "mythic.local".to_string(),
            port: 7443,
            username: "user".to_string(),
            password: "pass".to_string(),
            tls: true,
            http: reqwest::Client::new(),
            tokens: RwLock::new(Tokens {
                access: access.to_string(),
                refresh: refresh.to_string(),
            }),
        }
    }

    #[test]
    fn bearer_reads_current_access_token() {
        let session = session_with_tokens("token-a", "refresh-a");
        assert_eq!(session.bearer(), "Bearer token-a");

        session.store(AuthResponse {
            access_token: "token-b".to_string(),
            refresh_token: "refresh-b".to_string(),
        });
        assert_eq!(session.bearer(), "Bearer token-b");
    }

    #[test]
    fn urls_follow_tls_flag() {
        let session = session_with_tokens("t", "r");
        assert_eq!(session.base_url(), "https://mythic.local:7443");
        assert_eq!(session.ws_url(), "wss://mythic.local:7443/graphql");
    }
}
