//! Firebase ID-token verification via the Identity Toolkit REST API.
//!
//! `POST {base}/accounts:lookup?key=<web api key>` with `{"idToken": ...}`
//! returns the account the token belongs to. An unknown, expired or
//! disabled account is a rejection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::IdentityVerifier;
use crate::config::AuthConfig;
use crate::types::{truncate_body, AirError, UserId};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    disabled: bool,
}

pub struct FirebaseTokenVerifier {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl FirebaseTokenVerifier {
    pub fn new(api_key: String, config: &AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("WhisperingWinds/0.1.0")
            .build()
            .context("Failed to build identity HTTP client")?;

        Ok(Self {
            http,
            api_key: SecretString::new(api_key),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self) -> String {
        format!(
            "{}/accounts:lookup?key={}",
            self.base_url,
            urlencoding::encode(self.api_key.expose_secret())
        )
    }
}

/// Interpret an `accounts:lookup` reply.
pub fn user_from_lookup(status: u16, body: &str) -> Result<UserId, AirError> {
    if !(200..300).contains(&status) {
        warn!(status, body = %truncate_body(body), "Token rejected by identity service");
        return Err(AirError::AuthRejected);
    }

    let parsed: LookupResponse = serde_json::from_str(body).map_err(|e| {
        warn!(error = %e, "Unreadable identity service reply");
        AirError::AuthRejected
    })?;

    match parsed.users.into_iter().next() {
        Some(account) if account.disabled => {
            warn!(uid = %account.local_id, "Token belongs to a disabled account");
            Err(AirError::AuthRejected)
        }
        Some(account) if !account.local_id.is_empty() => Ok(UserId::new(account.local_id)),
        _ => {
            warn!("Identity service returned no account for token");
            Err(AirError::AuthRejected)
        }
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AirError> {
        let token = token.trim();
        if token.is_empty() {
            warn!("Empty ID token");
            return Err(AirError::AuthRejected);
        }

        let resp = self
            .http
            .post(self.lookup_url())
            .json(&LookupRequest { id_token: token })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e.without_url(), "Identity service unreachable");
                AirError::AuthRejected
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            warn!(error = %e.without_url(), "Failed to read identity service reply");
            AirError::AuthRejected
        })?;

        let user = user_from_lookup(status, &body)?;
        debug!(uid = %user, "Token verified");
        Ok(user)
    }
}
