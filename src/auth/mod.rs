//! Identity verification.
//!
//! Callers present an opaque ID token; an [`IdentityVerifier`] turns it
//! into a stable [`UserId`] or rejects it. The only production verifier
//! is [`FirebaseTokenVerifier`].

pub mod firebase;

pub use firebase::FirebaseTokenVerifier;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{AirError, UserId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve `token` to the user it was issued for.
    ///
    /// Every failure (bad token, revoked account, identity service down)
    /// is reported as `AirError::AuthRejected`.
    async fn verify(&self, token: &str) -> Result<UserId, AirError>;
}

/// The subset of a service-account key file the service needs.
///
/// The private key is never deserialized.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    #[serde(rename = "type")]
    pub account_type: String,
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
}

impl ServiceAccount {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account credentials from {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid service account file {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let account: ServiceAccount =
            serde_json::from_str(contents).context("Failed to parse service account JSON")?;

        if account.account_type != "service_account" {
            bail!("expected type \"service_account\", found {:?}", account.account_type);
        }
        if account.project_id.trim().is_empty() {
            bail!("service account has an empty project_id");
        }
        Ok(account)
    }
}
