//! Default-identity credential acquisition
//!
//! Resolves a bearer token for the storage service from the ambient
//! identity: the instance metadata endpoint when running on Azure
//! compute, falling back to the local az CLI session.

use crate::error::{CacheError, CacheResult};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
const IMDS_TOKEN_URL: &str =
    "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01";
const IMDS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ambient Azure credential provider
pub struct AzureCredentials;

impl AzureCredentials {
    /// Resolve an access token for the blob service.
    pub async fn access_token(client_id: Option<&str>) -> CacheResult<String> {
        match Self::managed_identity_token(client_id).await {
            Ok(token) => Ok(token),
            Err(e) => {
                debug!(error = %e, "Managed identity unavailable, trying az CLI");
                Self::cli_token().await
            }
        }
    }

    /// Get a token from the instance metadata service
    async fn managed_identity_token(client_id: Option<&str>) -> CacheResult<String> {
        let http = reqwest::Client::builder()
            .timeout(IMDS_PROBE_TIMEOUT)
            .build()
            .map_err(|e| CacheError::AzureCredential(e.to_string()))?;

        let mut request = http
            .get(IMDS_TOKEN_URL)
            .query(&[("resource", STORAGE_RESOURCE)])
            .header("Metadata", "true");
        if let Some(id) = client_id {
            request = request.query(&[("client_id", id)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CacheError::AzureCredential(format!("IMDS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::AzureCredential(format!(
                "IMDS returned {}",
                response.status()
            )));
        }

        let token: ImdsTokenResponse = response
            .json()
            .await
            .map_err(|e| CacheError::AzureCredential(format!("Failed to parse response: {e}")))?;

        Ok(token.access_token)
    }

    /// Get a token from the az CLI session
    async fn cli_token() -> CacheResult<String> {
        debug!("Requesting Azure access token from az CLI...");

        let output = Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                STORAGE_RESOURCE,
                "--output",
                "json",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                CacheError::AzureCredential(format!("az account get-access-token: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("az login") || stderr.contains("not logged in") {
                return Err(CacheError::AzureNotAuthenticated);
            }
            return Err(CacheError::AzureCredential(stderr.to_string()));
        }

        let response: CliTokenResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            CacheError::AzureCredential(format!("Failed to parse response: {e}"))
        })?;

        Ok(response.access_token)
    }
}

#[derive(Deserialize)]
struct ImdsTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
}
