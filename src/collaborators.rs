//! External collaborators reached over HTTP.
//!
//! The token issuer gates the primary transport; summary and scoring run
//! only after `SessionComplete` and are fire-and-forget relative to the
//! turn-taking loop: no failure here may block or corrupt engine state.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::CollaboratorConfig;
use crate::error::ConnectError;
use crate::session::SessionReport;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Request a short-lived credential for the realtime connection.
///
/// Any failure is a `ConnectError::Token`: the caller treats it exactly
/// like a primary connect failure and fails over.
pub async fn fetch_realtime_token(
    client: &Client,
    token_url: &str,
    session_id: Uuid,
) -> Result<String, ConnectError> {
    let body = json!({
        "session_id": session_id,
        "scope": "realtime",
    });

    let response = client
        .post(token_url)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| ConnectError::Token(format!("request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(ConnectError::Token(format!("HTTP {}", response.status())));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| ConnectError::Token(format!("JSON parse error: {}", e)))?;

    Ok(parsed.token)
}

/// Hand the completed (possibly partial) transcript to the summary and
/// scoring collaborators. Spawned detached; errors are logged and
/// swallowed.
pub fn deliver_report(config: &CollaboratorConfig, report: SessionReport) {
    let client = Client::new();
    let summary_url = config.summary_url.clone();
    let scoring_url = config.scoring_url.clone();

    tokio::spawn(async move {
        for url in [summary_url, scoring_url] {
            if url.is_empty() {
                continue;
            }
            match client.post(&url).json(&report).send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("Delivered session report to {}", url);
                }
                Ok(resp) => {
                    log::warn!("Report delivery to {} returned HTTP {}", url, resp.status());
                }
                Err(e) => {
                    log::warn!("Report delivery to {} failed: {}", url, e);
                }
            }
        }
    });
}
