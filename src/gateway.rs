//! Remote submission store collaborator: append scored rows, query the
//! canonical newest-first list. A thin REST table client; transport-level
//! retries and consistency are explicitly not this crate's problem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::domain::{Identity, ScoringPayload};

/// Row pushed to the remote table when a submission completes.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NewSubmission {
    #[serde(rename = "submission_str")]
    pub text: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringPayload>,
}

impl NewSubmission {
    pub fn new(
        text: &str,
        identity: &Identity,
        exercise_id: Option<&str>,
        scoring: Option<ScoringPayload>,
    ) -> Self {
        Self {
            text: text.to_string(),
            user_id: identity.tag(),
            user_email: identity.email.clone(),
            user_name: (!identity.is_anonymous()).then(|| identity.display_name.clone()),
            exercise_id: exercise_id.map(str::to_string),
            scoring,
        }
    }
}

/// Row as the remote store reports it. Optional columns stay optional so one
/// malformed row does not sink the whole decode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteSubmission {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "submission_str")]
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub scoring: Option<ScoringPayload>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(String),
    #[error("gateway HTTP {0}")]
    Status(u16),
    #[error("gateway returned malformed payload: {0}")]
    Decode(String),
}

/// Seam to the remote store. `query` returns rows newest-first by creation
/// time; ties keep the order the store reports (no local re-sort).
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn append(&self, row: NewSubmission) -> Result<(), GatewayError>;
    async fn query(&self) -> Result<Vec<RemoteSubmission>, GatewayError>;
}

/// REST table client (Supabase-style endpoint): POST rows with a
/// merge-duplicates preference, GET ordered by `created_at` descending.
#[derive(Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestGateway {
    /// Build from env: SUBMISSIONS_API_URL (base of the table API) and
    /// SUBMISSIONS_API_KEY. Missing values still construct a client; requests
    /// will fail and be absorbed by the engine's degraded paths.
    pub fn from_env() -> Self {
        let base_url = std::env::var("SUBMISSIONS_API_URL")
            .unwrap_or_else(|_| "http://localhost:54321/rest/v1".into());
        let api_key = std::env::var("SUBMISSIONS_API_KEY").unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl SubmissionGateway for RestGateway {
    #[instrument(level = "info", skip_all, fields(text_len = row.text.len(), exercise = ?row.exercise_id))]
    async fn append(&self, row: NewSubmission) -> Result<(), GatewayError> {
        let url = format!("{}/submissions", self.base_url);
        let res = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header("apikey", &self.api_key)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !res.status().is_success() {
            return Err(GatewayError::Status(res.status().as_u16()));
        }
        info!(target: "engine", "Submission row appended");
        Ok(())
    }

    #[instrument(level = "info", skip_all)]
    async fn query(&self) -> Result<Vec<RemoteSubmission>, GatewayError> {
        let url = format!(
            "{}/submissions?select=*&order=created_at.desc",
            self.base_url
        );
        let res = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json; charset=utf-8")
            .header("apikey", &self.api_key)
            .header("authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !res.status().is_success() {
            return Err(GatewayError::Status(res.status().as_u16()));
        }
        let rows: Vec<RemoteSubmission> = res
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        info!(target: "engine", count = rows.len(), "Submission rows fetched");
        Ok(rows)
    }
}
