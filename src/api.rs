//! HTTP snapshot and metadata endpoints.
//!
//! The sync engine only needs "GET a path, give me JSON"; that seam is the
//! [`HistorySource`] trait so tests can script snapshot responses. The
//! concrete [`ApiClient`] adds the project/run metadata calls used by the
//! CLI.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures, non-2xx statuses and undecodable bodies surface as
//! distinct [`ApiError`] variants; the status variant carries the response
//! body so server-side messages reach the caller.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use wire::EventKind;

use crate::condition::Condition;
use crate::config::ClientConfig;
use crate::types::{ProjectStatus, RunStatus, RunUpdate};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {path}: {body}")]
    Status { status: u16, path: String, body: String },
    #[error("invalid JSON from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that can answer a GET with a JSON body.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch `path_and_query`, relative to the API base.
    async fn get_json(&self, path_and_query: &str) -> Result<Value, ApiError>;
}

pub(crate) fn history_path(kind: &EventKind, project_id: &str, condition: &Condition) -> String {
    format!(
        "/{}/{}/history?{}",
        kind.as_str(),
        urlencoding::encode(project_id),
        condition.encode()
    )
}

pub(crate) fn project_path(project_id: &str) -> String {
    format!("/project/{}", urlencoding::encode(project_id))
}

pub(crate) fn run_path(project_id: &str, run_id: &str) -> String {
    format!(
        "/project/{}/run/{}",
        urlencoding::encode(project_id),
        urlencoding::encode(run_id)
    )
}

pub(crate) fn series_path(project_id: &str, kind: &EventKind, run_id: &str) -> String {
    format!(
        "/project/{}/series/{}?runId={}",
        urlencoding::encode(project_id),
        kind.as_str(),
        urlencoding::encode(run_id)
    )
}

pub(crate) fn image_path(project_id: &str, image_id: i64) -> String {
    format!("/project/{}/image/{image_id}", urlencoding::encode(project_id))
}

/// reqwest-backed client for the backend REST API.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the underlying client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { http, base: config.api_base() })
    }

    /// API base URL, e.g. `http://127.0.0.1:20202/api`.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// History records of `kind` for a project, filtered by `condition`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx status or a non-JSON body.
    pub async fn history(
        &self,
        kind: &EventKind,
        project_id: &str,
        condition: &Condition,
    ) -> Result<Value, ApiError> {
        self.get_json(&history_path(kind, project_id, condition)).await
    }

    /// # Errors
    ///
    /// Fails on transport errors, non-2xx status or an unexpected body.
    pub async fn project_status(&self, project_id: &str) -> Result<ProjectStatus, ApiError> {
        self.get_typed(&project_path(project_id)).await
    }

    /// # Errors
    ///
    /// Fails on transport errors, non-2xx status or an unexpected body.
    pub async fn run_status(&self, project_id: &str, run_id: &str) -> Result<RunStatus, ApiError> {
        self.get_typed(&run_path(project_id, run_id)).await
    }

    /// Series names observed for a (project, run, event type).
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx status or an unexpected body.
    pub async fn series_names(
        &self,
        project_id: &str,
        run_id: &str,
        kind: &EventKind,
    ) -> Result<Vec<String>, ApiError> {
        self.get_typed(&series_path(project_id, kind, run_id)).await
    }

    /// Rename a run or change its notes.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or non-2xx status.
    pub async fn update_run(
        &self,
        project_id: &str,
        run_id: &str,
        update: &RunUpdate,
    ) -> Result<Value, ApiError> {
        let path = run_path(project_id, run_id);
        tracing::info!(%project_id, %run_id, "updating run metadata");
        let response = self.http.put(self.url(&path)).json(update).send().await?;
        read_json(&path, response).await
    }

    /// # Errors
    ///
    /// Fails on transport errors or non-2xx status.
    pub async fn delete_run(&self, project_id: &str, run_id: &str) -> Result<Value, ApiError> {
        let path = run_path(project_id, run_id);
        tracing::info!(%project_id, %run_id, "deleting run");
        let response = self.http.delete(self.url(&path)).send().await?;
        read_json(&path, response).await
    }

    /// Absolute URL of a stored image.
    #[must_use]
    pub fn image_url(&self, project_id: &str, image_id: i64) -> String {
        self.url(&image_path(project_id, image_id))
    }

    async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.get_json(path).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            path: path.to_owned(),
            source,
        })
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn get_json(&self, path_and_query: &str) -> Result<Value, ApiError> {
        tracing::debug!(path = %path_and_query, "GET");
        let response = self.http.get(self.url(path_and_query)).send().await?;
        read_json(path_and_query, response).await
    }
}

/// Status check plus JSON decode; an empty 2xx body reads as `null`.
async fn read_json(path: &str, response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            path: path.to_owned(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|source| ApiError::Decode {
        path: path.to_owned(),
        source,
    })
}
