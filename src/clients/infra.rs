//! Infrastructure provisioning status
//!
//! One status query per poll, never cached. Provider status strings follow the
//! usual `<ACTION>_IN_PROGRESS` / `<ACTION>_COMPLETE` / `<ACTION>_FAILED`
//! convention and collapse into the four states the state machine cares about.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureStatus {
    Unknown,
    Provisioning,
    Ready,
    Failed,
}

impl InfrastructureStatus {
    /// Collapse a provider status string into the engine's view of it
    pub fn from_provider(raw: &str) -> Self {
        let status = raw.trim().to_ascii_uppercase();
        if status.is_empty() {
            Self::Unknown
        } else if status.ends_with("_FAILED") || status.contains("ROLLBACK") {
            Self::Failed
        } else if status.ends_with("_COMPLETE") || status == "READY" {
            Self::Ready
        } else if status.ends_with("_IN_PROGRESS") || status == "PROVISIONING" {
            Self::Provisioning
        } else {
            Self::Unknown
        }
    }
}

#[async_trait]
pub trait InfraStatusClient: Send + Sync {
    /// Current status of the named provisioning stack
    async fn status(&self, provisioning_name: &str) -> Result<InfrastructureStatus>;
}

#[derive(Debug, Deserialize)]
struct StackPayload {
    status: String,
}

pub struct HttpInfraStatusClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpInfraStatusClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl InfraStatusClient for HttpInfraStatusClient {
    async fn status(&self, provisioning_name: &str) -> Result<InfrastructureStatus> {
        let url = self
            .base_url
            .join(&format!("stacks/{provisioning_name}"))
            .map_err(|e| Error::InfraStatus(format!("invalid stack URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::InfraStatus(format!("status request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(InfrastructureStatus::Unknown);
        }

        if !response.status().is_success() {
            return Err(Error::InfraStatus(format!(
                "status returned HTTP {} for stack {provisioning_name}",
                response.status()
            )));
        }

        let payload: StackPayload = response
            .json()
            .await
            .map_err(|e| Error::InfraStatus(format!("status response malformed: {e}")))?;

        Ok(InfrastructureStatus::from_provider(&payload.status))
    }
}

/// Mock status source: queued statuses first, then a fixed default
pub struct MockInfraStatusClient {
    responses: Mutex<VecDeque<std::result::Result<InfrastructureStatus, String>>>,
    default: InfrastructureStatus,
    queries: AtomicUsize,
}

impl MockInfraStatusClient {
    /// A source that reports `default` once any queued responses run out
    pub fn new(default: InfrastructureStatus) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default,
            queries: AtomicUsize::new(0),
        }
    }

    /// A source that never reaches `Ready`
    pub fn never_ready() -> Self {
        Self::new(InfrastructureStatus::Provisioning)
    }

    pub fn then(self, status: InfrastructureStatus) -> Self {
        self.responses.lock().unwrap().push_back(Ok(status));
        self
    }

    pub fn then_error(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InfraStatusClient for MockInfraStatusClient {
    async fn status(&self, _provisioning_name: &str) -> Result<InfrastructureStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(Error::InfraStatus(message)),
            None => Ok(self.default),
        }
    }
}
