//! Downstream provisioning job invocation
//!
//! The infrastructure pipeline is separately owned and separately triggered.
//! Triggering it is best-effort by design: the orchestrator treats a trigger
//! failure as a warning, because the infrastructure may already exist or be
//! converging from an earlier run of the other pipeline.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::{Error, Result};

/// Reference to one run of the triggered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunRef {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCompletion {
    Succeeded,
    Failed(String),
}

#[async_trait]
pub trait JobClient: Send + Sync {
    /// Start the named job parameterized by the deployment identifier
    async fn trigger(&self, job: &str, identifier: &str) -> Result<JobRunRef>;

    /// Block until the given run completes
    async fn wait(&self, job: &str, run: &JobRunRef) -> Result<JobCompletion>;
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunStatusPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpJobClient {
    client: reqwest::Client,
    base_url: Url,
    wait_interval: Duration,
    wait_attempts: u32,
}

impl HttpJobClient {
    pub fn new(base_url: Url, wait_interval: Duration, wait_attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            wait_interval,
            wait_attempts,
        }
    }

    fn run_url(&self, job: &str, run_id: &str) -> Result<Url> {
        self.base_url
            .join(&format!("jobs/{job}/runs/{run_id}"))
            .map_err(|e| Error::JobInvocation(format!("invalid job URL: {e}")))
    }
}

#[async_trait]
impl JobClient for HttpJobClient {
    async fn trigger(&self, job: &str, identifier: &str) -> Result<JobRunRef> {
        let url = self
            .base_url
            .join(&format!("jobs/{job}/runs"))
            .map_err(|e| Error::JobInvocation(format!("invalid job URL: {e}")))?;

        let response = self
            .client
            .post(url)
            .json(&json!({ "parameters": { "identifier": identifier } }))
            .send()
            .await
            .map_err(|e| Error::JobInvocation(format!("trigger request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::JobInvocation(format!(
                "trigger returned HTTP {} for job {job}",
                response.status()
            )));
        }

        let payload: RunPayload = response
            .json()
            .await
            .map_err(|e| Error::JobInvocation(format!("trigger response malformed: {e}")))?;

        Ok(JobRunRef { run_id: payload.id })
    }

    async fn wait(&self, job: &str, run: &JobRunRef) -> Result<JobCompletion> {
        let url = self.run_url(job, &run.run_id)?;

        for attempt in 1..=self.wait_attempts {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::JobInvocation(format!("status request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(Error::JobInvocation(format!(
                    "status returned HTTP {} for run {}",
                    response.status(),
                    run.run_id
                )));
            }

            let payload: RunStatusPayload = response
                .json()
                .await
                .map_err(|e| Error::JobInvocation(format!("status response malformed: {e}")))?;

            match payload.status.as_str() {
                "succeeded" => return Ok(JobCompletion::Succeeded),
                "failed" => {
                    return Ok(JobCompletion::Failed(
                        payload.message.unwrap_or_else(|| "job run failed".to_string()),
                    ))
                }
                other => {
                    tracing::debug!(
                        "Job run {} still {} (attempt {}/{})",
                        run.run_id,
                        other,
                        attempt,
                        self.wait_attempts
                    );
                }
            }

            if attempt < self.wait_attempts {
                tokio::time::sleep(self.wait_interval).await;
            }
        }

        Err(Error::JobInvocation(format!(
            "run {} did not complete within {} attempts",
            run.run_id, self.wait_attempts
        )))
    }
}

/// Mock job client recording triggers and returning queued results
#[derive(Default)]
pub struct MockJobClient {
    triggers: Mutex<Vec<(String, String)>>,
    trigger_failures: Mutex<VecDeque<String>>,
    completions: Mutex<VecDeque<JobCompletion>>,
}

impl MockJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a trigger failure for the next trigger call
    pub fn fails_trigger(self, message: &str) -> Self {
        self.trigger_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
        self
    }

    pub fn completes_with(self, completion: JobCompletion) -> Self {
        self.completions.lock().unwrap().push_back(completion);
        self
    }

    pub fn triggered(&self) -> Vec<(String, String)> {
        self.triggers.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobClient for MockJobClient {
    async fn trigger(&self, job: &str, identifier: &str) -> Result<JobRunRef> {
        if let Some(message) = self.trigger_failures.lock().unwrap().pop_front() {
            return Err(Error::JobInvocation(message));
        }
        self.triggers
            .lock()
            .unwrap()
            .push((job.to_string(), identifier.to_string()));
        Ok(JobRunRef {
            run_id: format!("mock-run-{identifier}"),
        })
    }

    async fn wait(&self, _job: &str, _run: &JobRunRef) -> Result<JobCompletion> {
        Ok(self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobCompletion::Succeeded))
    }
}
