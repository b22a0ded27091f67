//! Artifact deploy and post-deploy verification
//!
//! An absent target is not an error at this layer. The infrastructure pipeline
//! may still be creating it, so the deployer reports `SkippedNotFound` and the
//! verifier reports `NotFound`, leaving the continuation policy to the state
//! machine. Transport and auth failures are fatal.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use url::Url;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployResult {
    Updated,
    SkippedNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Found,
    NotFound,
}

#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Whether the deploy target has been provisioned yet
    async fn target_exists(&self, target: &str) -> Result<bool>;

    /// Push the artifact to an existing target
    async fn update_artifact(&self, target: &str, artifact: &str) -> Result<()>;

    /// Post-deploy reachability check
    async fn verify(&self, target: &str) -> Result<VerifyResult>;
}

pub struct HttpDeployClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDeployClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn target_url(&self, target: &str) -> Result<Url> {
        self.base_url
            .join(&format!("targets/{target}"))
            .map_err(|e| Error::Deploy(format!("invalid target URL: {e}")))
    }

    async fn probe(&self, target: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.target_url(target)?)
            .send()
            .await
            .map_err(|e| Error::Deploy(format!("target probe failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Error::Deploy(format!(
                "target probe returned HTTP {} for {target}",
                response.status()
            )));
        }
        Ok(true)
    }
}

#[async_trait]
impl DeployClient for HttpDeployClient {
    async fn target_exists(&self, target: &str) -> Result<bool> {
        self.probe(target).await
    }

    async fn update_artifact(&self, target: &str, artifact: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("targets/{target}/artifact"))
            .map_err(|e| Error::Deploy(format!("invalid target URL: {e}")))?;

        let response = self
            .client
            .put(url)
            .json(&json!({ "package": artifact }))
            .send()
            .await
            .map_err(|e| Error::Deploy(format!("artifact update failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Deploy(format!(
                "artifact update returned HTTP {} for {target}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn verify(&self, target: &str) -> Result<VerifyResult> {
        Ok(if self.probe(target).await? {
            VerifyResult::Found
        } else {
            VerifyResult::NotFound
        })
    }
}

/// Mock deploy client with scripted existence answers and recorded updates
#[derive(Default)]
pub struct MockDeployClient {
    exists_responses: Mutex<VecDeque<std::result::Result<bool, String>>>,
    verify_responses: Mutex<VecDeque<std::result::Result<VerifyResult, String>>>,
    update_failures: Mutex<VecDeque<String>>,
    updates: Mutex<Vec<(String, String)>>,
}

impl MockDeployClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_exists_then(self, exists: bool) -> Self {
        self.exists_responses.lock().unwrap().push_back(Ok(exists));
        self
    }

    pub fn fails_exists(self, message: &str) -> Self {
        self.exists_responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn verifies_with(self, result: VerifyResult) -> Self {
        self.verify_responses.lock().unwrap().push_back(Ok(result));
        self
    }

    pub fn fails_update(self, message: &str) -> Self {
        self.update_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
        self
    }

    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployClient for MockDeployClient {
    async fn target_exists(&self, _target: &str) -> Result<bool> {
        match self.exists_responses.lock().unwrap().pop_front() {
            Some(Ok(exists)) => Ok(exists),
            Some(Err(message)) => Err(Error::Deploy(message)),
            None => Ok(true),
        }
    }

    async fn update_artifact(&self, target: &str, artifact: &str) -> Result<()> {
        if let Some(message) = self.update_failures.lock().unwrap().pop_front() {
            return Err(Error::Deploy(message));
        }
        self.updates
            .lock()
            .unwrap()
            .push((target.to_string(), artifact.to_string()));
        Ok(())
    }

    async fn verify(&self, _target: &str) -> Result<VerifyResult> {
        match self.verify_responses.lock().unwrap().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(Error::Deploy(message)),
            None => Ok(VerifyResult::Found),
        }
    }
}
