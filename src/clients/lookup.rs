//! Authoritative proposal lookup
//!
//! Queries the source-control platform for open proposals whose head matches a
//! branch. A transport or API failure here is fatal to the run: silently
//! skipping the authoritative id would let two pipelines derive different
//! identifiers for the same change.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::{Error, Result};

/// An open change proposal carrying the platform's numeric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub number: u64,
}

#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Open proposals whose head branch equals `branch`, most relevant first
    async fn open_proposals(&self, branch: &str) -> Result<Vec<Proposal>>;
}

#[derive(Debug, Deserialize)]
struct ProposalPayload {
    number: u64,
}

pub struct HttpLookupClient {
    client: reqwest::Client,
    base_url: Url,
    repository: String,
}

impl HttpLookupClient {
    pub fn new(base_url: Url, repository: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            repository: repository.to_string(),
        }
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn open_proposals(&self, branch: &str) -> Result<Vec<Proposal>> {
        let url = self
            .base_url
            .join(&format!("repos/{}/pulls", self.repository))
            .map_err(|e| Error::Lookup(format!("invalid lookup URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .query(&[("state", "open"), ("head", branch)])
            .send()
            .await
            .map_err(|e| Error::Lookup(format!("lookup request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Lookup(format!(
                "lookup returned HTTP {} for branch {branch}",
                response.status()
            )));
        }

        let payload: Vec<ProposalPayload> = response
            .json()
            .await
            .map_err(|e| Error::Lookup(format!("lookup response malformed: {e}")))?;

        Ok(payload
            .into_iter()
            .map(|p| Proposal { number: p.number })
            .collect())
    }
}

/// Lookup client for offline resolution: reports no open proposals, so the
/// ladder falls through to the branch-local rules
pub struct NoopLookupClient;

#[async_trait]
impl LookupClient for NoopLookupClient {
    async fn open_proposals(&self, _branch: &str) -> Result<Vec<Proposal>> {
        Ok(Vec::new())
    }
}

/// Mock lookup client with queued responses and a call counter
#[derive(Default)]
pub struct MockLookupClient {
    responses: Mutex<VecDeque<std::result::Result<Vec<Proposal>, String>>>,
    calls: AtomicUsize,
}

impl MockLookupClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(self, proposals: Vec<Proposal>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(proposals));
        self
    }

    pub fn fails(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupClient for MockLookupClient {
    async fn open_proposals(&self, _branch: &str) -> Result<Vec<Proposal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(proposals)) => Ok(proposals),
            Some(Err(message)) => Err(Error::Lookup(message)),
            // No queued response means "no open proposal" for every branch.
            None => Ok(Vec::new()),
        }
    }
}
