//! The per-run deployment state machine
//!
//! One `PipelineRun` per triggering branch event, strictly sequential. The
//! failure policy is deliberately asymmetric: identifier resolution and the
//! config publish fail fast, because a wrong or duplicate identifier corrupts
//! everything downstream; the infrastructure stages degrade gracefully,
//! because provisioning is owned by a separately-triggered pipeline and may
//! converge after this run finishes. Degraded continuations are type-visible
//! as [`StageOutcome::Degraded`] and surface as warnings in the
//! [`RunReport`], never as failures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::clients::{
    DeployClient, DeployResult, InfraStatusClient, JobClient, JobCompletion, LookupClient,
    VerifyResult,
};
use crate::identifier::{self, BranchEvent, DeploymentIdentifier};
use crate::poll::{self, PollOutcome, PollPolicy};
use crate::store::{ConfigRecord, ConfigStore, PublishAck};
use crate::vcs::VcsClient;
use crate::{Error, Result};

/// Immutable per-run context threaded through every stage call
#[derive(Debug, Clone)]
pub struct RunContext {
    pub identifier: DeploymentIdentifier,
    pub artifact_package_name: String,
    pub target_name: String,
    pub storage_target_name: String,
    pub provisioning_name: String,
}

impl RunContext {
    /// Derive every resource name from the app name and identifier. Both
    /// pipelines use this scheme, so they agree on names by construction.
    pub fn derive(
        app_name: &str,
        identifier: DeploymentIdentifier,
        artifact_override: Option<&str>,
    ) -> Self {
        let id = identifier.as_str();
        Self {
            target_name: format!("{app_name}-{id}"),
            storage_target_name: format!("{app_name}-{id}-store"),
            provisioning_name: format!("{app_name}-{id}-stack"),
            artifact_package_name: artifact_override
                .map(String::from)
                .unwrap_or_else(|| format!("{app_name}-{id}.zip")),
            identifier,
        }
    }

    fn to_record(&self) -> ConfigRecord {
        ConfigRecord {
            identifier: self.identifier.as_str().to_string(),
            artifact_package_name: self.artifact_package_name.clone(),
            target_name: self.target_name.clone(),
            storage_target_name: self.storage_target_name.clone(),
            provisioning_name: self.provisioning_name.clone(),
            created_at: Utc::now(),
        }
    }
}

/// States of one deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    IdentifierResolved,
    ConfigPublished,
    InfraTriggered,
    InfraReady,
    /// Readiness budget exhausted; degraded but continuing
    InfraTimeout,
    ArtifactDeployed,
    Verified,
    VerifySkipped,
    ResolutionFailed,
    PublishFailed,
    DeployFailed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Verified
                | RunState::VerifySkipped
                | RunState::ResolutionFailed
                | RunState::PublishFailed
                | RunState::DeployFailed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Verified | RunState::VerifySkipped)
    }
}

/// Result of one stage: done, or continuing with a reason worth surfacing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Degraded { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// One pipeline run. Owned by the orchestrator, discarded at terminal state.
#[derive(Debug)]
pub struct PipelineRun {
    pub id: String,
    pub state: RunState,
    pub history: Vec<Transition>,
}

impl PipelineRun {
    fn new() -> Self {
        let initial = Transition {
            state: RunState::Init,
            at: Utc::now(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: RunState::Init,
            history: vec![initial],
        }
    }

    fn advance(&mut self, state: RunState) {
        debug_assert!(!self.state.is_terminal(), "advance past terminal state");
        tracing::debug!("Run {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
        self.history.push(Transition {
            state,
            at: Utc::now(),
        });
    }
}

/// What the run did, for the caller and the CLI summary
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub identifier: DeploymentIdentifier,
    pub final_state: RunState,
    pub warnings: Vec<String>,
    pub transitions: Vec<Transition>,
}

/// Per-run knobs, resolved from settings and CLI flags
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub app_name: String,
    pub job_name: String,
    /// Wait for the triggered provisioning run to complete before polling
    pub blocking_job: bool,
    /// Skip the downstream trigger, e.g. redeploys against existing infra
    pub trigger_job: bool,
    pub artifact_override: Option<String>,
    pub poll: PollPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            job_name: "provision-infra".to_string(),
            blocking_job: false,
            trigger_job: true,
            artifact_override: None,
            poll: PollPolicy::default(),
        }
    }
}

/// Sequences one branch event through resolve, publish, trigger, poll,
/// deploy, and verify
pub struct Orchestrator {
    vcs: Arc<dyn VcsClient>,
    lookup: Arc<dyn LookupClient>,
    store: Arc<dyn ConfigStore>,
    jobs: Arc<dyn JobClient>,
    infra: Arc<dyn InfraStatusClient>,
    deploy: Arc<dyn DeployClient>,
    options: RunOptions,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vcs: Arc<dyn VcsClient>,
        lookup: Arc<dyn LookupClient>,
        store: Arc<dyn ConfigStore>,
        jobs: Arc<dyn JobClient>,
        infra: Arc<dyn InfraStatusClient>,
        deploy: Arc<dyn DeployClient>,
        options: RunOptions,
    ) -> Self {
        Self {
            vcs,
            lookup,
            store,
            jobs,
            infra,
            deploy,
            options,
        }
    }

    /// Drive one event to a terminal state.
    ///
    /// Returns `Err` only for the fatal classes: resolution, publish
    /// transport, and deploy/verify transport failures. Everything else
    /// degrades into warnings on the report.
    pub async fn run(&self, event: BranchEvent) -> Result<RunReport> {
        let mut run = PipelineRun::new();
        let mut warnings: Vec<String> = Vec::new();

        let event = self.materialize_event(event, &mut run).await?;

        let identifier = match identifier::resolve(&event, self.lookup.as_ref()).await {
            Ok(identifier) => identifier,
            Err(e) => {
                run.advance(RunState::ResolutionFailed);
                tracing::error!("Run {}: identifier resolution failed: {}", run.id, e);
                return Err(e);
            }
        };
        run.advance(RunState::IdentifierResolved);
        tracing::info!(
            "Run {}: resolved identifier {} ({})",
            run.id,
            identifier,
            identifier.method()
        );

        let context = RunContext::derive(
            &self.options.app_name,
            identifier,
            self.options.artifact_override.as_deref(),
        );

        self.publish_config(&context, &mut run).await?;

        match self.invoke_provisioning(&context).await {
            StageOutcome::Completed => {}
            StageOutcome::Degraded { reason } => {
                tracing::warn!("Run {}: {}", run.id, reason);
                warnings.push(reason);
            }
        }
        run.advance(RunState::InfraTriggered);

        match poll::wait_for_ready(
            self.infra.as_ref(),
            &context.provisioning_name,
            &self.options.poll,
        )
        .await
        {
            PollOutcome::Ready { .. } => run.advance(RunState::InfraReady),
            PollOutcome::TimedOut { attempts } => {
                let reason = format!(
                    "infrastructure {} not ready after {} poll attempt(s); continuing",
                    context.provisioning_name, attempts
                );
                tracing::warn!("Run {}: {}", run.id, reason);
                warnings.push(reason);
                run.advance(RunState::InfraTimeout);
            }
            PollOutcome::ProvisioningFailed { attempts } => {
                let reason = format!(
                    "infrastructure {} reported failed provisioning on attempt {}; continuing",
                    context.provisioning_name, attempts
                );
                tracing::warn!("Run {}: {}", run.id, reason);
                warnings.push(reason);
                run.advance(RunState::InfraTimeout);
            }
        }

        match self.deploy_artifact(&context).await {
            Ok(DeployResult::Updated) => {
                tracing::info!(
                    "Run {}: artifact {} deployed to {}",
                    run.id,
                    context.artifact_package_name,
                    context.target_name
                );
            }
            Ok(DeployResult::SkippedNotFound) => {
                let reason = format!(
                    "deploy target {} not provisioned yet; deploy skipped",
                    context.target_name
                );
                tracing::warn!("Run {}: {}", run.id, reason);
                warnings.push(reason);
            }
            Err(e) => {
                run.advance(RunState::DeployFailed);
                tracing::error!("Run {}: deploy failed: {}", run.id, e);
                return Err(e);
            }
        }
        run.advance(RunState::ArtifactDeployed);

        match self.deploy.verify(&context.target_name).await {
            Ok(VerifyResult::Found) => run.advance(RunState::Verified),
            Ok(VerifyResult::NotFound) => {
                let reason = format!(
                    "verification found no target {}; infrastructure may still be converging",
                    context.target_name
                );
                tracing::warn!("Run {}: {}", run.id, reason);
                warnings.push(reason);
                run.advance(RunState::VerifySkipped);
            }
            Err(e) => {
                run.advance(RunState::DeployFailed);
                tracing::error!("Run {}: verification failed: {}", run.id, e);
                return Err(e);
            }
        }

        Ok(RunReport {
            run_id: run.id,
            identifier: context.identifier,
            final_state: run.state,
            warnings,
            transitions: run.history,
        })
    }

    /// Fill in the branch and commit from the checkout when the event does
    /// not carry them (detached HEAD, shallow CI checkouts)
    async fn materialize_event(
        &self,
        mut event: BranchEvent,
        run: &mut PipelineRun,
    ) -> Result<BranchEvent> {
        let needs_branch =
            event.change_id.is_none() && (event.branch.trim().is_empty() || event.branch == "HEAD");
        if needs_branch {
            match self.vcs.discover_branch().await {
                Ok(branch) => {
                    tracing::debug!("Run {}: discovered branch {}", run.id, branch);
                    event.branch = branch;
                }
                Err(e) => {
                    run.advance(RunState::ResolutionFailed);
                    return Err(Error::Resolution(format!(
                        "cannot discover branch for detached checkout: {e}"
                    )));
                }
            }
        }
        if event.commit.is_none() {
            match self.vcs.head_commit().await {
                Ok(commit) => event.commit = Some(commit),
                Err(e) => {
                    // Only the hash fallback needs the commit, and it has a
                    // deterministic substitute.
                    tracing::warn!("Run {}: cannot read HEAD commit: {}", run.id, e);
                }
            }
        }
        Ok(event)
    }

    async fn publish_config(&self, context: &RunContext, run: &mut PipelineRun) -> Result<()> {
        match self.store.publish(&context.to_record()).await {
            Ok(PublishAck::Created) => {
                tracing::info!(
                    "Run {}: published config record for {}",
                    run.id,
                    context.identifier
                );
            }
            Ok(PublishAck::AlreadyExists) => {
                tracing::debug!(
                    "Run {}: config record for {} already published",
                    run.id,
                    context.identifier
                );
            }
            Err(e) => {
                run.advance(RunState::PublishFailed);
                tracing::error!("Run {}: config publish failed: {}", run.id, e);
                return Err(e);
            }
        }
        run.advance(RunState::ConfigPublished);
        Ok(())
    }

    /// Best-effort by design: the infrastructure pipeline is independently
    /// owned, so a trigger failure degrades instead of aborting.
    async fn invoke_provisioning(&self, context: &RunContext) -> StageOutcome {
        if !self.options.trigger_job {
            tracing::debug!("Provisioning trigger disabled for this run");
            return StageOutcome::Completed;
        }

        let identifier = context.identifier.as_str();
        match self.jobs.trigger(&self.options.job_name, identifier).await {
            Ok(run_ref) => {
                tracing::info!(
                    "Triggered provisioning job {} run {} for {}",
                    self.options.job_name,
                    run_ref.run_id,
                    identifier
                );
                if !self.options.blocking_job {
                    return StageOutcome::Completed;
                }
                match self.jobs.wait(&self.options.job_name, &run_ref).await {
                    Ok(JobCompletion::Succeeded) => StageOutcome::Completed,
                    Ok(JobCompletion::Failed(message)) => StageOutcome::Degraded {
                        reason: format!("provisioning job run {} failed: {message}", run_ref.run_id),
                    },
                    Err(e) => StageOutcome::Degraded {
                        reason: format!("provisioning job wait failed: {e}"),
                    },
                }
            }
            Err(e) => StageOutcome::Degraded {
                reason: format!("provisioning job trigger failed: {e}"),
            },
        }
    }

    async fn deploy_artifact(&self, context: &RunContext) -> Result<DeployResult> {
        if !self.deploy.target_exists(&context.target_name).await? {
            return Ok(DeployResult::SkippedNotFound);
        }
        self.deploy
            .update_artifact(&context.target_name, &context.artifact_package_name)
            .await?;
        Ok(DeployResult::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Verified.is_terminal());
        assert!(RunState::VerifySkipped.is_terminal());
        assert!(RunState::ResolutionFailed.is_terminal());
        assert!(RunState::PublishFailed.is_terminal());
        assert!(RunState::DeployFailed.is_terminal());
        assert!(!RunState::Init.is_terminal());
        assert!(!RunState::InfraTimeout.is_terminal());
    }

    #[test]
    fn test_success_states() {
        assert!(RunState::Verified.is_success());
        assert!(RunState::VerifySkipped.is_success());
        assert!(!RunState::DeployFailed.is_success());
        assert!(!RunState::InfraReady.is_success());
    }

    #[test]
    fn test_pipeline_run_records_transitions() {
        let mut run = PipelineRun::new();
        assert_eq!(run.state, RunState::Init);

        run.advance(RunState::IdentifierResolved);
        run.advance(RunState::ConfigPublished);

        assert_eq!(run.state, RunState::ConfigPublished);
        let states: Vec<RunState> = run.history.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                RunState::Init,
                RunState::IdentifierResolved,
                RunState::ConfigPublished
            ]
        );
    }

    #[tokio::test]
    async fn test_context_derivation() {
        let event = BranchEvent::new("", None, Some("212"));
        let lookup = crate::clients::MockLookupClient::new();
        let identifier = identifier::resolve(&event, &lookup).await.unwrap();
        let context = RunContext::derive("orders", identifier, None);

        assert_eq!(context.target_name, "orders-212");
        assert_eq!(context.storage_target_name, "orders-212-store");
        assert_eq!(context.provisioning_name, "orders-212-stack");
        assert_eq!(context.artifact_package_name, "orders-212.zip");

        let record = context.to_record();
        assert_eq!(record.identifier, "212");
        assert_eq!(record.provisioning_name, "orders-212-stack");
    }
}
