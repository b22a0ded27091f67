//! Command-line interface
//!
//! Thin assembly layer: parse flags, load settings, wire the real clients
//! into the orchestrator, print the outcome. All behavior lives in the
//! domain modules.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::clients::{
    HttpDeployClient, HttpInfraStatusClient, HttpJobClient, HttpLookupClient, LookupClient,
    NoopLookupClient,
};
use crate::config::Settings;
use crate::identifier::{self, BranchEvent};
use crate::run::{Orchestrator, RunOptions, RunReport};
use crate::store::{ConfigStore, FsConfigStore};
use crate::subprocess::SubprocessManager;
use crate::vcs::{GitVcsClient, VcsClient};

/// Deploy arbitrarily-named branches to identifier-scoped infrastructure
#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Branch-to-deployment identifier resolution and orchestration", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the identifier and drive a full deployment run
    Run {
        /// Branch name; discovered from the checkout when omitted
        #[arg(long)]
        branch: Option<String>,

        /// Commit hash; discovered from the checkout when omitted
        #[arg(long)]
        commit: Option<String>,

        /// Platform-supplied change/PR id from the triggering webhook
        #[arg(long)]
        change_id: Option<String>,

        /// Artifact package name, overriding the derived default
        #[arg(long)]
        artifact: Option<String>,

        /// Path to the settings file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Resolve and print the plan without any side effects
        #[arg(long)]
        dry_run: bool,

        /// Skip triggering the provisioning job (redeploy against existing infra)
        #[arg(long)]
        no_trigger: bool,
    },
    /// Resolve and print the deployment identifier for a branch
    Resolve {
        /// Branch name; discovered from the checkout when omitted
        #[arg(long)]
        branch: Option<String>,

        /// Commit hash; discovered from the checkout when omitted
        #[arg(long)]
        commit: Option<String>,

        /// Platform-supplied change/PR id
        #[arg(long)]
        change_id: Option<String>,

        /// Skip the proposal lookup (no network)
        #[arg(long)]
        offline: bool,

        /// Path to the settings file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Show the published record and infrastructure status for an identifier
    Status {
        /// The deployment identifier
        #[arg(long)]
        identifier: String,

        /// Path to the settings file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

fn vcs_client() -> Arc<dyn VcsClient> {
    let subprocess = SubprocessManager::production();
    Arc::new(GitVcsClient::new(subprocess.runner()))
}

/// Fill branch/commit from the checkout when flags leave them out
async fn materialize_event(
    branch: Option<String>,
    commit: Option<String>,
    change_id: Option<String>,
    vcs: &dyn VcsClient,
) -> Result<BranchEvent> {
    let branch = match branch {
        Some(branch) if branch != "HEAD" => branch,
        _ => {
            if change_id.is_some() {
                String::new()
            } else {
                vcs.discover_branch().await?
            }
        }
    };
    let commit = match commit {
        Some(commit) => Some(commit),
        None => vcs.head_commit().await.ok(),
    };
    Ok(BranchEvent::new(
        &branch,
        commit.as_deref(),
        change_id.as_deref(),
    ))
}

fn require_url(url: &Option<Url>, what: &str) -> Result<Url> {
    url.clone()
        .with_context(|| format!("{what} is required; set it in drydock.toml"))
}

pub async fn run_deployment(
    branch: Option<String>,
    commit: Option<String>,
    change_id: Option<String>,
    artifact: Option<String>,
    config: Option<PathBuf>,
    dry_run: bool,
    no_trigger: bool,
) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
    let vcs = vcs_client();
    let lookup: Arc<dyn LookupClient> = Arc::new(HttpLookupClient::new(
        settings.lookup.base_url.clone(),
        &settings.repository,
    ));

    if dry_run {
        let event = materialize_event(branch, commit, change_id, vcs.as_ref()).await?;
        let identifier = identifier::resolve(&event, lookup.as_ref()).await?;
        let context = settings.context_for(identifier, artifact.as_deref());
        println!("Deployment plan for identifier {}:", context.identifier);
        println!("  derivation:    {}", context.identifier.method());
        println!("  target:        {}", context.target_name);
        println!("  storage:       {}", context.storage_target_name);
        println!("  provisioning:  {}", context.provisioning_name);
        println!("  artifact:      {}", context.artifact_package_name);
        println!("  job:           {} (not triggered)", settings.job.name);
        return Ok(());
    }

    let store = Arc::new(FsConfigStore::new(settings.store.root.clone()));
    let jobs = Arc::new(HttpJobClient::new(
        require_url(&settings.job.base_url, "job.base_url")?,
        settings.job.wait_interval,
        settings.job.wait_attempts,
    ));
    let infra = Arc::new(HttpInfraStatusClient::new(require_url(
        &settings.infra.base_url,
        "infra.base_url",
    )?));
    let deploy = Arc::new(HttpDeployClient::new(require_url(
        &settings.deploy.base_url,
        "deploy.base_url",
    )?));

    let options = RunOptions {
        app_name: settings.app_name.clone(),
        job_name: settings.job.name.clone(),
        blocking_job: settings.job.blocking,
        trigger_job: !no_trigger,
        artifact_override: artifact,
        poll: settings.poll_policy(),
    };

    let orchestrator = Orchestrator::new(vcs, lookup, store, jobs, infra, deploy, options);
    let event = BranchEvent::new(
        branch.as_deref().unwrap_or_default(),
        commit.as_deref(),
        change_id.as_deref(),
    );

    let report = orchestrator.run(event).await?;
    print_report(&report);
    Ok(())
}

pub async fn resolve_identifier(
    branch: Option<String>,
    commit: Option<String>,
    change_id: Option<String>,
    offline: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let settings = Settings::load(config.as_deref())?;
    let vcs = vcs_client();
    let event = materialize_event(branch, commit, change_id, vcs.as_ref()).await?;

    let lookup: Arc<dyn LookupClient> = if offline {
        Arc::new(NoopLookupClient)
    } else {
        Arc::new(HttpLookupClient::new(
            settings.lookup.base_url.clone(),
            &settings.repository,
        ))
    };

    let identifier = identifier::resolve(&event, lookup.as_ref()).await?;
    println!("{} ({})", identifier, identifier.method());
    Ok(())
}

pub async fn show_status(identifier: String, config: Option<PathBuf>) -> Result<()> {
    let settings = Settings::load(config.as_deref())?;
    let store = FsConfigStore::new(settings.store.root.clone());

    match store.read(&identifier).await? {
        Some(record) => {
            println!("Record for {identifier}:");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => println!("No config record published for {identifier}"),
    }

    if let Some(base_url) = &settings.infra.base_url {
        use crate::clients::InfraStatusClient;
        let infra = HttpInfraStatusClient::new(base_url.clone());
        let provisioning_name = format!("{}-{}-stack", settings.app_name, identifier);
        let status = infra.status(&provisioning_name).await?;
        println!("Infrastructure {provisioning_name}: {status:?}");
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Run {} finished: {:?} (identifier {}, via {})",
        report.run_id,
        report.final_state,
        report.identifier,
        report.identifier.method()
    );
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}
