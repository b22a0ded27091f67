//! Configuration management
//!
//! Settings load from `drydock.toml` (or `.drydock/config.toml`), with
//! `DRYDOCK_*` environment overrides for the operational knobs and serde
//! defaults for everything else. Resource names for a deployment all derive
//! from `app_name` plus the resolved identifier, so the two pipelines agree
//! on them by construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::identifier::DeploymentIdentifier;
use crate::poll::PollPolicy;
use crate::run::RunContext;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Prefix for every per-identifier resource name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Repository slug (`owner/name`) used by the proposal lookup
    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub lookup: LookupSettings,

    #[serde(default)]
    pub job: JobSettings,

    #[serde(default)]
    pub infra: InfraSettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub poll: PollSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSettings {
    #[serde(default = "default_lookup_url")]
    pub base_url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Name of the downstream provisioning job
    #[serde(default = "default_job_name")]
    pub name: String,

    pub base_url: Option<Url>,

    /// Wait for the triggered job run to complete before polling
    #[serde(default)]
    pub blocking: bool,

    #[serde(default = "default_wait_interval", with = "humantime_serde")]
    pub wait_interval: Duration,

    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraSettings {
    pub base_url: Option<Url>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploySettings {
    pub base_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff: f64,

    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    #[serde(default, with = "humantime_serde::option")]
    pub deadline: Option<Duration>,
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_lookup_url() -> Url {
    Url::parse("https://api.github.com/").expect("default lookup URL is valid")
}

fn default_job_name() -> String {
    "provision-infra".to_string()
}

fn default_wait_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_wait_attempts() -> u32 {
    30
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".drydock/store")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_poll_attempts() -> u32 {
    20
}

fn default_backoff() -> f64 {
    1.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(120)
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_toml_str("").expect("empty settings parse")
    }
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            base_url: default_lookup_url(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            base_url: None,
            blocking: false,
            wait_interval: default_wait_interval(),
            wait_attempts: default_wait_attempts(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: default_poll_attempts(),
            backoff: default_backoff(),
            max_interval: default_max_interval(),
            deadline: None,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, the conventional locations, or
    /// defaults, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::discover()?,
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn discover() -> Result<Self> {
        for candidate in ["drydock.toml", ".drydock/config.toml"] {
            let path = Path::new(candidate);
            if path.exists() {
                tracing::debug!("Loading settings from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                return Self::from_toml_str(&content);
            }
        }
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("DRYDOCK_APP_NAME") {
            self.app_name = value;
        }
        if let Ok(value) = std::env::var("DRYDOCK_REPOSITORY") {
            self.repository = value;
        }
        if let Ok(value) = std::env::var("DRYDOCK_STORE_ROOT") {
            self.store.root = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("DRYDOCK_LOOKUP_URL") {
            self.lookup.base_url = Url::parse(&value).map_err(|e| {
                Error::Config(format!("DRYDOCK_LOOKUP_URL is not a valid URL: {e}"))
            })?;
        }
        for (var, slot) in [
            ("DRYDOCK_JOB_URL", &mut self.job.base_url),
            ("DRYDOCK_INFRA_URL", &mut self.infra.base_url),
            ("DRYDOCK_DEPLOY_URL", &mut self.deploy.base_url),
        ] {
            if let Ok(value) = std::env::var(var) {
                *slot = Some(
                    Url::parse(&value)
                        .map_err(|e| Error::Config(format!("{var} is not a valid URL: {e}")))?,
                );
            }
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll.interval,
            max_attempts: self.poll.max_attempts,
            backoff: self.poll.backoff,
            max_interval: self.poll.max_interval,
            deadline: self.poll.deadline,
        }
    }

    /// Derive the immutable per-run context from the resolved identifier
    pub fn context_for(
        &self,
        identifier: DeploymentIdentifier,
        artifact_override: Option<&str>,
    ) -> RunContext {
        RunContext::derive(&self.app_name, identifier, artifact_override)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "app");
        assert_eq!(settings.job.name, "provision-infra");
        assert!(!settings.job.blocking);
        assert_eq!(settings.poll.max_attempts, 20);
        assert_eq!(settings.poll.interval, Duration::from_secs(15));
        assert_eq!(settings.poll.backoff, 1.0);
        assert_eq!(settings.store.root, PathBuf::from(".drydock/store"));
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml_str(
            r#"
            app_name = "orders"
            repository = "acme/orders"

            [lookup]
            base_url = "https://git.internal.example/api/"

            [job]
            name = "orders-infra"
            base_url = "https://ci.internal.example/"
            blocking = true
            wait_interval = "5s"

            [infra]
            base_url = "https://infra.internal.example/"

            [deploy]
            base_url = "https://deploy.internal.example/"

            [store]
            root = "/mnt/shared/drydock"

            [poll]
            interval = "30s"
            max_attempts = 10
            backoff = 1.5
            max_interval = "2m"
            deadline = "10m"
            "#,
        )
        .unwrap();

        assert_eq!(settings.app_name, "orders");
        assert_eq!(settings.repository, "acme/orders");
        assert!(settings.job.blocking);
        assert_eq!(settings.job.wait_interval, Duration::from_secs(5));
        assert_eq!(settings.poll.interval, Duration::from_secs(30));
        assert_eq!(settings.poll.max_interval, Duration::from_secs(120));
        assert_eq!(settings.poll.deadline, Some(Duration::from_secs(600)));

        let policy = settings.poll_policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff, 1.5);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = Settings::from_toml_str("app_name = [not toml");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_context_naming() {
        use crate::clients::MockLookupClient;
        use crate::identifier::{resolve, BranchEvent};

        let lookup = MockLookupClient::new();
        let id = resolve(&BranchEvent::new("", None, Some("212")), &lookup)
            .await
            .unwrap();

        let mut settings = Settings::default();
        settings.app_name = "orders".to_string();

        let context = settings.context_for(id, None);
        assert_eq!(context.target_name, "orders-212");
        assert_eq!(context.storage_target_name, "orders-212-store");
        assert_eq!(context.provisioning_name, "orders-212-stack");
        assert_eq!(context.artifact_package_name, "orders-212.zip");

        let lookup = MockLookupClient::new();
        let id = resolve(&BranchEvent::new("", None, Some("212")), &lookup)
            .await
            .unwrap();
        let context = settings.context_for(id, Some("custom.zip"));
        assert_eq!(context.artifact_package_name, "custom.zip");
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("DRYDOCK_APP_NAME", "env-app");
        std::env::set_var("DRYDOCK_INFRA_URL", "https://infra.env.example/");

        let mut settings = Settings::default();
        settings.apply_env_overrides().unwrap();

        assert_eq!(settings.app_name, "env-app");
        assert_eq!(
            settings.infra.base_url.as_ref().map(Url::as_str),
            Some("https://infra.env.example/")
        );

        std::env::remove_var("DRYDOCK_APP_NAME");
        std::env::remove_var("DRYDOCK_INFRA_URL");
    }
}
