use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identifier resolution error: {0}")]
    Resolution(String),

    #[error("Proposal lookup error: {0}")]
    Lookup(String),

    #[error("Config store error: {0}")]
    PublishTransport(String),

    #[error("Job invocation error: {0}")]
    JobInvocation(String),

    #[error("Infrastructure status error: {0}")]
    InfraStatus(String),

    #[error("Deploy error: {0}")]
    Deploy(String),

    #[error("VCS error: {0}")]
    Vcs(String),

    #[error("Process error: {0}")]
    Process(#[from] crate::subprocess::ProcessError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
