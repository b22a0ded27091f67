//! Typed clients for the external collaborators
//!
//! Every integration boundary of the deployment engine is a trait with a real
//! HTTP implementation and a mock, so the state machine can be unit tested
//! without any live network dependency.

pub mod deploy;
pub mod infra;
pub mod job;
pub mod lookup;

pub use deploy::{DeployClient, DeployResult, HttpDeployClient, MockDeployClient, VerifyResult};
pub use infra::{HttpInfraStatusClient, InfraStatusClient, InfrastructureStatus, MockInfraStatusClient};
pub use job::{HttpJobClient, JobClient, JobCompletion, JobRunRef, MockJobClient};
pub use lookup::{HttpLookupClient, LookupClient, MockLookupClient, NoopLookupClient, Proposal};
