// ABOUTME: Shared types and configuration for the fleet supervisor.
// ABOUTME: Contains config parsing, worker identity and launch spec types, and env derivation.

pub mod config;
pub mod env;
pub mod spec;

pub use config::{
    Config, FileSourceConfig, HttpSourceConfig, LivenessConfig, ReconcileConfig, SourceConfig,
    WorkerConfig,
};
pub use env::{env_var_name, is_reserved_name, WorkerEnv};
pub use spec::{IdentityError, LaunchSpec, WorkerIdentity};
