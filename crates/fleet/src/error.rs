// ABOUTME: Error types for the fleet supervisor.
// ABOUTME: Fetch, launch, and liveness failures; none of them stop the control loop.

use fleet_core::WorkerIdentity;
use std::path::PathBuf;
use thiserror::Error;

/// Why the desired worker set could not be fetched.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("source returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed worker record: {0}")]
    Record(String),

    #[error("invalid HTTP method '{0}'")]
    Method(String),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Why a worker process could not be started.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to spawn worker {identity}: {source}")]
    Spawn {
        identity: WorkerIdentity,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("failed to bind liveness endpoint on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("liveness endpoint failed: {0}")]
    Serve(#[from] std::io::Error),
}
