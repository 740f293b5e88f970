// ABOUTME: fleet library with the supervisor, launcher, config source and liveness modules.
// ABOUTME: Entry points for the run, check, and status subcommands.

pub mod backoff;
pub mod error;
pub mod init;
pub mod launcher;
pub mod liveness;
pub mod registry;
pub mod source;
pub mod supervisor;

pub use error::{FetchError, LaunchError, LivenessError};
pub use fleet_core::Config;
pub use init::run_init;
pub use launcher::{ExitEvent, ExitSender, Launcher, ProcessLauncher};
pub use liveness::{HealthResponse, LivenessServer};
pub use registry::{Registry, Snapshot, WorkerHandle, WorkerStatus};
pub use source::{ConfigSource, FileSource, HttpSource};
pub use supervisor::{LaunchOutcome, Supervisor, TickReport};

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Options for running the supervisor
pub struct SupervisorOptions {
    /// Path to configuration file
    pub config_path: Option<PathBuf>,
    /// Liveness port override
    pub port: Option<u16>,
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    Config::load(&path)
}

/// Run the supervisor until Ctrl-C or SIGTERM.
pub async fn run_supervisor(options: SupervisorOptions) -> Result<()> {
    let mut config = load_config(options.config_path)?;
    if let Some(port) = options.port {
        config.liveness.port = Some(port);
    }

    let source = source::from_config(&config.source).context("Failed to create config source")?;
    tracing::info!(source = %source.describe(), program = %config.worker.program, "Configuration loaded");

    // Leave room for a SIGTERM grace period plus the forced kill
    let shutdown_grace = Duration::from_secs(config.worker.stop_timeout_secs.max(1) + 1);
    let launcher = ProcessLauncher::new(config.worker.clone());
    let mut supervisor = Supervisor::new(source, Box::new(launcher), &config.reconcile)
        .with_shutdown_grace(shutdown_grace);

    let server = LivenessServer::bind(&config.liveness.address(), supervisor.subscribe()).await?;
    tracing::info!(addr = %server.local_addr()?, "Liveness endpoint listening");

    let mut liveness = tokio::spawn(server.serve());
    let mut control = tokio::spawn(async move {
        supervisor.run(shutdown_signal()).await;
    });

    let outcome = tokio::select! {
        result = &mut control => match result {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(fatal = true, error = %e, "Supervisor task failed");
                Err(anyhow!("supervisor task failed: {}", e))
            }
        },
        result = &mut liveness => {
            let err = match result {
                Ok(Ok(())) => anyhow!("liveness endpoint stopped unexpectedly"),
                Ok(Err(e)) => e.into(),
                Err(e) => anyhow!("liveness task failed: {}", e),
            };
            tracing::error!(fatal = true, error = %err, "Liveness endpoint failed");
            control.abort();
            Err(err)
        }
    };

    liveness.abort();
    if outcome.is_ok() {
        tracing::info!("fleet supervisor stopped");
    }
    outcome
}

/// Fetch the desired set once and print it without launching anything.
pub async fn run_check(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let source = source::from_config(&config.source)?;

    let specs = source
        .try_fetch()
        .await
        .with_context(|| format!("Fetch from {} failed", source.describe()))?;

    println!("{} desired worker(s) from {}", specs.len(), source.describe());
    for spec in &specs {
        let params: Vec<String> = spec
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  {} {}", spec.identity, params.join(" "));
    }
    Ok(())
}

/// Query a running supervisor's liveness endpoint.
pub async fn run_status(addr: &str) -> Result<()> {
    let base = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", addr)
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to create HTTP client")?;
    let resp = client
        .get(format!("{}/health", base))
        .send()
        .await
        .with_context(|| format!("Failed to reach supervisor at {}", base))?;

    if !resp.status().is_success() {
        anyhow::bail!("Supervisor returned {}", resp.status());
    }

    let health: HealthResponse = resp.json().await.context("Failed to parse response")?;
    println!("{} worker(s) running", health.count);
    for identity in &health.workers {
        println!("  {}", identity);
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
