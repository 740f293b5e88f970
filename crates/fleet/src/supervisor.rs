// ABOUTME: The reconciliation loop that keeps running workers in line with the desired set.
// ABOUTME: Owns the registry; ticks, exit events, and shutdown are all handled on one task.

use crate::backoff::CrashBackoff;
use crate::error::LaunchError;
use crate::launcher::{ExitEvent, ExitSender, Launcher};
use crate::registry::{Registry, Snapshot};
use crate::source::ConfigSource;
use fleet_core::{LaunchSpec, ReconcileConfig, WorkerIdentity};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Result of [`Supervisor::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A handle already existed; nothing was spawned.
    AlreadyRunning { pid: Option<u32> },
    Started { pid: Option<u32>, generation: u64 },
}

/// What one reconciliation tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<WorkerIdentity>,
    pub stopped: Vec<WorkerIdentity>,
    pub unchanged: Vec<WorkerIdentity>,
    pub failed: Vec<WorkerIdentity>,
    /// Desired but held back by crash-loop backoff.
    pub deferred: Vec<WorkerIdentity>,
}

impl TickReport {
    /// True when the tick neither started nor stopped anything.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.failed.is_empty()
            && self.deferred.is_empty()
    }
}

pub struct Supervisor {
    source: Box<dyn ConfigSource>,
    launcher: Box<dyn Launcher>,
    registry: Registry,
    backoff: CrashBackoff,
    interval: Duration,
    shutdown_grace: Duration,
    next_generation: u64,
    exit_tx: ExitSender,
    exit_rx: mpsc::UnboundedReceiver<ExitEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Supervisor {
    pub fn new(
        source: Box<dyn ConfigSource>,
        launcher: Box<dyn Launcher>,
        config: &ReconcileConfig,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Self {
            source,
            launcher,
            registry: Registry::new(),
            backoff: CrashBackoff::new(config),
            interval: config.interval(),
            shutdown_grace: Duration::from_secs(1),
            next_generation: 1,
            exit_tx,
            exit_rx,
            snapshot_tx,
        }
    }

    /// How long shutdown waits for stopped workers to report their exit.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Receiver for registry snapshots, updated after every change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backoff(&self) -> &CrashBackoff {
        &self.backoff
    }

    /// Start a worker for `spec` unless one is already registered.
    pub async fn launch(&mut self, spec: &LaunchSpec) -> Result<LaunchOutcome, LaunchError> {
        if let Some(handle) = self.registry.get(spec.identity.as_str()) {
            return Ok(LaunchOutcome::AlreadyRunning { pid: handle.pid() });
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let handle = self
            .launcher
            .spawn(spec, generation, self.exit_tx.clone())
            .await?;
        let pid = handle.pid();
        self.registry.put(handle);
        self.publish();

        Ok(LaunchOutcome::Started { pid, generation })
    }

    /// One reconciliation pass: fetch, start what is missing, stop what is
    /// no longer desired.
    ///
    /// An empty fetch, including one caused by a source failure, stops every
    /// running worker.
    pub async fn tick(&mut self) -> TickReport {
        let desired = self.source.fetch_desired().await;
        let desired_ids: HashSet<WorkerIdentity> =
            desired.iter().map(|spec| spec.identity.clone()).collect();

        if desired.is_empty() && !self.registry.is_empty() {
            tracing::warn!(
                running = self.registry.len(),
                "Desired set is empty, stopping all running workers"
            );
        }

        let mut report = TickReport::default();
        let mut seen = HashSet::new();
        let now = Instant::now();

        for spec in &desired {
            let identity = &spec.identity;
            if !seen.insert(identity.clone()) {
                continue;
            }

            if let Some(wait) = self.backoff.retry_in(identity, now) {
                tracing::debug!(
                    identity = %identity,
                    retry_in_secs = wait.as_secs(),
                    "Worker is backing off after crashes"
                );
                report.deferred.push(identity.clone());
                continue;
            }

            match self.launch(spec).await {
                Ok(LaunchOutcome::Started { .. }) => report.started.push(identity.clone()),
                Ok(LaunchOutcome::AlreadyRunning { .. }) => report.unchanged.push(identity.clone()),
                Err(e) => {
                    tracing::error!(identity = %identity, error = %e, "Failed to launch worker");
                    report.failed.push(identity.clone());
                }
            }
        }

        for identity in self.registry.keys() {
            if desired_ids.contains(&identity) {
                continue;
            }
            if let Some(mut handle) = self.registry.remove(identity.as_str()) {
                handle.stop();
                tracing::info!(
                    identity = %identity,
                    pid = ?handle.pid(),
                    "Stopped worker no longer desired"
                );
                report.stopped.push(identity);
            }
        }

        self.backoff.retain_desired(&desired_ids);
        self.publish();

        if report.is_noop() {
            tracing::debug!(running = self.registry.len(), "Workers already reconciled");
        } else {
            tracing::info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                unchanged = report.unchanged.len(),
                failed = report.failed.len(),
                deferred = report.deferred.len(),
                "Reconciled workers"
            );
        }

        report
    }

    /// Apply an exit notification. Returns true if it removed a registry
    /// entry; exits of already-stopped or replaced workers are ignored.
    pub fn handle_exit(&mut self, event: ExitEvent) -> bool {
        let Some(handle) = self
            .registry
            .remove_generation(event.identity.as_str(), event.generation)
        else {
            tracing::debug!(
                identity = %event.identity,
                generation = event.generation,
                requested = event.requested,
                code = ?event.code,
                "Ignoring exit of untracked worker"
            );
            return false;
        };

        tracing::warn!(
            identity = %event.identity,
            pid = ?handle.pid(),
            code = ?event.code,
            signal = ?event.signal,
            uptime_secs = handle.uptime().as_secs(),
            "Worker exited, relaunching on next tick if still desired"
        );

        if let Some(delay) = self
            .backoff
            .record_exit(&event.identity, handle.uptime(), Instant::now())
        {
            tracing::warn!(
                identity = %event.identity,
                crashes = self.backoff.crashes(&event.identity),
                delay_secs = delay.as_secs(),
                "Worker is crash looping, delaying relaunch"
            );
        }

        self.publish();
        true
    }

    /// Apply every exit event that is already queued. Returns how many
    /// removed a registry entry.
    pub fn drain_exits(&mut self) -> usize {
        let mut removed = 0;
        while let Ok(event) = self.exit_rx.try_recv() {
            if self.handle_exit(event) {
                removed += 1;
            }
        }
        removed
    }

    /// Run until `shutdown` resolves: tick on the interval (the first tick
    /// fires immediately) and apply exits as they arrive.
    ///
    /// Ticks run inline on this task, so a slow fetch delays the loop rather
    /// than overlapping with the next tick; missed ticks are skipped.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.interval.as_secs(), "Supervisor started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(event) = self.exit_rx.recv() => {
                    self.handle_exit(event);
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop every worker and wait up to the shutdown grace for their exits.
    pub async fn shutdown(&mut self) {
        let handles = self.registry.drain();
        self.publish();
        if handles.is_empty() {
            tracing::info!("Supervisor stopped, no workers running");
            return;
        }

        tracing::info!(count = handles.len(), "Stopping all workers");
        let mut pending: HashSet<(WorkerIdentity, u64)> = HashSet::new();
        for mut handle in handles {
            handle.stop();
            pending.insert((handle.identity().clone(), handle.generation()));
        }

        let exit_rx = &mut self.exit_rx;
        let wait_all = async {
            while !pending.is_empty() {
                match exit_rx.recv().await {
                    Some(event) => {
                        pending.remove(&(event.identity, event.generation));
                    }
                    None => break,
                }
            }
        };
        let _ = tokio::time::timeout(self.shutdown_grace, wait_all).await;

        if pending.is_empty() {
            tracing::info!("All workers stopped");
        } else {
            tracing::warn!(
                remaining = pending.len(),
                "Some workers did not confirm exit before shutdown"
            );
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.registry.snapshot());
    }
}
