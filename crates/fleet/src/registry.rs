// ABOUTME: In-memory registry of running workers, keyed by identity.
// ABOUTME: Owned by the supervisor task; the liveness endpoint only sees published snapshots.

use chrono::{DateTime, Utc};
use fleet_core::{LaunchSpec, WorkerIdentity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Owns one running worker process.
///
/// The process itself lives in the launcher's watcher task. Calling
/// [`WorkerHandle::stop`] asks that task to terminate it; dropping the handle
/// has the same effect.
#[derive(Debug)]
pub struct WorkerHandle {
    spec: LaunchSpec,
    pid: Option<u32>,
    generation: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub fn new(
        spec: LaunchSpec,
        pid: Option<u32>,
        generation: u64,
        stop_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            spec,
            pid,
            generation,
            started: Instant::now(),
            started_at: Utc::now(),
            stop_tx: Some(stop_tx),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.spec.identity
    }

    /// Launch spec this worker was started with.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Request a graceful stop. Returns false if a stop was already requested
    /// or the process is already gone.
    pub fn stop(&mut self) -> bool {
        match self.stop_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            identity: self.spec.identity.to_string(),
            pid: self.pid,
            generation: self.generation,
            started_at: self.started_at,
        }
    }
}

/// Serializable view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub identity: String,
    pub pid: Option<u32>,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time copy of the registry, sorted by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub workers: Vec<WorkerStatus>,
}

impl Snapshot {
    pub fn identities(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.identity.clone()).collect()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    workers: HashMap<WorkerIdentity, WorkerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<&WorkerHandle> {
        self.workers.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.workers.contains_key(identity)
    }

    /// Insert a handle, returning any handle it replaced.
    pub fn put(&mut self, handle: WorkerHandle) -> Option<WorkerHandle> {
        self.workers.insert(handle.identity().clone(), handle)
    }

    /// Remove an entry. Removing an absent identity is a no-op.
    pub fn remove(&mut self, identity: &str) -> Option<WorkerHandle> {
        self.workers.remove(identity)
    }

    /// Remove an entry only if it is still the given generation.
    pub fn remove_generation(&mut self, identity: &str, generation: u64) -> Option<WorkerHandle> {
        match self.workers.get(identity) {
            Some(handle) if handle.generation() == generation => self.workers.remove(identity),
            _ => None,
        }
    }

    pub fn keys(&self) -> BTreeSet<WorkerIdentity> {
        self.workers.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&WorkerIdentity, &WorkerHandle)> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Remove and return every handle.
    pub fn drain(&mut self) -> Vec<WorkerHandle> {
        self.workers.drain().map(|(_, handle)| handle).collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut workers: Vec<WorkerStatus> = self.workers.values().map(WorkerHandle::status).collect();
        workers.sort_by(|a, b| a.identity.cmp(&b.identity));
        Snapshot { workers }
    }
}
