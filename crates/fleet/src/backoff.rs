// ABOUTME: Per-identity crash-loop backoff for worker relaunches.
// ABOUTME: Disabled unless an initial delay is configured; then delays double up to a cap.

use fleet_core::{ReconcileConfig, WorkerIdentity};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct CrashRecord {
    crashes: u32,
    crashed_at: Instant,
    delay: Duration,
}

#[derive(Debug)]
pub struct CrashBackoff {
    initial: Duration,
    max: Duration,
    reset_after: Duration,
    records: HashMap<WorkerIdentity, CrashRecord>,
}

impl CrashBackoff {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.backoff_initial_secs),
            max: Duration::from_secs(config.backoff_max_secs),
            reset_after: Duration::from_secs(config.backoff_reset_secs),
            records: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.initial.is_zero()
    }

    /// Delay before the next launch after `crashes` consecutive crashes.
    pub fn delay_for(&self, crashes: u32) -> Duration {
        if crashes == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(crashes - 1).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Record an unrequested exit. Returns the relaunch delay when the worker
    /// is now backing off.
    pub fn record_exit(
        &mut self,
        identity: &WorkerIdentity,
        uptime: Duration,
        now: Instant,
    ) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        if uptime >= self.reset_after {
            self.records.remove(identity);
            return None;
        }

        let crashes = self.crashes(identity).saturating_add(1);
        let delay = self.delay_for(crashes);
        self.records.insert(
            identity.clone(),
            CrashRecord {
                crashes,
                crashed_at: now,
                delay,
            },
        );
        Some(delay)
    }

    /// Time left before `identity` may be launched again, if it is deferred.
    pub fn retry_in(&self, identity: &WorkerIdentity, now: Instant) -> Option<Duration> {
        let record = self.records.get(identity)?;
        let elapsed = now.saturating_duration_since(record.crashed_at);
        record.delay.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    pub fn crashes(&self, identity: &WorkerIdentity) -> u32 {
        self.records.get(identity).map_or(0, |r| r.crashes)
    }

    /// Forget identities that are no longer desired.
    pub fn retain_desired(&mut self, desired: &HashSet<WorkerIdentity>) {
        self.records.retain(|identity, _| desired.contains(identity));
    }
}
