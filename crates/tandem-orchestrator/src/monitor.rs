//! Background resource sampler (spec.md §5 "Monitoring"). Runs on its own
//! task at a fixed tick and shares nothing with the session except an
//! atomically-updated snapshot -- it never touches the state chain, the
//! workspace, or the model clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

const DEFAULT_TICK_MS: u64 = 100;

/// A read-only, atomically-updated view of the process's resource use.
#[derive(Debug, Default)]
pub struct ResourceSnapshot {
    memory_bytes: AtomicU64,
    disk_written_bytes: AtomicU64,
    ticks: AtomicU64,
}

impl ResourceSnapshot {
    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes.load(Ordering::Relaxed)
    }

    pub fn disk_written_bytes(&self) -> u64 {
        self.disk_written_bytes.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, memory_bytes: u64, disk_written_bytes: u64) {
        self.memory_bytes.store(memory_bytes, Ordering::Relaxed);
        self.disk_written_bytes
            .store(disk_written_bytes, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Whether the sampled resource use crosses a configured limit (spec.md §5
/// "Limits"): a soft warning at the limit itself, a hard `limit_exceeded`
/// suspension above a second, larger threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Ok,
    SoftWarning,
    Exceeded,
}

/// Optional hard caps checked against a `ResourceSnapshot` on every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    pub memory_limit_bytes: Option<u64>,
    pub disk_limit_bytes: Option<u64>,
}

impl ResourceLimits {
    /// The second threshold, above which a limit becomes fatal rather than
    /// a soft warning, per spec.md §5: "above a second threshold, a
    /// `limit_exceeded` suspension is raised." Fixed at 150% of the
    /// configured limit.
    const HARD_MULTIPLIER: u64 = 3;
    const HARD_DIVISOR: u64 = 2;

    pub fn check(&self, snapshot: &ResourceSnapshot) -> LimitCheck {
        let mut worst = LimitCheck::Ok;
        for (used, limit) in [
            (snapshot.memory_bytes(), self.memory_limit_bytes),
            (snapshot.disk_written_bytes(), self.disk_limit_bytes),
        ] {
            let Some(limit) = limit else { continue };
            if limit == 0 {
                continue;
            }
            let hard = limit.saturating_mul(Self::HARD_MULTIPLIER) / Self::HARD_DIVISOR;
            if used >= hard {
                return LimitCheck::Exceeded;
            }
            if used >= limit {
                worst = LimitCheck::SoftWarning;
            }
        }
        worst
    }
}

/// Spawns the background sampler task. The returned snapshot is safe to
/// read from any task; the sampler stops as soon as `cancel` fires.
pub fn spawn_sampler(
    tick: Option<Duration>,
    cancel: CancellationToken,
) -> (Arc<ResourceSnapshot>, tokio::task::JoinHandle<()>) {
    let snapshot = Arc::new(ResourceSnapshot::default());
    let tick = tick.unwrap_or(Duration::from_millis(DEFAULT_TICK_MS));
    let snapshot_for_task = snapshot.clone();

    let handle = tokio::spawn(async move {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    system.refresh_process(pid);
                    let memory_bytes = system
                        .process(pid)
                        .map(|p| p.memory())
                        .unwrap_or(0);
                    let disk_written = system
                        .process(pid)
                        .map(|p| p.disk_usage().total_written_bytes)
                        .unwrap_or(0);
                    snapshot_for_task.record(memory_bytes, disk_written);
                }
            }
        }
    });

    (snapshot, handle)
}
