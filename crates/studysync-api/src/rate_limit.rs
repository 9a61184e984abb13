use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::auth::QueueOwner;
use crate::config::AppConfig;
use crate::error::AppError;

/// Sync endpoints that draw from an owner's request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    SyncRun,
    Enqueue,
}

impl ProtectedEndpoint {
    const ALL: [Self; 2] = [Self::SyncRun, Self::Enqueue];

    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncRun => "sync_run",
            Self::Enqueue => "enqueue",
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub enqueue_allowed: u64,
    pub enqueue_limited: u64,
}

#[derive(Default)]
struct Tally {
    allowed: AtomicU64,
    limited: AtomicU64,
}

/// Budget one owner has spent on one endpoint in the current window
#[derive(Debug, Clone, Copy)]
struct Budget {
    opened_at: Instant,
    spent: u32,
}

impl Budget {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.opened_at) >= window
    }
}

/// Fixed-window budgets per queue owner.
///
/// Enqueues and sync runs are budgeted separately, so a client flushing a
/// large offline backlog cannot starve its own sync trigger.
#[derive(Clone)]
pub struct OwnerRateLimiter {
    budgets: Arc<Mutex<HashMap<(ProtectedEndpoint, String), Budget>>>,
    window: Duration,
    limits: [u32; 2],
    tallies: Arc<[Tally; 2]>,
}

impl OwnerRateLimiter {
    pub fn new(window: Duration, sync_limit: u32, enqueue_limit: u32) -> Self {
        let mut limits = [0; 2];
        limits[ProtectedEndpoint::SyncRun.slot()] = sync_limit;
        limits[ProtectedEndpoint::Enqueue.slot()] = enqueue_limit;

        Self {
            budgets: Arc::new(Mutex::new(HashMap::new())),
            window,
            limits,
            tallies: Arc::new(Default::default()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_rate_limit_per_window,
            config.enqueue_rate_limit_per_window,
        )
    }

    /// Spend one request from the owner's budget for `endpoint`
    pub async fn spend(
        &self,
        endpoint: ProtectedEndpoint,
        owner: &QueueOwner,
    ) -> Result<(), AppError> {
        let now = Instant::now();
        let tally = &self.tallies[endpoint.slot()];
        let mut budgets = self.budgets.lock().await;
        budgets.retain(|_, budget| !budget.expired(now, self.window));

        let budget = budgets
            .entry((endpoint, owner.owner.clone()))
            .or_insert(Budget {
                opened_at: now,
                spent: 0,
            });
        if budget.spent < self.limits[endpoint.slot()] {
            budget.spent += 1;
            tally.allowed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let retry_after_secs = self
            .window
            .saturating_sub(now.duration_since(budget.opened_at))
            .as_secs()
            .max(1);
        tally.limited.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            endpoint = endpoint.label(),
            user = owner.fingerprint(),
            retry_after_secs,
            "Owner exhausted request budget"
        );
        Err(AppError::too_many_requests(
            format!("rate limit exceeded for {}", endpoint.label()),
            retry_after_secs,
        ))
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let [sync, enqueue] = ProtectedEndpoint::ALL.map(|endpoint| {
            let tally = &self.tallies[endpoint.slot()];
            (
                tally.allowed.load(Ordering::Relaxed),
                tally.limited.load(Ordering::Relaxed),
            )
        });

        RateLimitMetricsSnapshot {
            sync_allowed: sync.0,
            sync_limited: sync.1,
            enqueue_allowed: enqueue.0,
            enqueue_limited: enqueue.1,
        }
    }
}
