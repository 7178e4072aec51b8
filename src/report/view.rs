//! Self-refreshing report state.
//!
//! Two independent triggers feed one reducer: a poll timer and the store's
//! change notifier. Both call [`ReportView::refresh`], which re-reads the
//! store from scratch, so the order in which they fire never matters. The
//! timer also covers writes made through the view's own context, which the
//! notifier does not report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::Subscription;
use crate::telemetry::{DailySummary, ExecutionStore, HistoricalBuild, StatisticsAggregator};

/// Everything the report shows, computed in one pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub statistics: DailySummary,
    pub historical_builds: Vec<HistoricalBuild>,
    pub last_update_time: DateTime<Utc>,
}

pub struct ReportView {
    store: ExecutionStore,
    aggregator: StatisticsAggregator,
    tx: watch::Sender<Arc<ReportSnapshot>>,
    refreshes: AtomicU64,
}

impl ReportView {
    /// Build the view and compute its first snapshot.
    pub fn new(store: ExecutionStore) -> Self {
        let aggregator = StatisticsAggregator::new(store.clone());
        let initial = compute(&aggregator);
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            store,
            aggregator,
            tx,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Recompute from the store and publish the result.
    pub fn refresh(&self) -> Arc<ReportSnapshot> {
        let snapshot = Arc::new(compute(&self.aggregator));
        self.tx.send_replace(Arc::clone(&snapshot));
        let n = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(refresh = n, total = snapshot.statistics.total, "report refreshed");
        snapshot
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ReportSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<ReportSnapshot>> {
        self.tx.subscribe()
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Start the poll loop and the change subscription. Both stop when the
    /// returned guard is dropped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> AutoRefresh {
        info!(?interval, "report auto-refresh started");

        let view = Arc::clone(self);
        let subscription = self.store.subscribe(move || {
            view.refresh();
        });

        let view = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                view.refresh();
            }
        });

        AutoRefresh {
            task,
            _subscription: subscription,
        }
    }
}

fn compute(aggregator: &StatisticsAggregator) -> ReportSnapshot {
    ReportSnapshot {
        statistics: aggregator.daily_statistics(),
        historical_builds: aggregator.historical_builds(),
        last_update_time: Utc::now(),
    }
}

/// Keeps a [`ReportView`] refreshing until dropped.
#[must_use = "dropping AutoRefresh stops refreshing"]
pub struct AutoRefresh {
    task: JoinHandle<()>,
    _subscription: Subscription,
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.task.abort();
        debug!("report auto-refresh stopped");
    }
}
