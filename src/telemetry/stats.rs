//! Day-scoped statistics and the rolling 7-day history.
//!
//! Nothing here is persisted: every call re-reads the store. Days are
//! bucketed by local wall-clock midnight in the time zone of the `now`
//! passed in, so a DST day spans 23 or 25 hours.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{round2, ExecutionRecord, ExecutionStatus, ExecutionStore};

/// Number of day buckets in the history view, today included.
pub const HISTORY_DAYS: i64 = 7;

/// Today's counts, rates and records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
    pub running: usize,
    /// Percent, two decimals.
    pub pass_rate: f64,
    /// Seconds.
    pub total_duration: f64,
    /// Earliest start among today's records, or the evaluation time.
    pub start_time: DateTime<Utc>,
    /// Today's records by ascending start time.
    pub executions: Vec<ExecutionRecord>,
}

/// One day bucket of the history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalBuild {
    /// Display label `YYYY-MM-DD 12:00:00`; not an event time.
    pub execution_time: String,
    pub total_cases: usize,
    pub successful_cases: usize,
    pub pass_rate: f64,
}

/// Read-only views over an [`ExecutionStore`].
#[derive(Clone)]
pub struct StatisticsAggregator {
    store: ExecutionStore,
}

impl StatisticsAggregator {
    pub fn new(store: ExecutionStore) -> Self {
        Self { store }
    }

    pub fn daily_statistics(&self) -> DailySummary {
        self.daily_statistics_at(&Local::now())
    }

    pub fn daily_statistics_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DailySummary {
        daily_summary(&self.store.get_all(), now)
    }

    pub fn historical_builds(&self) -> Vec<HistoricalBuild> {
        self.historical_builds_at(&Local::now())
    }

    pub fn historical_builds_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<HistoricalBuild> {
        historical_builds(&self.store.get_all(), now)
    }
}

/// Summarize the records whose start falls on `now`'s local calendar day.
pub fn daily_summary<Tz: TimeZone>(records: &[ExecutionRecord], now: &DateTime<Tz>) -> DailySummary {
    let (start, end) = day_bounds(&now.timezone(), now.date_naive());

    let mut executions: Vec<ExecutionRecord> = records
        .iter()
        .filter(|r| r.start_time >= start && r.start_time < end)
        .cloned()
        .collect();
    executions.sort_by_key(|r| r.start_time);

    let count = |status: ExecutionStatus| executions.iter().filter(|r| r.status == status).count();
    let total = executions.len();
    let passed = count(ExecutionStatus::Passed);
    let failed = count(ExecutionStatus::Failed);
    let error = count(ExecutionStatus::Error);
    let skipped = count(ExecutionStatus::Skipped);
    let running = count(ExecutionStatus::Running);

    let total_ms: i64 = executions.iter().map(ExecutionRecord::duration_ms).sum();

    DailySummary {
        total,
        passed,
        failed,
        error,
        skipped,
        running,
        pass_rate: rate(passed, total),
        total_duration: total_ms as f64 / 1000.0,
        start_time: executions
            .first()
            .map(|r| r.start_time)
            .unwrap_or_else(|| now.with_timezone(&Utc)),
        executions,
    }
}

/// Seven day buckets ending with `now`'s local day, oldest first.
pub fn historical_builds<Tz: TimeZone>(
    records: &[ExecutionRecord],
    now: &DateTime<Tz>,
) -> Vec<HistoricalBuild> {
    let tz = now.timezone();
    let today = now.date_naive();

    (0..HISTORY_DAYS)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            let (start, end) = day_bounds(&tz, date);

            let (total, successful) = records
                .iter()
                .filter(|r| r.start_time >= start && r.start_time < end)
                .fold((0usize, 0usize), |(total, ok), r| {
                    (total + 1, ok + usize::from(r.status == ExecutionStatus::Passed))
                });

            HistoricalBuild {
                execution_time: format!("{} 12:00:00", date.format("%Y-%m-%d")),
                total_cases: total,
                successful_cases: successful,
                pass_rate: rate(successful, total),
            }
        })
        .collect()
}

/// `[midnight of date, midnight of the next date)` in `tz`, as UTC instants.
pub fn day_bounds<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(date);
    (local_midnight(tz, date), local_midnight(tz, next))
}

/// First instant of `date` in `tz`. When midnight falls in a DST gap the
/// first valid local time after it is used.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let mut probe = midnight;
    // Offset gaps are at most a couple of hours
    for _ in 0..8 {
        if let Some(t) = tz.from_local_datetime(&probe).earliest() {
            return t.with_timezone(&Utc);
        }
        probe += Duration::minutes(30);
    }
    tz.from_utc_datetime(&midnight).with_timezone(&Utc)
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 / total as f64 * 100.0)
    }
}
