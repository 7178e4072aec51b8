//! Test-execution telemetry: records, the persisted store, statistics and
//! change notification.

pub mod notifier;
pub mod stats;
pub mod store;

pub use self::notifier::ChangeNotifier;
pub use self::stats::{DailySummary, HistoricalBuild, StatisticsAggregator};
pub use self::store::ExecutionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

/// Storage key holding the execution envelope.
pub const EXECUTIONS_KEY: &str = "test_execution_data";

/// Kind of test that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Api,
    Ui,
    Case,
    Jmeter,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Api => "api",
            TestType::Ui => "ui",
            TestType::Case => "case",
            TestType::Jmeter => "jmeter",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(TestType::Api),
            "ui" => Ok(TestType::Ui),
            "case" => Ok(TestType::Case),
            "jmeter" => Ok(TestType::Jmeter),
            other => Err(format!("unknown test type '{}'", other)),
        }
    }
}

/// Outcome of an execution. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "passed" => Ok(ExecutionStatus::Passed),
            "failed" => Ok(ExecutionStatus::Failed),
            "error" => Ok(ExecutionStatus::Error),
            "skipped" => Ok(ExecutionStatus::Skipped),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// One attempt to run a named test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Caller-supplied, conventionally `{testType}_{testId}_{timestamp}`.
    pub id: String,
    pub test_type: TestType,
    pub test_name: String,
    pub status: ExecutionStatus,
    /// Milliseconds; meaningful once terminal.
    #[serde(default, deserialize_with = "millis")]
    pub execution_time: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_rate: Option<f64>,
}

impl ExecutionRecord {
    /// A freshly started run: `running`, no end time, zero duration.
    pub fn running(
        id: impl Into<String>,
        test_type: TestType,
        test_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            test_type,
            test_name: test_name.into(),
            status: ExecutionStatus::Running,
            execution_time: 0,
            start_time,
            end_time: None,
            module: None,
            method: None,
            description: None,
            error_message: None,
            response_time: None,
            status_code: None,
            pass_rate: None,
        }
    }

    /// Conventional record id for a run of `test_id` started at `start_time`.
    pub fn make_id(test_type: TestType, test_id: &str, start_time: DateTime<Utc>) -> String {
        format!("{}_{}_{}", test_type, test_id, start_time.timestamp_millis())
    }

    /// Wall-clock duration when both ends are known, else `execution_time`.
    pub fn duration_ms(&self) -> i64 {
        match self.end_time {
            Some(end) => (end - self.start_time).num_milliseconds(),
            None => self.execution_time as i64,
        }
    }
}

/// Durations may be written by other producers as any JSON number.
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    f64::deserialize(deserializer).map(round_millis)
}

fn optional_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<f64>::deserialize(deserializer).map(|v| v.map(round_millis))
}

fn round_millis(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// The single persisted blob: every record plus a last-update marker.
///
/// Reading is lenient: a missing or unreadable marker is `None`, and a record
/// that does not parse is skipped with a warning instead of hiding the rest.
/// Only a blob that is not an object with an `executions` array is rejected.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub executions: Vec<ExecutionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    executions: Vec<serde_json::Value>,
    #[serde(default)]
    last_update_time: Option<serde_json::Value>,
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEnvelope::deserialize(deserializer)?;
        let executions = raw
            .executions
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(index, error = %e, "skipping unreadable execution record");
                    None
                }
            })
            .collect();
        let last_update_time = raw
            .last_update_time
            .and_then(|v| serde_json::from_value(v).ok());
        Ok(Self {
            executions,
            last_update_time,
        })
    }
}

impl Envelope {
    pub fn empty() -> Self {
        Self {
            executions: Vec::new(),
            last_update_time: None,
        }
    }

    /// Insert-or-replace by id. A replaced record keeps its position.
    pub fn upsert(&mut self, record: ExecutionRecord) {
        match self.executions.iter().position(|e| e.id == record.id) {
            Some(index) => self.executions[index] = record,
            None => self.executions.push(record),
        }
    }

    /// Returns whether a record was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.executions.len();
        self.executions.retain(|e| e.id != id);
        self.executions.len() != before
    }
}

/// Round to two decimal places, the precision every rate is reported at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
