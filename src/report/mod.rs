//! Test report: per-case details, filters, trend and export built from the
//! statistics aggregator, plus a self-refreshing view ([`view`]).

pub mod view;

pub use self::view::{AutoRefresh, ReportSnapshot, ReportView};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{DailySummary, ExecutionStatus, HistoricalBuild, TestType};

/// One finished execution as shown in the case table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseDetail {
    pub id: String,
    pub module: String,
    pub method: String,
    pub description: String,
    /// Seconds.
    pub execution_time: f64,
    pub result: ExecutionStatus,
    pub test_type: TestType,
    pub test_name: String,
}

/// Narrow the case table. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    /// Substring of the module path.
    pub module: Option<String>,
    pub result: Option<ExecutionStatus>,
    pub test_type: Option<TestType>,
}

impl CaseFilter {
    pub fn matches(&self, detail: &TestCaseDetail) -> bool {
        if let Some(module) = &self.module {
            if !detail.module.contains(module.as_str()) {
                return false;
            }
        }
        if let Some(result) = self.result {
            if detail.result != result {
                return false;
            }
        }
        if let Some(test_type) = self.test_type {
            if detail.test_type != test_type {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, details: &[TestCaseDetail]) -> Vec<TestCaseDetail> {
        details.iter().filter(|d| self.matches(d)).cloned().collect()
    }
}

/// One point of the pass-rate trend chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub pass_rate: f64,
    pub time: String,
}

/// Downloadable report document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportExport {
    pub statistics: DailySummary,
    pub historical_builds: Vec<HistoricalBuild>,
    pub trend: Vec<TrendPoint>,
    /// Filter choices, taken from the unfiltered case table.
    pub modules: Vec<String>,
    pub test_types: Vec<TestType>,
    pub test_case_details: Vec<TestCaseDetail>,
    pub generate_time: DateTime<Utc>,
}

/// Finished executions of the day, with display defaults filled in.
pub fn test_case_details(summary: &DailySummary) -> Vec<TestCaseDetail> {
    summary
        .executions
        .iter()
        .filter(|e| e.status.is_terminal())
        .map(|e| TestCaseDetail {
            id: e.id.clone(),
            module: e
                .module
                .clone()
                .unwrap_or_else(|| format!("{}/{}", e.test_type, e.test_name)),
            method: e.method.clone().unwrap_or_else(|| e.test_name.clone()),
            description: e
                .description
                .clone()
                .unwrap_or_else(|| format!("{} test", e.test_type)),
            execution_time: e.execution_time as f64 / 1000.0,
            result: e.status,
            test_type: e.test_type,
            test_name: e.test_name.clone(),
        })
        .collect()
}

/// Distinct top-level modules (text before the first `/`), first-seen order.
pub fn modules(details: &[TestCaseDetail]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for detail in details {
        let top = detail.module.split('/').next().unwrap_or_default();
        if !seen.iter().any(|m| m == top) {
            seen.push(top.to_string());
        }
    }
    seen
}

/// Distinct test types, first-seen order.
pub fn test_types(details: &[TestCaseDetail]) -> Vec<TestType> {
    let mut seen = Vec::new();
    for detail in details {
        if !seen.contains(&detail.test_type) {
            seen.push(detail.test_type);
        }
    }
    seen
}

/// History newest first, keyed by the date part of each bucket label.
pub fn trend(history: &[HistoricalBuild]) -> Vec<TrendPoint> {
    history
        .iter()
        .rev()
        .map(|build| TrendPoint {
            date: build
                .execution_time
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_string(),
            pass_rate: build.pass_rate,
            time: build.execution_time.clone(),
        })
        .collect()
}

/// Assemble the export document from a snapshot and a case filter.
pub fn export(snapshot: &ReportSnapshot, filter: &CaseFilter) -> ReportExport {
    let details = test_case_details(&snapshot.statistics);
    ReportExport {
        statistics: snapshot.statistics.clone(),
        historical_builds: snapshot.historical_builds.clone(),
        trend: trend(&snapshot.historical_builds),
        modules: modules(&details),
        test_types: test_types(&details),
        test_case_details: filter.apply(&details),
        generate_time: Utc::now(),
    }
}
