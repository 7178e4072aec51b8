//! Simulated test runs.
//!
//! Nothing is actually executed. Starting a run writes a `running` record;
//! a background task sleeps for the configured delay, draws a random
//! outcome and overwrites the same record with the terminal result. There
//! is no cancellation: once started, the completion always lands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use crate::telemetry::{ExecutionRecord, ExecutionStatus, ExecutionStore, TestType};

/// An HTTP endpoint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTest {
    pub id: String,
    pub name: String,
    pub url: String,
    pub method: String,
}

/// A browser-driven UI scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTest {
    pub id: String,
    pub name: String,
    /// Scenario kind, e.g. "web" or "mobile".
    pub kind: String,
}

/// A JMeter load test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmeterTest {
    pub id: String,
    pub name: String,
    pub threads: u32,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "testType", rename_all = "lowercase")]
pub enum TestSpec {
    Api(ApiTest),
    Ui(UiTest),
    Jmeter(JmeterTest),
}

impl TestSpec {
    pub fn test_type(&self) -> TestType {
        match self {
            TestSpec::Api(_) => TestType::Api,
            TestSpec::Ui(_) => TestType::Ui,
            TestSpec::Jmeter(_) => TestType::Jmeter,
        }
    }

    pub fn test_id(&self) -> &str {
        match self {
            TestSpec::Api(t) => &t.id,
            TestSpec::Ui(t) => &t.id,
            TestSpec::Jmeter(t) => &t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TestSpec::Api(t) => &t.name,
            TestSpec::Ui(t) => &t.name,
            TestSpec::Jmeter(t) => &t.name,
        }
    }

    /// The `running` record written when the run begins.
    pub fn started(&self, start: DateTime<Utc>) -> ExecutionRecord {
        let id = ExecutionRecord::make_id(self.test_type(), self.test_id(), start);
        let mut record = ExecutionRecord::running(id, self.test_type(), self.name(), start);

        match self {
            TestSpec::Api(t) => {
                record.module = Some(t.url.clone());
                record.method = Some(t.method.clone());
                record.description = Some(format!("API test: {}", t.name));
            }
            TestSpec::Ui(t) => {
                record.module = Some(t.kind.clone());
                record.method = Some(t.name.clone());
                record.description = Some(format!("UI test: {} ({})", t.name, t.kind));
            }
            TestSpec::Jmeter(t) => {
                record.module = Some("performance".to_string());
                record.method = Some(t.name.clone());
                record.description = Some(format!(
                    "JMeter load test: {} ({} threads, {}s)",
                    t.name, t.threads, t.duration_secs
                ));
            }
        }
        record
    }

    /// Draw an outcome for `started` and return the terminal record.
    pub fn complete<R: Rng>(
        &self,
        started: &ExecutionRecord,
        rng: &mut R,
        end: DateTime<Utc>,
    ) -> ExecutionRecord {
        let mut record = started.clone();
        record.end_time = Some(end);

        match self {
            TestSpec::Api(_) => {
                let response_time: u64 = rng.gen_range(50..250);
                let success = rng.gen_bool(0.8);
                record.status = pass_or_fail(success);
                record.execution_time = response_time;
                record.response_time = Some(response_time);
                record.status_code = Some(if success { 200 } else { 400 });
                if !success {
                    record.error_message = Some("request failed: invalid parameters".to_string());
                }
            }
            TestSpec::Ui(_) => {
                let pass_rate: u32 = rng.gen_range(80..100);
                let success = pass_rate >= 85;
                record.status = pass_or_fail(success);
                record.execution_time = 3000;
                record.pass_rate = Some(f64::from(pass_rate));
                if !success {
                    record.error_message = Some(format!("pass rate {}% below 85%", pass_rate));
                }
            }
            TestSpec::Jmeter(t) => {
                let tps: u32 = rng.gen_range(500..1000);
                let error_rate: f64 = rng.gen_range(0.0..2.0);
                let success = error_rate < 1.0;
                record.status = pass_or_fail(success);
                record.execution_time = t.duration_secs * 1000;
                record.description = Some(format!(
                    "JMeter load test: {} ({} threads, {}s, TPS: {}, error rate: {:.2}%)",
                    t.name, t.threads, t.duration_secs, tps, error_rate
                ));
                if !success {
                    record.error_message = Some(format!("error rate {:.2}% above 1%", error_rate));
                }
            }
        }
        record
    }
}

fn pass_or_fail(success: bool) -> ExecutionStatus {
    if success {
        ExecutionStatus::Passed
    } else {
        ExecutionStatus::Failed
    }
}

/// How long each kind of simulated run takes.
#[derive(Debug, Clone)]
pub struct SimulationTimings {
    pub api_delay: Duration,
    pub ui_delay: Duration,
    pub jmeter_delay: Duration,
    /// Gap between consecutive starts of a batch.
    pub batch_stagger: Duration,
}

impl Default for SimulationTimings {
    fn default() -> Self {
        Self {
            api_delay: Duration::from_millis(2000),
            ui_delay: Duration::from_millis(3000),
            jmeter_delay: Duration::from_millis(5000),
            batch_stagger: Duration::from_millis(1000),
        }
    }
}

impl SimulationTimings {
    pub fn delay_for(&self, spec: &TestSpec) -> Duration {
        match spec {
            TestSpec::Api(_) => self.api_delay,
            TestSpec::Ui(_) => self.ui_delay,
            TestSpec::Jmeter(_) => self.jmeter_delay,
        }
    }
}

/// A started run: the record id is known immediately, the task resolves to
/// the completed record.
pub struct RunHandle {
    pub record_id: String,
    pub task: JoinHandle<ExecutionRecord>,
}

#[derive(Clone)]
pub struct Simulator {
    store: ExecutionStore,
    timings: SimulationTimings,
}

impl Simulator {
    pub fn new(store: ExecutionStore, timings: SimulationTimings) -> Self {
        Self { store, timings }
    }

    /// Record the run as started and schedule its completion.
    pub fn start(&self, spec: TestSpec) -> RunHandle {
        let started = begin(&self.store, &spec);
        let record_id = started.id.clone();
        let delay = self.timings.delay_for(&spec);
        let store = self.store.clone();

        let task = tokio::spawn(async move { finish(store, spec, started, delay).await });
        RunHandle { record_id, task }
    }

    /// Start every spec, one stagger interval apart, in input order.
    pub fn start_batch(&self, specs: Vec<TestSpec>) -> Vec<JoinHandle<ExecutionRecord>> {
        info!(count = specs.len(), "starting batch run");
        specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let store = self.store.clone();
                let stagger = self.timings.batch_stagger * index as u32;
                let delay = self.timings.delay_for(&spec);
                tokio::spawn(async move {
                    tokio::time::sleep(stagger).await;
                    let started = begin(&store, &spec);
                    finish(store, spec, started, delay).await
                })
            })
            .collect()
    }
}

fn begin(store: &ExecutionStore, spec: &TestSpec) -> ExecutionRecord {
    let started = spec.started(Utc::now());
    info!(id = %started.id, test_type = %started.test_type, name = %started.test_name, "test run started");
    store.upsert(started.clone());
    started
}

async fn finish(
    store: ExecutionStore,
    spec: TestSpec,
    started: ExecutionRecord,
    delay: Duration,
) -> ExecutionRecord {
    tokio::time::sleep(delay).await;
    let mut rng = StdRng::from_entropy();
    let done = spec.complete(&started, &mut rng, Utc::now());
    info!(id = %done.id, status = %done.status, execution_ms = done.execution_time, "test run finished");
    store.upsert(done.clone());
    done
}
