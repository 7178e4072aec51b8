use std::sync::Arc;

use crate::plans::TestPlanService;
use crate::report::ReportView;
use crate::runner::Simulator;
use crate::telemetry::ExecutionStore;

#[derive(Clone)]
pub struct AppState {
    pub plans: Arc<TestPlanService>,
    /// Writer context used by the execution endpoints.
    pub executions: ExecutionStore,
    pub simulator: Simulator,
    /// Report over its own context, so API and simulator writes are pushed to it.
    pub report: Arc<ReportView>,
}
