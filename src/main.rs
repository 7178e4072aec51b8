use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use testops::config::{self, Config};
use testops::report::{self, ReportSnapshot, ReportView};
use testops::runner::{ApiTest, JmeterTest, Simulator, TestSpec, UiTest};
use testops::telemetry::{ExecutionStore, StatisticsAggregator};

#[derive(Parser)]
#[command(
    name = "testops",
    about = "Test execution telemetry, reporting and test-plan service",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $TESTOPS_CONFIG, then ./testops.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service (HTTP API + report refresh + storage watcher)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print today's statistics and the 7-day history
    Report {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Simulate a test run and wait for its result
    Run {
        #[command(subcommand)]
        test: RunTest,
    },

    /// Inspect or edit stored executions
    Executions {
        #[command(subcommand)]
        action: ExecutionsAction,
    },

    /// Print a report line every time the statistics are refreshed
    Watch,
}

#[derive(Subcommand)]
enum RunTest {
    /// An HTTP endpoint check
    Api {
        #[arg(long, default_value = "cli")]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// A UI scenario
    Ui {
        #[arg(long, default_value = "cli")]
        id: String,
        #[arg(long)]
        name: String,
        /// Scenario kind, e.g. web or mobile
        #[arg(long, default_value = "web")]
        kind: String,
    },

    /// A JMeter load test
    Jmeter {
        #[arg(long, default_value = "cli")]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "10")]
        threads: u32,
        /// Test duration in seconds
        #[arg(long, default_value = "60")]
        duration: u64,
    },
}

#[derive(Subcommand)]
enum ExecutionsAction {
    /// List all stored executions
    List {
        #[arg(long)]
        json: bool,
    },

    /// Delete one execution by id
    Delete { id: String },

    /// Delete every stored execution
    Clear,
}

impl RunTest {
    fn into_spec(self) -> TestSpec {
        match self {
            RunTest::Api {
                id,
                name,
                url,
                method,
            } => TestSpec::Api(ApiTest {
                id,
                name,
                url,
                method,
            }),
            RunTest::Ui { id, name, kind } => TestSpec::Ui(UiTest { id, name, kind }),
            RunTest::Jmeter {
                id,
                name,
                threads,
                duration,
            } => TestSpec::Jmeter(JmeterTest {
                id,
                name,
                threads,
                duration_secs: duration,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let resolved = Config::resolve(cli.config.as_deref())?;
    config::init_logging(&resolved.config.logging);
    resolved.log();
    let mut cfg = resolved.config;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(bind = %cfg.server.bind, "Starting TestOps service");
            testops::serve(cfg).await?;
        }
        Commands::Report { json } => {
            let (area, _) = testops::open_storage(&cfg.storage)?;
            let aggregator = StatisticsAggregator::new(ExecutionStore::new(area.context()));
            let daily = aggregator.daily_statistics();
            let history = aggregator.historical_builds();

            if json {
                let out = serde_json::json!({
                    "statistics": daily,
                    "historicalBuilds": history,
                    "trend": report::trend(&history),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("\nTestOps Daily Report");
                println!(
                    "Total: {}  Passed: {}  Failed: {}  Error: {}  Skipped: {}  Running: {}",
                    daily.total, daily.passed, daily.failed, daily.error, daily.skipped, daily.running
                );
                println!(
                    "Pass rate: {:.2}%  Total duration: {:.2}s",
                    daily.pass_rate, daily.total_duration
                );

                let details = report::test_case_details(&daily);
                if !details.is_empty() {
                    let types: Vec<String> =
                        report::test_types(&details).iter().map(|t| t.to_string()).collect();
                    println!("Modules: {}", report::modules(&details).join(", "));
                    println!("Types:   {}", types.join(", "));
                    println!("\n{:<30} | {:<8} | {:<7} | Time (s)", "Module", "Type", "Result");
                    println!("{:-<30}-|-{:-<8}-|-{:-<7}-|-{:-<8}", "", "", "", "");
                    for d in &details {
                        println!(
                            "{:<30} | {:<8} | {:<7} | {:.2}",
                            d.module, d.test_type, d.result, d.execution_time
                        );
                    }
                }

                println!("\n=== Pass-rate trend (newest first) ===");
                for (point, build) in report::trend(&history).iter().zip(history.iter().rev()) {
                    println!(
                        "{} : {:>4} cases, {:>4} passed, {:>6.2}%",
                        point.date, build.total_cases, build.successful_cases, point.pass_rate
                    );
                }
                println!();
            }
        }
        Commands::Run { test } => {
            let (area, _) = testops::open_storage(&cfg.storage)?;
            let simulator = Simulator::new(
                ExecutionStore::new(area.context()),
                cfg.simulation.timings(),
            );
            let handle = simulator.start(test.into_spec());
            println!("Started {}", handle.record_id);
            let record = handle.task.await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Executions { action } => {
            let (area, _) = testops::open_storage(&cfg.storage)?;
            let store = ExecutionStore::new(area.context());

            match action {
                ExecutionsAction::List { json } => {
                    let records = store.try_load()?.map(|e| e.executions).unwrap_or_default();
                    if json {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    } else if records.is_empty() {
                        println!("No executions stored.");
                    } else {
                        println!("{:<40} | {:<6} | {:<8} | Started", "Id", "Type", "Status");
                        println!("{:-<40}-|-{:-<6}-|-{:-<8}-|-{:-<25}", "", "", "", "");
                        for r in records {
                            println!(
                                "{:<40} | {:<6} | {:<8} | {}",
                                r.id,
                                r.test_type,
                                r.status,
                                r.start_time.to_rfc3339()
                            );
                        }
                    }
                }
                ExecutionsAction::Delete { id } => {
                    if store.try_delete_by_id(&id)? {
                        println!("Execution '{}' deleted.", id);
                    } else {
                        bail!("no execution with id '{}'", id);
                    }
                }
                ExecutionsAction::Clear => {
                    store.clear();
                    println!("All executions cleared.");
                }
            }
        }
        Commands::Watch => {
            let (area, backend) = testops::open_storage(&cfg.storage)?;
            let watcher = testops::storage::watch::spawn_external_watcher(
                backend,
                area.clone(),
                cfg.storage.watch_interval(),
            );
            let view = Arc::new(ReportView::new(ExecutionStore::new(area.context())));
            let mut snapshots = view.subscribe_snapshots();
            let _auto_refresh = view.start(cfg.report.refresh_interval());

            print_snapshot(&view.snapshot(), view.refresh_count());
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        print_snapshot(&snapshot, view.refresh_count());
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            watcher.abort();
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &ReportSnapshot, refresh: u64) {
    let s = &snapshot.statistics;
    println!(
        "[{} #{}] total={} passed={} failed={} error={} running={} pass_rate={:.2}%",
        snapshot.last_update_time.format("%H:%M:%S"),
        refresh,
        s.total,
        s.passed,
        s.failed,
        s.error,
        s.running,
        s.pass_rate
    );
}
