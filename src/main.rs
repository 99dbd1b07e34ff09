use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use fleet_runner::config::{DispatchConfig, RunnerConfig};
use fleet_runner::dispatch::Dispatcher;
use fleet_runner::roster::WorkerRoster;
use fleet_runner::simulate::{SimulatedProvisioner, SimulatedSession, demo_catalog};
use fleet_runner::task::TaskDefinition;

#[tokio::main]
async fn main() -> fleet_runner::error::Result<()> {
    let runner_config = RunnerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export FLEET_SEQUENCE='portal_task_checkin,portal_task_swap*2'");
        std::process::exit(1);
    });
    let dispatch_config = DispatchConfig::from_env()?;

    // Initialize tracing: stderr plus a daily log file.
    let file_appender = tracing_appender::rolling::daily(&runner_config.log_dir, "fleet-runner");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let roster = WorkerRoster::load(&runner_config.roster_path)?;
    let sequence = TaskDefinition::parse_sequence(&runner_config.sequence)?;
    let duplicates = roster.duplicates();
    if !duplicates.is_empty() {
        tracing::error!(?duplicates, "Roster lists workers more than once");
    }

    eprintln!("🚦 Fleet Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Roster: {}", runner_config.roster_path.display());
    eprintln!("   Endpoint: {}", roster.endpoint);
    eprintln!("   Workers: {}", roster.workers.len());
    eprintln!("   Concurrency: {}", dispatch_config.default_concurrency);
    eprintln!("   Logs: {}", runner_config.log_dir.display());

    let catalog = Arc::new(demo_catalog());
    eprintln!("   Tasks: {}", catalog.len());
    for task in catalog.descriptors() {
        eprintln!("     {:<8} {:<22} {} ({:?})", task.project, task.name, task.description, task.limit);
    }
    eprintln!("   Press Ctrl-C to stop after the running tasks.\n");

    for def in &sequence {
        if !catalog.has(&def.name) {
            tracing::warn!(task = %def.name, "Task is not in the catalog; it will be recorded as failed");
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        dispatch_config,
        catalog,
        Arc::new(SimulatedProvisioner::new(roster.endpoint.clone()).with_failure_rate(0.05)),
        Arc::new(SimulatedSession { failure_rate: 0.05 }),
    ));

    let handle = dispatcher
        .dispatch_default(&sequence, &roster.workers)
        .await?;

    // ── Ctrl-C → cooperative stop ─────────────────────────────────────
    {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⏹  Stop requested, waiting for running tasks...");
                if !dispatcher.request_stop().await {
                    eprintln!("   Some tasks are still running after the stop timeout.");
                }
            }
        });
    }

    // ── Progress ──────────────────────────────────────────────────────
    let mut tick = tokio::time::interval(runner_config.poll_interval);
    while !handle.is_finished() {
        tick.tick().await;
        let status = handle.status();
        eprintln!(
            "   progress: {}/{} done ({} skipped)",
            status.completed_count, status.total_count, status.forfeited_count
        );
    }

    let history = handle.history().await;
    let summary = handle.join().await?;
    let status = dispatcher.query_status().await;

    eprintln!("\n── Summary ──");
    for worker in &roster.workers {
        let results = history.get(worker).map(Vec::as_slice).unwrap_or_default();
        let ok = results.iter().filter(|r| r.is_success()).count();
        eprintln!("   {worker}: {ok}/{} succeeded", results.len());
        for failed in results.iter().filter(|r| !r.is_success()) {
            eprintln!("      ✗ {}: {}", failed.task_name, failed.details);
        }
    }
    eprintln!(
        "   launched {} worker(s), {} provisioning failure(s), {} not admitted, {:.1}s",
        summary.launched,
        summary.provision_failures,
        summary.not_admitted,
        summary.elapsed.as_secs_f64()
    );
    eprintln!(
        "   {}/{} results, done = {}",
        status.completed_count, status.total_count, status.done
    );

    Ok(())
}
