use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use labelsync_core::ConfigOptions;
use labelsync_sync::{
    pipeline::{self, SyncScope},
    scheduler::format_age,
    NodeOutcome, NodeSyncResult, PassContext, PassMode, PassStatus, Reconciler, RunOptions,
    SyncTracker, WriteResult,
};

use crate::arm::ArmCompute;
use crate::config_source::{ConfigLocation, ConfigSource};
use crate::error::{io_err, DaemonError};
use crate::kube_client::{KubeEventRecorder, KubeNodes};

/// Node watch events for the same node inside this window trigger one pass.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

/// Daemon settings taken from the command line.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config: ConfigLocation,
    /// Period of the full-cluster pass.
    pub interval: Duration,
    pub pass_timeout: Duration,
    pub concurrency: usize,
    pub log_json: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        let run = RunOptions::default();
        Self {
            config: ConfigLocation::default(),
            interval: Duration::from_secs(60),
            pass_timeout: run.pass_timeout,
            concurrency: run.concurrency,
            log_json: false,
        }
    }
}

impl DaemonOptions {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            mode: PassMode::Apply,
            pass_timeout: self.pass_timeout,
            concurrency: self.concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PassTarget {
    All,
    Node(String),
}

impl PassTarget {
    fn scope(&self) -> SyncScope {
        match self {
            PassTarget::All => SyncScope::All,
            PassTarget::Node(name) => SyncScope::Node(name.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            PassTarget::All => "all".to_string(),
            PassTarget::Node(name) => name.clone(),
        }
    }
}

struct PassJob {
    target: PassTarget,
    source: &'static str,
}

/// Counters for one processed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub target: String,
    pub source: String,
    pub nodes: usize,
    pub synced: usize,
    /// Not due yet, or another pass was in flight.
    pub skipped: usize,
    pub filtered: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub writes: usize,
    pub duration_ms: u128,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(opts: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing(opts.log_json);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(opts))
}

/// Run the daemon against the cluster in the current kube context.
pub async fn run(opts: DaemonOptions) -> Result<(), DaemonError> {
    if opts.interval.is_zero() {
        return Err(DaemonError::Runtime(
            "pass interval must be greater than zero".to_string(),
        ));
    }
    let client = Client::try_default().await?;
    let source = ConfigSource::resolve(&opts.config, Some(&client))?;
    let reconciler = build_reconciler(client.clone())?;
    tracing::info!(
        config = %opts.config,
        interval = ?opts.interval,
        concurrency = opts.concurrency,
        "labelsync daemon starting",
    );
    serve(reconciler, source, &opts, node_events(Api::all(client))).await
}

fn build_reconciler(client: Client) -> Result<Reconciler, DaemonError> {
    let compute = ArmCompute::from_env()?;
    Ok(Reconciler::new(
        Arc::new(KubeNodes::new(client.clone())),
        Arc::new(compute),
        Arc::new(KubeEventRecorder::new(client)),
        Arc::new(SyncTracker::default()),
    ))
}

/// Names of nodes as they are created or modified.
fn node_events(api: Api<Node>) -> impl Stream<Item = Result<String, watcher::Error>> + Send {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .map_ok(|node| node.name_any())
}

async fn serve<S, E>(
    reconciler: Reconciler,
    source: ConfigSource,
    opts: &DaemonOptions,
    events: S,
) -> Result<(), DaemonError>
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (job_tx, job_rx) = mpsc::channel::<PassJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let cancel = CancellationToken::new();

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(events, job_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let interval = opts.interval;
        tokio::spawn(async move {
            let result = ticker_task(interval, job_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let run_opts = opts.run_options();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result =
                processor_task(reconciler, source, run_opts, job_rx, shutdown_rx, cancel).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = shutdown_signal() => signal.map(|name| {
                    tracing::info!(signal = name, "shutting down daemon");
                }),
            };
            // Running passes stop at their next collaborator call.
            cancel.cancel();
            let _ = shutdown.send(());
            result
        })
    };

    let (watcher_result, ticker_result, processor_result, signal_result) = tokio::join!(
        watcher_handle,
        ticker_handle,
        processor_handle,
        signal_handle
    );

    handle_join("node_watcher", watcher_result)?;
    handle_join("ticker", ticker_result)?;
    handle_join("pass_processor", processor_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("labelsync daemon stopped");
    Ok(())
}

async fn watcher_task<S, E>(
    events: S,
    job_tx: mpsc::Sender<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    S: Stream<Item = Result<String, E>>,
    E: Display,
{
    let mut events = std::pin::pin!(events);
    let mut debounce = HashMap::<String, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                let name = match event {
                    Ok(name) => name,
                    Err(err) => {
                        tracing::warn!(error = %err, "node watch error");
                        continue;
                    }
                };
                if !should_process_event(&mut debounce, &name, Instant::now()) {
                    continue;
                }
                tracing::debug!(node = %name, "node changed, queueing pass");
                enqueue(&job_tx, PassTarget::Node(name), "watcher").await?;
            }
        }
    }

    Ok(())
}

async fn ticker_task(
    period: Duration,
    job_tx: mpsc::Sender<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately, giving a full pass at startup.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => enqueue(&job_tx, PassTarget::All, "ticker").await?,
        }
    }
    Ok(())
}

async fn processor_task(
    reconciler: Reconciler,
    source: ConfigSource,
    run_opts: RunOptions,
    mut job_rx: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = process_job(&reconciler, &source, &run_opts, &job, &cancel).await;
                if job.target == PassTarget::All && outcome.is_ok() {
                    log_sync_ages(reconciler.tracker());
                }
                match outcome {
                    Ok(summary) if summary.writes > 0 || summary.failed > 0 || summary.conflicts > 0 => {
                        tracing::info!(
                            target = %summary.target,
                            source = %summary.source,
                            nodes = summary.nodes,
                            synced = summary.synced,
                            writes = summary.writes,
                            conflicts = summary.conflicts,
                            failed = summary.failed,
                            duration_ms = summary.duration_ms,
                            "pass completed",
                        );
                    }
                    Ok(summary) => {
                        tracing::debug!(
                            target = %summary.target,
                            source = %summary.source,
                            nodes = summary.nodes,
                            skipped = summary.skipped,
                            filtered = summary.filtered,
                            "pass completed without changes",
                        );
                    }
                    Err(err) => {
                        tracing::error!(
                            target = %job.target.label(),
                            source = job.source,
                            error = %err,
                            "pass not run, retrying on next trigger",
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn process_job(
    reconciler: &Reconciler,
    source: &ConfigSource,
    run_opts: &RunOptions,
    job: &PassJob,
    cancel: &CancellationToken,
) -> Result<PassSummary, DaemonError> {
    let started = Instant::now();
    let cfg = source.load().await?;
    let outcomes = pipeline::run(reconciler, &cfg, job.target.scope(), run_opts, cancel).await?;
    Ok(build_pass_summary(
        &job.target,
        job.source,
        &outcomes,
        started.elapsed(),
    ))
}

fn log_sync_ages(tracker: &SyncTracker) {
    let now = tracker.now();
    for (node, last_synced) in tracker.snapshot() {
        let age = last_synced
            .map(|at| format_age(at, now))
            .unwrap_or_else(|| "never".to_string());
        tracing::debug!(node = %node, last_synced = %age, "sync age after full pass");
    }
}

async fn enqueue(
    job_tx: &mpsc::Sender<PassJob>,
    target: PassTarget,
    source: &'static str,
) -> Result<(), DaemonError> {
    job_tx
        .send(PassJob { target, source })
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass queue"))
}

fn build_pass_summary(
    target: &PassTarget,
    source: &'static str,
    outcomes: &[NodeOutcome],
    duration: Duration,
) -> PassSummary {
    let mut summary = PassSummary {
        target: target.label(),
        source: source.to_string(),
        nodes: outcomes.len(),
        duration_ms: duration.as_millis(),
        ..PassSummary::default()
    };

    for outcome in outcomes {
        let result = match &outcome.result {
            Ok(result) => result,
            Err(_) => {
                summary.failed += 1;
                continue;
            }
        };
        match result.status {
            PassStatus::Synced => summary.synced += 1,
            PassStatus::NotDue { .. } | PassStatus::InFlight => summary.skipped += 1,
            PassStatus::Filtered { .. } => summary.filtered += 1,
        }
        summary.conflicts += result.conflicts().count();
        summary.writes += result
            .writes
            .iter()
            .filter(|w| {
                matches!(
                    w,
                    WriteResult::LabelsPatched { .. } | WriteResult::TagsUpdated { .. }
                )
            })
            .count();
    }

    summary
}

fn should_process_event(debounce: &mut HashMap<String, Instant>, node: &str, now: Instant) -> bool {
    should_process_event_with_threshold(debounce, node, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<String, Instant>,
    node: &str,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(node) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(node.to_string(), now);
            true
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())
        .map_err(|err| DaemonError::Runtime(format!("SIGTERM handler failed: {err}")))?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => ctrl_c
            .map(|()| "ctrl-c")
            .map_err(|err| DaemonError::Runtime(format!("ctrl-c handler failed: {err}"))),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map(|()| "ctrl-c")
        .map_err(|err| DaemonError::Runtime(format!("ctrl-c handler failed: {err}")))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

// ---------------------------------------------------------------------------
// One-shot helpers for the CLI
// ---------------------------------------------------------------------------

fn block_on<F: Future>(future: F) -> Result<F::Output, DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    Ok(runtime.block_on(future))
}

async fn connect_for(location: &ConfigLocation) -> Result<Option<Client>, DaemonError> {
    match location {
        ConfigLocation::File(_) => Ok(None),
        ConfigLocation::ConfigMap { .. } => Ok(Some(Client::try_default().await?)),
    }
}

/// Read the effective options without creating anything in the cluster.
pub async fn load_config(location: &ConfigLocation) -> Result<ConfigOptions, DaemonError> {
    let client = connect_for(location).await?;
    ConfigSource::resolve(location, client.as_ref())?.read().await
}

pub fn load_config_blocking(location: &ConfigLocation) -> Result<ConfigOptions, DaemonError> {
    block_on(load_config(location))?
}

/// Dry-run one node's pass: reads both sides, writes nothing.
pub async fn plan(
    node: &str,
    location: &ConfigLocation,
    pass_timeout: Duration,
) -> Result<NodeSyncResult, DaemonError> {
    let client = Client::try_default().await?;
    let cfg = ConfigSource::resolve(location, Some(&client))?.read().await?;
    let reconciler = build_reconciler(client)?;
    let ctx = PassContext::with_timeout(pass_timeout);
    Ok(reconciler
        .reconcile_node(node, &cfg, &ctx, PassMode::DryRun)
        .await?)
}

pub fn plan_blocking(
    node: &str,
    location: &ConfigLocation,
    pass_timeout: Duration,
) -> Result<NodeSyncResult, DaemonError> {
    block_on(plan(node, location, pass_timeout))?
}
