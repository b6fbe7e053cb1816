//! Runs connectors in batch (once, to completion) or as a daemon (forever,
//! each on its own cadence).
//!
//! Every connector runs in its own task behind a shared worker semaphore. A
//! failing connector is logged with its identity and never stops the others.

use crate::config::{ConnectorConfig, SchedulerSettings};
use crate::config_source::ConfigSource;
use crate::runtime::{RunReport, Runtime};
use crate::secrets::SecretSource;
use crate::{Error, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Runs every enabled configuration once, at most `workers` at a time.
///
/// Never fails: per-connector errors are logged and counted.
pub async fn run_batch(
    runtime: Arc<Runtime>,
    configs: Vec<ConnectorConfig>,
    workers: usize,
) -> BatchSummary {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut owners: HashMap<task::Id, ConnectorConfig> = HashMap::new();
    let mut summary = BatchSummary::default();

    for config in configs {
        if config.disabled {
            debug!(connector = %config.name, "skipping disabled connector");
            summary.skipped += 1;
            continue;
        }
        let runtime = Arc::clone(&runtime);
        let semaphore = Arc::clone(&semaphore);
        let owner = config.clone();
        let handle = tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            runtime.execute(&config).await
        });
        owners.insert(handle.id(), owner);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, result)) => (id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(config) = owners.remove(&id) else {
            continue;
        };
        match outcome {
            Ok(Ok(_)) => summary.succeeded += 1,
            Ok(Err(e)) => {
                summary.failed += 1;
                log_failure(&config, &e);
            }
            Err(e) => {
                summary.failed += 1;
                log_aborted(&config, &e);
            }
        }
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "batch run complete"
    );
    summary
}

fn log_aborted(config: &ConnectorConfig, e: &JoinError) {
    error!(
        connector = %config.name,
        connector_type = %config.connector,
        identity = %config.identity,
        operation = %config.operation_label(),
        error = %e,
        "connector task aborted"
    );
}

fn log_failure(config: &ConnectorConfig, e: &Error) {
    error!(
        connector = %config.name,
        connector_type = %config.connector,
        identity = %config.identity,
        operation = %config.operation_label(),
        error = %e,
        "connector run failed"
    );
}

struct Run {
    config: ConnectorConfig,
    /// Completion time of the last run.
    last: Option<Instant>,
    task: Option<JoinHandle<Result<RunReport>>>,
    /// Still present in the latest configuration refresh.
    active: bool,
}

impl Run {
    fn is_due(&self, now: Instant) -> bool {
        if !self.active || self.config.disabled || self.task.is_some() {
            return false;
        }
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.frequency(),
        }
    }

    fn finish(&mut self, outcome: std::result::Result<Result<RunReport>, JoinError>) {
        self.last = Some(Instant::now());
        match outcome {
            Ok(Ok(report)) => {
                debug!(connector = %report.name, entries = report.entries, "run reconciled")
            }
            Ok(Err(e)) => log_failure(&self.config, &e),
            Err(e) => log_aborted(&self.config, &e),
        }
    }
}

/// Long-running scheduler.
///
/// Keeps one entry per configuration name. Configurations that disappear
/// from the source stay in the map but are no longer dispatched.
pub struct Daemon {
    runtime: Arc<Runtime>,
    source: Box<dyn ConfigSource>,
    secrets: Option<Box<dyn SecretSource>>,
    semaphore: Arc<Semaphore>,
    tick: Duration,
    refresh: Duration,
    runs: HashMap<String, Run>,
}

impl Daemon {
    pub fn new(
        runtime: Arc<Runtime>,
        source: Box<dyn ConfigSource>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            runtime,
            source,
            secrets: None,
            semaphore: Arc::new(Semaphore::new(settings.workers.max(1))),
            tick: settings.tick(),
            refresh: settings.refresh(),
            runs: HashMap::new(),
        }
    }

    pub fn with_secrets(mut self, secrets: Box<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.runs.values().filter(|r| r.task.is_some()).count()
    }

    /// Number of configurations currently scheduled.
    pub fn scheduled(&self) -> usize {
        self.runs.values().filter(|r| r.active).count()
    }

    /// Reloads configurations, keeping timing state for ones already known.
    pub async fn refresh(&mut self) -> Result<usize> {
        let mut configs = self.source.get().await?;
        if let Some(secrets) = &self.secrets {
            configs = secrets.load(configs).await;
        }

        for run in self.runs.values_mut() {
            run.active = false;
        }
        let count = configs.len();
        for config in configs {
            match self.runs.get_mut(&config.name) {
                Some(run) => {
                    run.config = config;
                    run.active = true;
                }
                None => {
                    debug!(
                        connector = %config.name,
                        frequency = config.frequency,
                        "scheduling connector"
                    );
                    self.runs.insert(
                        config.name.clone(),
                        Run {
                            config,
                            last: None,
                            task: None,
                            active: true,
                        },
                    );
                }
            }
        }

        info!(configurations = count, tracked = self.runs.len(), "configurations refreshed");
        Ok(count)
    }

    /// Collects results of finished runs without blocking.
    pub fn reconcile(&mut self) -> usize {
        let mut finished = 0;
        for run in self.runs.values_mut() {
            let done = run.task.as_ref().map_or(false, |t| t.is_finished());
            if !done {
                continue;
            }
            if let Some(outcome) = run.task.take().and_then(|t| t.now_or_never()) {
                run.finish(outcome);
                finished += 1;
            }
        }
        finished
    }

    /// Starts every configuration whose frequency has elapsed and which has
    /// no run in flight. Returns how many were started.
    pub fn dispatch_due(&mut self, now: Instant) -> usize {
        let mut dispatched = 0;
        for run in self.runs.values_mut() {
            if !run.is_due(now) {
                continue;
            }
            let runtime = Arc::clone(&self.runtime);
            let semaphore = Arc::clone(&self.semaphore);
            let config = run.config.clone();
            debug!(connector = %config.name, "dispatching connector");
            run.task = Some(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                runtime.execute(&config).await
            }));
            dispatched += 1;
        }
        dispatched
    }

    pub fn tick(&mut self) -> usize {
        self.reconcile();
        self.dispatch_due(Instant::now())
    }

    /// Waits for every in-flight run and reconciles it.
    pub async fn wait_in_flight(&mut self) {
        for run in self.runs.values_mut() {
            if let Some(task) = run.task.take() {
                let outcome = task.await;
                run.finish(outcome);
            }
        }
    }

    /// Schedules until `shutdown` resolves, then lets in-flight runs finish.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.refresh().await?;

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresher = tokio::time::interval(self.refresh);
        refresher.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately and the initial refresh already ran.
        refresher.tick().await;

        info!(
            tick_secs = self.tick.as_secs(),
            refresh_secs = self.refresh.as_secs(),
            scheduled = self.scheduled(),
            "daemon started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = refresher.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "configuration refresh failed, keeping previous set");
                    }
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        info!(in_flight = self.in_flight(), "shutting down, waiting for running connectors");
        self.wait_in_flight().await;
        Ok(())
    }
}
