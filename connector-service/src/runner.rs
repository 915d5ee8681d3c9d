//! The long-running connector loop.
//!
//! [`run`] wires the clients, the state store, the engine, the tag sync job
//! and the HTTP endpoints together and polls until SIGINT or SIGTERM.
//! Cycles never overlap: the loop awaits each one before the next tick.

use crate::config::{Config, HttpConfig, TagSyncConfig};
use crate::engine::{CycleReport, Engine};
use crate::error::{EngineError, Result};
use crate::metrics::ConnectorMetrics;
use crate::store::{self, StateStore};
use crate::tag_sync::{spawn_tag_sync_task, TagSync};
use connector_client::{
    AllisaClient, AllisaClientConfig, SourceApi, TargetApi, WiseTimeClient, WiseTimeClientConfig,
};
use connector_core::{RetryPolicy, SyncState};
use connector_types::{InstanceId, Watermark};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// A fully wired connector instance.
pub struct Connector {
    engine: Engine,
    target: Arc<dyn TargetApi>,
    store: Arc<dyn StateStore>,
    tag_sync: Arc<TagSync>,
    metrics: Arc<ConnectorMetrics>,
    poll_interval: Duration,
    backoff: RetryPolicy,
    tag_sync_config: TagSyncConfig,
    http: HttpConfig,
}

impl Connector {
    /// Build the HTTP clients and open the state store described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let source = WiseTimeClient::new(WiseTimeClientConfig {
            timeout: Duration::from_secs(config.wisetime.request_timeout_secs),
            ..WiseTimeClientConfig::new(&config.wisetime.base_url, &config.wisetime.api_token)
        })?;
        let target = AllisaClient::new(AllisaClientConfig {
            timeout: Duration::from_secs(config.allisa.request_timeout_secs),
            ..AllisaClientConfig::new(
                &config.allisa.base_url,
                &config.allisa.api_key,
                &config.allisa.case_type,
                &config.allisa.post_type,
            )
        })?;
        let store = store::open(&config.storage).await?;

        Self::with_parts(config, Arc::new(source), Arc::new(target), store)
    }

    /// Wire a connector from already built parts.
    pub fn with_parts(
        config: &Config,
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let metrics = Arc::new(ConnectorMetrics::default());
        let engine = Engine::from_config(config, source.clone(), target.clone(), store.clone())?
            .with_metrics(metrics.clone());
        let tag_sync = TagSync::new(
            config.instance_id()?,
            source,
            target.clone(),
            store.clone(),
            config.mapping.tag_upsert_path.clone(),
            config.allisa.base_url.clone(),
            config.tag_sync.batch_size,
            metrics.clone(),
        );

        Ok(Self {
            engine,
            target,
            store,
            tag_sync: Arc::new(tag_sync),
            metrics,
            poll_interval: config.poll_interval(),
            backoff: config.retry_policy(),
            tag_sync_config: config.tag_sync.clone(),
            http: config.http.clone(),
        })
    }

    /// The instance this connector syncs.
    pub fn instance(&self) -> &InstanceId {
        self.engine.instance()
    }

    /// The state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &Arc<ConnectorMetrics> {
        &self.metrics
    }

    /// The tag sync job.
    pub fn tag_sync(&self) -> &Arc<TagSync> {
        &self.tag_sync
    }

    /// Whether Allisa answers. Updates the reachability gauge.
    pub async fn check_target(&self) -> bool {
        let reachable = self.target.can_connect().await;
        self.metrics
            .target_reachable
            .store(reachable, Ordering::Relaxed);
        if !reachable {
            tracing::warn!("Allisa is not reachable");
        }
        reachable
    }

    /// Run a single cycle from the persisted watermark.
    pub async fn sync_once(&self) -> Result<CycleReport> {
        let state = self.engine.load_state().await?;
        self.check_target().await;
        let (_, result) = self.engine.run_cycle(state).await;
        Ok(result?)
    }

    /// Move the persisted watermark to `to`.
    ///
    /// Moving back needs `force`: the postings after `to` are fetched and
    /// posted to Allisa again.
    pub async fn reset_watermark(&self, to: Watermark, force: bool) -> Result<Option<Watermark>> {
        let previous = self.store.load_watermark(self.instance()).await?;
        let current = SyncState::new(self.instance().clone(), previous.unwrap_or_default());
        let from = current.watermark;
        let next = current.reset(to, force)?;

        self.store
            .save_watermark(self.instance(), next.watermark)
            .await?;
        if next.watermark < from {
            tracing::warn!(
                instance = %self.instance(),
                previous = %from,
                watermark = %next.watermark,
                "watermark moved back by operator, postings after it will be posted again"
            );
        } else {
            tracing::warn!(
                instance = %self.instance(),
                previous = %from,
                watermark = %next.watermark,
                "watermark reset by operator"
            );
        }
        Ok(previous)
    }

    /// Poll until `shutdown` turns true.
    ///
    /// Non-fatal cycle errors are logged and retried on a later tick, backing
    /// off while they repeat. A state store error ends the loop with an error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut state = self.engine.load_state().await?;
        tracing::info!(
            instance = %self.instance(),
            watermark = %state.watermark,
            poll_interval_secs = self.poll_interval.as_secs(),
            "connector started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut shutdown) => break,
            }

            if state.consecutive_failures > 0 {
                let delay = self.backoff.delay_for(state.consecutive_failures);
                tracing::info!(
                    failures = state.consecutive_failures,
                    delay_ms = delay.as_millis() as u64,
                    "backing off after failed cycles"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stopped(&mut shutdown) => break,
                }
            }

            self.check_target().await;

            // Shutdown drops an unfinished cycle. Nothing is committed
            // before the batch is terminal, so the next start redoes it.
            let current = state.clone();
            let (next, result) = tokio::select! {
                outcome = self.engine.run_cycle(current) => outcome,
                _ = stopped(&mut shutdown) => {
                    tracing::info!("shutdown requested, abandoning cycle");
                    break;
                }
            };
            state = next;

            self.handle_result(&state, result)?;
        }

        tracing::info!(
            watermark = %state.watermark,
            cycles = state.cycles_completed,
            "connector stopped"
        );
        Ok(())
    }

    fn handle_result(
        &self,
        state: &SyncState,
        result: std::result::Result<CycleReport, connector_types::SyncError>,
    ) -> Result<()> {
        match result {
            Ok(report) => {
                tracing::info!(
                    cycle_id = %report.cycle_id,
                    postings = report.postings,
                    summary = %report.summary,
                    watermark = %report.watermark,
                    advanced = report.advanced(),
                    "cycle finished"
                );
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "state store failed, stopping");
                Err(EngineError::Sync(e))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    failures = state.consecutive_failures,
                    "cycle failed, retrying on a later tick"
                );
                Ok(())
            }
        }
    }
}

/// Run the connector described by `config` until SIGINT or SIGTERM.
///
/// Also starts the tag sync job and the health endpoints when enabled.
pub async fn run(config: Config) -> Result<()> {
    let connector = Connector::from_config(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tag_task = spawn_tag_sync_task(
        connector.tag_sync.clone(),
        connector.tag_sync_config.clone(),
        shutdown_rx.clone(),
    );

    let http_task = if connector.http.enabled {
        let bind = connector.http.bind_address.clone();
        let metrics = connector.metrics.clone();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = crate::http::serve(&bind, metrics, rx).await {
                tracing::error!(error = %e, address = %bind, "http endpoints failed");
            }
        }))
    } else {
        None
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let result = connector.run(shutdown_rx).await;

    tag_task.abort();
    if let Some(task) = http_task {
        task.abort();
    }
    result
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Resolves once the flag is true or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
