use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::compactor;
use crate::config::Config;
use crate::engine::Engine;
use crate::notify::{LoggingHandler, NotificationHandler, NotifyHub, run_notification_worker};
use crate::observability;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// An opened engine plus its background tasks.
pub struct Runtime {
    engine: Arc<Engine>,
    notify_worker: JoinHandle<()>,
    compactor: JoinHandle<()>,
}

impl Runtime {
    /// Open the engine under `config.data_dir` with the logging
    /// notification handler. Must be called inside a Tokio runtime.
    pub fn start(config: &Config) -> io::Result<Self> {
        Self::start_with_handler(config, Arc::new(LoggingHandler))
    }

    pub fn start_with_handler(
        config: &Config,
        handler: Arc<dyn NotificationHandler>,
    ) -> io::Result<Self> {
        observability::init_tracing();
        observability::init(config.metrics_port).map_err(|e| io::Error::other(e.to_string()))?;
        std::fs::create_dir_all(&config.data_dir)?;

        let (notify, rx) = NotifyHub::new(config.notify_capacity);
        let engine = Arc::new(Engine::new(config.wal_path(), notify)?);

        let notify_worker = tokio::spawn(run_notification_worker(
            rx,
            handler,
            config.retry_policy(),
        ));
        let compactor = tokio::spawn(compactor::run_compactor(
            engine.clone(),
            config.compact_threshold,
            config.compact_interval,
        ));

        info!(
            data_dir = %config.data_dir.display(),
            compact_threshold = config.compact_threshold,
            notify_capacity = config.notify_capacity,
            metrics = %config
                .metrics_port
                .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")),
            "roombook started"
        );

        Ok(Self {
            engine,
            notify_worker,
            compactor,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Stop the compactor and give queued notifications a bounded window to
    /// drain. The worker only finishes once every engine handle is dropped.
    pub async fn shutdown(self) {
        self.compactor.abort();
        drop(self.engine);

        let mut worker = self.notify_worker;
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut worker).await {
            Ok(_) => info!("notification queue drained"),
            Err(_) => {
                warn!("notification drain timed out");
                worker.abort();
            }
        }
        info!("roombook stopped");
    }
}
