use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::error::{SyncError, SyncResult};
use crate::local_store::LocalStore;
use crate::reconciler::{DEFAULT_INTERVAL, Reconciler};
use crate::remote::{HttpRemoteStore, RemoteStore};

/// Builder for a [`TaskSync`] handle.
///
/// ```ignore
/// let sync = TaskSyncBuilder::new("sqlite://tasks.db?mode=rwc", remote_url, "alice")
///     .with_probe(true)
///     .with_background_sync(true)
///     .build()
///     .await?;
/// sync.reconciler().add_task(NewTask::new("buy milk")).await?;
/// ```
pub struct TaskSyncBuilder {
    database_url: String,
    remote_url: Url,
    owner: String,
    interval: Duration,
    request_timeout: Duration,
    probe_interval: Duration,
    sync_on_reconnect: bool,
    initially_online: bool,
    probe: bool,
    background_sync: bool,
}

impl TaskSyncBuilder {
    pub fn new(database_url: &str, remote_url: Url, owner: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            remote_url,
            owner: owner.to_string(),
            interval: DEFAULT_INTERVAL,
            request_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(10),
            sync_on_reconnect: true,
            initially_online: false,
            probe: false,
            background_sync: false,
        }
    }

    /// Start from a validated [`SyncConfig`].
    pub fn from_config(config: &SyncConfig) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        Ok(Self::new(&config.database_url, config.remote_url()?, &config.owner)
            .with_interval(config.reconcile_interval())
            .with_request_timeout(config.request_timeout())
            .with_probe_interval(config.probe_interval())
            .with_sync_on_reconnect(config.sync_on_reconnect))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_on_reconnect = enabled;
        self
    }

    /// Initial connectivity state before any probe has reported.
    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    /// Spawn a [`ReachabilityProbe`] against the remote host.
    pub fn with_probe(mut self, enabled: bool) -> Self {
        self.probe = enabled;
        self
    }

    /// Spawn the periodic reconciliation loop.
    pub fn with_background_sync(mut self, enabled: bool) -> Self {
        self.background_sync = enabled;
        self
    }

    pub async fn build(self) -> SyncResult<TaskSync> {
        let local = Arc::new(LocalStore::connect(&self.database_url).await?);
        let connectivity = Arc::new(ConnectivityMonitor::new(self.initially_online));

        let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(
            self.remote_url.clone(),
            self.request_timeout,
            connectivity.clone(),
        )?);

        let probe = ReachabilityProbe::for_url(&self.remote_url, self.probe_interval, self.request_timeout)
            .ok_or_else(|| SyncError::remote(None, format!("cannot probe {}", self.remote_url)))?;

        let reconciler = Arc::new(
            Reconciler::new(local, remote, connectivity.clone(), self.owner)
                .with_interval(self.interval)
                .with_sync_on_reconnect(self.sync_on_reconnect),
        );

        let mut tasks = Vec::new();
        if self.probe {
            log::info!("Probing {} every {:?}", probe.target(), self.probe_interval);
            tasks.push(probe.clone().spawn(connectivity.clone()));
        }
        if self.background_sync {
            log::info!("Reconciling every {:?}", self.interval);
            tasks.push(reconciler.clone().spawn());
        }

        Ok(TaskSync {
            reconciler,
            connectivity,
            probe,
            tasks,
        })
    }
}

/// A running sync stack. Background tasks are aborted on drop.
pub struct TaskSync {
    reconciler: Arc<Reconciler>,
    connectivity: Arc<ConnectivityMonitor>,
    probe: ReachabilityProbe,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskSync {
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        self.reconciler.local()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Probe the remote host once and update the monitor.
    pub async fn probe_now(&self) -> bool {
        self.probe.probe_once(&self.connectivity).await
    }

    /// Abort the background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TaskSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}
