use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use super::lightpad::Lightpad;
use super::load::LogicalLoad;
use super::reconciler::Reconciler;
use crate::config::Config;
use crate::control::Connector;
use crate::control::HttpsConnector;
use crate::directory::DirectoryClient;
use crate::directory::DirectoryRegistry;
use crate::directory::SyncReport;
use crate::discovery::LocalDiscovery;
use crate::error::Result;

/// plumd engine
///
/// Owns the directory client, both discovery mechanisms and the reconciler
/// that joins them. Register listeners before calling [`Engine::start`] to
/// be told about every lightpad and load.
pub struct Engine {
    directory: Arc<DirectoryClient>,
    discovery: LocalDiscovery,
    reconciler: Arc<Reconciler>,

    /// Address the heartbeat listener is bound to, once started
    heartbeat_addr: Option<SocketAddr>,

    /// Handles for background tasks (reconciler, heartbeat listener)
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Create an engine that controls lightpads over HTTPS
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_connector(config, Arc::new(HttpsConnector::new()?))
    }

    /// Create an engine with a custom way of reaching lightpads
    pub fn with_connector(config: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let registry = Arc::new(DirectoryRegistry::new());
        let directory = Arc::new(DirectoryClient::new(&config.cloud, registry)?);
        let discovery = LocalDiscovery::new(config.discovery.clone());
        let event_port = config.events.enabled.then_some(config.events.port);
        let reconciler = Reconciler::new(directory.clone(), connector, event_port)
            .with_discovery(discovery.seen().clone());

        Ok(Self {
            directory,
            discovery,
            reconciler: Arc::new(reconciler),
            heartbeat_addr: None,
            handles: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Arc<DirectoryClient> {
        &self.directory
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn heartbeat_addr(&self) -> Option<SocketAddr> {
        self.heartbeat_addr
    }

    pub fn add_load_listener(
        &self,
        listener: impl Fn(&Arc<LogicalLoad>) + Send + Sync + 'static,
    ) {
        self.reconciler.add_load_listener(listener);
    }

    pub fn add_lightpad_listener(
        &self,
        listener: impl Fn(&Arc<Lightpad>) + Send + Sync + 'static,
    ) {
        self.reconciler.add_lightpad_listener(listener);
    }

    pub fn logical_loads(&self) -> Vec<Arc<LogicalLoad>> {
        self.reconciler.logical_loads()
    }

    pub fn lightpads(&self) -> Vec<Arc<Lightpad>> {
        self.reconciler.lightpads()
    }

    pub fn logical_load(&self, llid: &str) -> Option<Arc<LogicalLoad>> {
        self.reconciler.logical_load(llid)
    }

    pub fn lightpad(&self, lpid: &str) -> Option<Arc<Lightpad>> {
        self.reconciler.lightpad(lpid)
    }

    /// Start discovery and reconciliation, then walk the directory.
    ///
    /// Returns once the walk finishes; discovery and reconciliation keep
    /// running in the background until [`Engine::shutdown`].
    pub async fn start(&mut self) -> Result<SyncReport> {
        self.start_discovery().await?;
        self.sync_directory().await
    }

    /// Start the reconciler loop, the heartbeat listener and the probe thread.
    pub async fn start_discovery(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.handles
            .push(tokio::spawn(self.reconciler.clone().run(rx)));

        match self.discovery.spawn_heartbeats(tx.clone()).await {
            Ok((addr, handle)) => {
                self.heartbeat_addr = Some(addr);
                self.handles.push(handle);
            }
            Err(e) => warn!("Heartbeat listener unavailable: {}", e),
        }

        // The probe thread finishes on its own after its last cycle
        self.discovery.spawn_probe(tx)?;
        Ok(())
    }

    /// Walk the whole directory, releasing reconciliations waiting on it.
    pub async fn sync_directory(&self) -> Result<SyncReport> {
        let report = self.directory.sync_all().await?;
        info!(
            "Directory synced: {} house(s), {} room(s), {} load(s), {} lightpad(s), {} skipped",
            report.houses, report.rooms, report.loads, report.devices, report.skipped
        );
        Ok(report)
    }

    /// Stop background tasks
    pub fn shutdown(&mut self) {
        self.reconciler.shutdown();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
