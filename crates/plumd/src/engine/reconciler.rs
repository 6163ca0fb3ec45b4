use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lightpad::Lightpad;
use super::load::LogicalLoad;
use super::observer::Observers;
use crate::control::{spawn_event_stream, Connector};
use crate::directory::DirectoryClient;
use crate::discovery::{DeviceReceiver, DiscoveredDevice, SeenDevices};
use crate::error::Result;

/// Result of reconciling one discovered device.
#[derive(Debug, Clone)]
pub enum Reconciliation {
    /// The lpid was already reconciled or is in flight
    Duplicate,
    Wired {
        lightpad: Arc<Lightpad>,
        /// True if this device created its logical load
        new_load: bool,
    },
}

/// Joins discovery output with directory records into live lightpads and
/// logical loads.
///
/// Discovery and the directory walk run concurrently; reconciliation waits
/// on the directory cache for the records it needs.
pub struct Reconciler {
    directory: Arc<DirectoryClient>,
    connector: Arc<dyn Connector>,
    /// Device event stream port, when streaming is enabled
    event_port: Option<u16>,
    /// Discovery's dedup set, released alongside `seen` on failure
    discovery_seen: Option<SeenDevices>,

    seen: Mutex<HashSet<String>>,
    lightpads: Mutex<HashMap<String, Arc<Lightpad>>>,
    loads: Mutex<HashMap<String, Arc<LogicalLoad>>>,
    /// Serialises load creation per llid
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    stream_handles: Mutex<Vec<JoinHandle<()>>>,

    load_observers: Observers<LogicalLoad>,
    lightpad_observers: Observers<Lightpad>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<DirectoryClient>,
        connector: Arc<dyn Connector>,
        event_port: Option<u16>,
    ) -> Self {
        Self {
            directory,
            connector,
            event_port,
            discovery_seen: None,
            seen: Mutex::new(HashSet::new()),
            lightpads: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            stream_handles: Mutex::new(Vec::new()),
            load_observers: Observers::new(),
            lightpad_observers: Observers::new(),
        }
    }

    /// Share discovery's dedup set, so a device whose reconciliation failed
    /// is forwarded again on its next heartbeat or probe reply.
    pub fn with_discovery(mut self, seen: SeenDevices) -> Self {
        self.discovery_seen = Some(seen);
        self
    }

    /// Called once per newly created logical load
    pub fn add_load_listener(
        &self,
        listener: impl Fn(&Arc<LogicalLoad>) + Send + Sync + 'static,
    ) {
        self.load_observers.add(listener);
    }

    /// Called once per newly wired lightpad
    pub fn add_lightpad_listener(
        &self,
        listener: impl Fn(&Arc<Lightpad>) + Send + Sync + 'static,
    ) {
        self.lightpad_observers.add(listener);
    }

    pub fn lightpad(&self, lpid: &str) -> Option<Arc<Lightpad>> {
        self.lightpads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(lpid)
            .cloned()
    }

    pub fn logical_load(&self, llid: &str) -> Option<Arc<LogicalLoad>> {
        self.loads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(llid)
            .cloned()
    }

    pub fn lightpads(&self) -> Vec<Arc<Lightpad>> {
        self.lightpads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn logical_loads(&self) -> Vec<Arc<LogicalLoad>> {
        self.loads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Reconcile one discovered device.
    ///
    /// Each lpid is processed at most once. If reconciliation fails the lpid
    /// is forgotten here and by discovery, so a later sighting can retry.
    pub async fn reconcile(&self, device: DiscoveredDevice) -> Result<Reconciliation> {
        let first = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.lpid.clone());
        if !first {
            debug!("Lightpad {} already reconciled", device.lpid);
            return Ok(Reconciliation::Duplicate);
        }

        let lpid = device.lpid.clone();
        match self.wire(device).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.seen
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&lpid);
                if let Some(discovery_seen) = &self.discovery_seen {
                    discovery_seen.forget(&lpid);
                }
                Err(e)
            }
        }
    }

    fn load_lock(&self, llid: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.load_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(llid.to_string())
            .or_default()
            .clone()
    }

    async fn wire(&self, device: DiscoveredDevice) -> Result<Reconciliation> {
        let record = self.directory.await_device(&device.lpid).await?;
        let control = self.connector.connect(&device, &record);
        let lightpad = Arc::new(Lightpad::new(&device, &record, control));
        let llid = record.llid.clone();

        let new_load = {
            let lock = self.load_lock(&llid);
            let _guard = lock.lock().await;

            match self.logical_load(&llid) {
                Some(load) => {
                    load.add_member(lightpad.clone());
                    false
                }
                None => {
                    let load_record = self.directory.await_load(&llid).await?;
                    let load = LogicalLoad::from_record(&load_record);
                    load.add_member(lightpad.clone());
                    self.loads
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(llid.clone(), load.clone());

                    if let Err(e) = load.refresh_metrics().await {
                        warn!("Initial metrics for load {} unavailable: {}", llid, e);
                    }

                    info!("New logical load {} ({})", load.name(), llid);
                    self.load_observers.notify(&load);
                    true
                }
            }
        };

        self.lightpads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.lpid.clone(), lightpad.clone());

        if let Some(port) = self.event_port {
            self.start_event_stream(&lightpad, port);
        }

        info!("Lightpad {} ready at {}", device.lpid, device.address);
        self.lightpad_observers.notify(&lightpad);

        Ok(Reconciliation::Wired { lightpad, new_load })
    }

    fn start_event_stream(&self, lightpad: &Arc<Lightpad>, port: u16) {
        let addr = std::net::SocketAddr::new(lightpad.address().ip(), port);
        let weak = Arc::downgrade(lightpad);
        let handle = spawn_event_stream(addr, lightpad.lpid().to_string(), move |event| {
            if let Some(lightpad) = weak.upgrade() {
                lightpad.dispatch(&event);
            }
        });
        self.stream_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Reconcile every device received on `rx`, each in its own task.
    pub async fn run(self: Arc<Self>, mut rx: DeviceReceiver) {
        while let Some(device) = rx.recv().await {
            let reconciler = self.clone();
            tokio::spawn(async move {
                let lpid = device.lpid.clone();
                if let Err(e) = reconciler.reconcile(device).await {
                    warn!("Failed to reconcile lightpad {}: {}", lpid, e);
                }
            });
        }
        debug!("Discovery channel closed");
    }

    /// Stop every device event stream.
    pub fn shutdown(&self) {
        for handle in self
            .stream_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }
}
