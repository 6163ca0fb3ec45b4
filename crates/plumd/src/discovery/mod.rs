//! Local network discovery of lightpads.
//!
//! Two mechanisms feed one channel: a broadcast probe run on a dedicated
//! thread, and a heartbeat listener on the tokio runtime. Both share a
//! [`SeenDevices`] set, so each lightpad is reported once per session.

mod heartbeat;
mod packet;
mod probe;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::sync::mpsc;
use tracing::debug;

pub use heartbeat::HeartbeatListener;
pub use packet::parse_announcement;
pub use packet::DiscoveredDevice;
pub use packet::SeenDevices;
pub use packet::PROBE_PAYLOAD;
pub use probe::ProbeLoop;

use crate::config::DiscoveryConfig;

/// Sender half of the discovery → reconciler handoff
pub type DeviceSender = mpsc::UnboundedSender<DiscoveredDevice>;

/// Receiver half of the discovery → reconciler handoff
pub type DeviceReceiver = mpsc::UnboundedReceiver<DiscoveredDevice>;

/// Both discovery mechanisms, configured and sharing one seen-set.
pub struct LocalDiscovery {
    config: DiscoveryConfig,
    seen: SeenDevices,
}

impl LocalDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            seen: SeenDevices::new(),
        }
    }

    pub fn seen(&self) -> &SeenDevices {
        &self.seen
    }

    pub fn probe(&self) -> ProbeLoop {
        ProbeLoop::new(
            SocketAddr::from((self.config.broadcast_address, self.config.probe_port)),
            self.config.probe_cycles,
            self.config.listen_timeout(),
            self.seen.clone(),
        )
    }

    /// Start the probe thread.
    pub fn spawn_probe(&self, tx: DeviceSender) -> io::Result<std::thread::JoinHandle<()>> {
        self.probe().spawn(tx)
    }

    /// Bind the heartbeat port and start listening on the runtime.
    ///
    /// Returns the bound address along with the listener task.
    pub async fn spawn_heartbeats(
        &self,
        tx: DeviceSender,
    ) -> io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.heartbeat_port));
        let listener = HeartbeatListener::bind(addr, self.seen.clone()).await?;
        let bound = listener.local_addr()?;

        let handle = tokio::spawn(listener.listen_heartbeats(move |device| {
            if tx.send(device).is_err() {
                debug!("Discovery receiver closed, dropping device");
            }
        }));
        Ok((bound, handle))
    }
}
