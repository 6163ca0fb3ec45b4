use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::packet::{parse_announcement, DiscoveredDevice, SeenDevices, PROBE_PAYLOAD};

/// Broadcast probe followed by a bounded listen window, repeated a fixed
/// number of times to cover lost datagrams.
///
/// Uses blocking sockets; run it on its own thread (see [`ProbeLoop::spawn`]).
#[derive(Debug, Clone)]
pub struct ProbeLoop {
    target: SocketAddr,
    cycles: u32,
    listen_timeout: Duration,
    seen: SeenDevices,
}

impl ProbeLoop {
    pub fn new(
        target: SocketAddr,
        cycles: u32,
        listen_timeout: Duration,
        seen: SeenDevices,
    ) -> Self {
        Self {
            target,
            cycles,
            listen_timeout,
            seen,
        }
    }

    /// Run every probe cycle, calling `handler` once per newly seen lightpad.
    ///
    /// Returns the number of lightpads forwarded. A failed cycle is logged
    /// and the next one still runs.
    pub fn probe_and_listen(&self, mut handler: impl FnMut(DiscoveredDevice)) -> usize {
        let mut forwarded = 0;
        for cycle in 1..=self.cycles {
            debug!("Probe cycle {}/{} to {}", cycle, self.cycles, self.target);
            match self.cycle(&mut handler) {
                Ok(n) => forwarded += n,
                Err(e) => warn!("Probe cycle {} failed: {}", cycle, e),
            }
        }
        info!("Probe finished, {} new lightpad(s)", forwarded);
        forwarded
    }

    fn cycle(&self, handler: &mut impl FnMut(DiscoveredDevice)) -> io::Result<usize> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        socket.send_to(PROBE_PAYLOAD, self.target)?;

        let deadline = Instant::now() + self.listen_timeout;
        let mut buf = [0u8; 1024];
        let mut forwarded = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;

            let (len, source) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    break;
                }
                Err(e) => return Err(e),
            };

            let Some(device) = parse_announcement(&buf[..len], source) else {
                debug!("Ignoring malformed probe reply from {}", source);
                continue;
            };

            if self.seen.first_sighting(&device.lpid) {
                info!("Probe found lightpad {} at {}", device.lpid, device.address);
                handler(device);
                forwarded += 1;
            } else {
                debug!("Probe reply from known lightpad {}", device.lpid);
            }
        }

        Ok(forwarded)
    }

    /// Run the probe on a dedicated thread, handing devices to the async
    /// side through `tx`.
    pub fn spawn(self, tx: mpsc::UnboundedSender<DiscoveredDevice>) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("plumd-probe".to_string())
            .spawn(move || {
                self.probe_and_listen(|device| {
                    if tx.send(device).is_err() {
                        debug!("Discovery receiver closed, dropping device");
                    }
                });
            })
    }
}
