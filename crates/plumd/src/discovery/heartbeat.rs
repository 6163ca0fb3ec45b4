use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::packet::{parse_announcement, DiscoveredDevice, SeenDevices};

/// Pause after a failed receive before listening again
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Long-lived listener for the announcements lightpads broadcast on their own.
pub struct HeartbeatListener {
    socket: UdpSocket,
    seen: SeenDevices,
}

impl HeartbeatListener {
    pub async fn bind(addr: SocketAddr, seen: SeenDevices) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Listening for lightpad heartbeats on {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, seen))
    }

    pub fn from_socket(socket: UdpSocket, seen: SeenDevices) -> Self {
        Self { socket, seen }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Forward every first-seen lightpad to `handler`. Never returns;
    /// receive errors are logged and listening continues.
    pub async fn listen_heartbeats(self, mut handler: impl FnMut(DiscoveredDevice)) {
        let mut buf = [0u8; 1024];
        loop {
            let (len, source) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Heartbeat receive failed: {}", e);
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    continue;
                }
            };

            let Some(device) = parse_announcement(&buf[..len], source) else {
                debug!("Ignoring malformed heartbeat from {}", source);
                continue;
            };

            if self.seen.first_sighting(&device.lpid) {
                info!("Heartbeat from new lightpad {} at {}", device.lpid, device.address);
                handler(device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_heartbeats_forward_each_lightpad_once() {
        let seen = SeenDevices::new();
        let listener = HeartbeatListener::bind("127.0.0.1:0".parse().unwrap(), seen.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(listener.listen_heartbeats(move |device| {
            let _ = tx.send(device);
        }));

        // Already reported by the probe
        seen.first_sighting("lp-probe");

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for datagram in [
            &b"PLUM 1 lp-a 8443"[..],
            b"PLUM 2 lp-a 8443",
            b"PLUM",
            b"PLUM 1 lp-probe 8443",
            b"PLUM 1 lp-b 8443",
        ] {
            sender.send_to(datagram, addr).await.unwrap();
        }

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.lpid, "lp-a");
        assert_eq!(first.address, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(second.lpid, "lp-b");

        let nothing_more = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(nothing_more.is_err());

        task.abort();
    }

    #[tokio::test]
    async fn test_receive_error_backs_off_and_keeps_listening() {
        // A socket connected to a closed port reports the ICMP refusal on
        // its next receive
        let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = closed.local_addr().unwrap();
        drop(closed);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer).await.unwrap();
        socket.send(b"PLUM").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let listener = HeartbeatListener::from_socket(socket, SeenDevices::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(listener.listen_heartbeats(move |device| {
            let _ = tx.send(device);
        }));

        // The peer comes up and announces itself
        tokio::time::sleep(Duration::from_millis(50)).await;
        let lightpad = UdpSocket::bind(peer).await.unwrap();
        lightpad.send_to(b"PLUM 1 lp-a 8443", addr).await.unwrap();

        let device = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.lpid, "lp-a");
        assert!(!task.is_finished());

        task.abort();
    }
}
