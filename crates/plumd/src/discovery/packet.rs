use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Payload of the broadcast probe.
pub const PROBE_PAYLOAD: &[u8] = b"PLUM";

/// A lightpad seen on the local network.
///
/// Carries reachability only; everything else comes from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredDevice {
    pub lpid: String,
    /// Source IP of the datagram, with the control port the device announced
    pub address: SocketAddr,
}

/// Parse a probe reply or heartbeat.
///
/// Format: `<tag> <sequence> <lpid> <port> [...]`, whitespace separated.
/// Returns `None` for anything that is not UTF-8, has fewer than four
/// tokens, or whose port token is not a port number.
pub fn parse_announcement(data: &[u8], source: SocketAddr) -> Option<DiscoveredDevice> {
    let text = std::str::from_utf8(data).ok()?;
    let tokens: Vec<&str> = text.split_whitespace().collect();

    if tokens.len() < 4 {
        return None;
    }

    let port = tokens[3].parse::<u16>().ok()?;

    Some(DiscoveredDevice {
        lpid: tokens[2].to_string(),
        address: SocketAddr::new(source.ip(), port),
    })
}

/// Lightpad ids already reported during this discovery session.
///
/// One set is shared by the probe loop and the heartbeat listener so a
/// device is reported once no matter which mechanism sees it first.
#[derive(Debug, Clone, Default)]
pub struct SeenDevices {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SeenDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `lpid`, returning true only the first time it is seen.
    pub fn first_sighting(&self, lpid: &str) -> bool {
        let mut seen = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(lpid.to_string())
    }

    /// Drop `lpid` so its next announcement is forwarded again.
    pub fn forget(&self, lpid: &str) -> bool {
        let mut seen = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        seen.remove(lpid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
