use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::LightpadEvent;

/// Delay before reconnecting a dropped event stream
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Read newline-delimited JSON events from a lightpad until the connection
/// closes, handing each decoded event to `sink`.
pub async fn read_events(
    addr: SocketAddr,
    lpid: &str,
    sink: &(impl Fn(LightpadEvent) + Send + Sync),
) -> io::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    info!("Streaming events from lightpad {} at {}", lpid, addr);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match LightpadEvent::from_json_line(&line, lpid) {
            Some(event) => sink(event),
            None => debug!("Ignoring event from {}: {}", lpid, line),
        }
    }

    Ok(())
}

/// Keep an event stream to `addr` open for the life of the task,
/// reconnecting after failures.
pub fn spawn_event_stream(
    addr: SocketAddr,
    lpid: String,
    sink: impl Fn(LightpadEvent) + Send + Sync + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_events(addr, &lpid, &sink).await {
                Ok(()) => warn!("Event stream from {} closed", lpid),
                Err(e) => warn!("Event stream from {} failed: {}", lpid, e),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}
