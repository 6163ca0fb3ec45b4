//! The engine as a whole: heartbeats and probe replies over loopback UDP,
//! the cloud directory served by wiremock, lightpads faked.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plumd::control::{ControlChannel, Connector, LightpadMetrics, MetricsReport};
use plumd::directory::DeviceRecord;
use plumd::discovery::DiscoveredDevice;
use plumd::{Config, Engine};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeLightpad;

#[async_trait]
impl ControlChannel for FakeLightpad {
    async fn get_metrics(&self, _llid: &str) -> plumd::Result<MetricsReport> {
        Ok(MetricsReport {
            lightpad_metrics: vec![LightpadMetrics {
                lpid: "A".to_string(),
                level: 128,
                power: 7.5,
            }],
        })
    }

    async fn set_level(&self, _llid: &str, _level: u8) -> plumd::Result<()> {
        Ok(())
    }

    async fn set_config(&self, _llid: &str, _config: serde_json::Value) -> plumd::Result<()> {
        Ok(())
    }
}

struct FakeConnector;

impl Connector for FakeConnector {
    fn connect(
        &self,
        _device: &DiscoveredDevice,
        _record: &DeviceRecord,
    ) -> Arc<dyn ControlChannel> {
        Arc::new(FakeLightpad)
    }
}

async fn mount_post(
    server: &MockServer,
    endpoint: &str,
    body: serde_json::Value,
    reply: ResponseTemplate,
) {
    Mock::given(method("POST"))
        .and(path(format!("/v2/{}", endpoint)))
        .and(body_json(body))
        .respond_with(reply)
        .mount(server)
        .await;
}

fn ok(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// H1 → R1 → L1 {lpids}, with `getLightpad` answering after `delay`
async fn directory_server(lpids: &[&str], delay: Duration) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/getHouses"))
        .respond_with(ok(json!(["H1"])))
        .mount(&server)
        .await;
    mount_post(
        &server,
        "getHouse",
        json!({"hid": "H1"}),
        ok(json!({
            "hid": "H1",
            "house_name": "Home",
            "house_access_token": "secret",
            "rids": ["R1"],
        })),
    )
    .await;
    mount_post(
        &server,
        "getRoom",
        json!({"rid": "R1"}),
        ok(json!({"rid": "R1", "room_name": "Hall", "llids": ["L1"]})),
    )
    .await;
    mount_post(
        &server,
        "getLogicalLoad",
        json!({"llid": "L1"}),
        ok(json!({"llid": "L1", "logical_load_name": "Hall", "lpids": lpids})),
    )
    .await;
    for lpid in lpids {
        let record = json!({"lpid": lpid, "llid": "L1", "config": {"glowEnabled": true}});
        mount_post(
            &server,
            "getLightpad",
            json!({"lpid": lpid}),
            ok(record).set_delay(delay),
        )
        .await;
    }

    server
}

/// Engine config pointing at `server`, with discovery confined to loopback
fn config(server: &MockServer, probe_port: u16, probe_cycles: u32, await_secs: u64) -> Config {
    let toml = format!(
        r#"
        [cloud]
        username = "user"
        password = "pass"
        base_url = "{}/v2/"
        await_timeout_secs = {await_secs}
        sync_timeout_secs = 10

        [discovery]
        broadcast_address = "127.0.0.1"
        probe_port = {probe_port}
        heartbeat_port = 0
        probe_cycles = {probe_cycles}
        listen_timeout_secs = 1

        [events]
        enabled = false
        "#,
        server.uri(),
    );
    toml::from_str(&toml).unwrap()
}

fn lightpad_names(engine: &Engine) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    engine.add_lightpad_listener(move |pad| {
        let _ = tx.send(pad.lpid().to_string());
    });
    rx
}

/// Answer the first probe that arrives with `reply`.
fn spawn_responder(reply: &'static [u8]) -> (SocketAddr, std::thread::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = socket.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        if let Ok((len, from)) = socket.recv_from(&mut buf) {
            assert_eq!(&buf[..len], plumd::discovery::PROBE_PAYLOAD);
            socket.send_to(reply, from).unwrap();
        }
    });
    (addr, handle)
}

fn heartbeat_target(engine: &Engine) -> SocketAddr {
    let port = engine.heartbeat_addr().unwrap().port();
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test]
async fn test_probe_and_heartbeat_report_each_lightpad_once() {
    let server = directory_server(&["A", "B"], Duration::ZERO).await;
    let (probe_addr, responder) = spawn_responder(b"PLUM 1 A 8443");
    let config = config(&server, probe_addr.port(), 1, 5);
    let mut engine = Engine::with_connector(&config, Arc::new(FakeConnector)).unwrap();

    let mut pads = lightpad_names(&engine);
    let loads = Arc::new(Mutex::new(Vec::new()));
    let seen_loads = loads.clone();
    engine.add_load_listener(move |load| {
        seen_loads.lock().unwrap().push(load.llid().to_string());
    });

    let report = engine.start().await.unwrap();
    assert_eq!(report.devices, 2);

    let first = tokio::time::timeout(Duration::from_secs(5), pads.recv())
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("A"));
    responder.join().unwrap();

    // A again, this time as a heartbeat, then B for the first time
    let target = heartbeat_target(&engine);
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"PLUM 7 A 8443", target).await.unwrap();
    sender.send_to(b"PLUM 7 B 8443", target).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(5), pads.recv())
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("B"));
    assert!(tokio::time::timeout(Duration::from_millis(200), pads.recv())
        .await
        .is_err());

    assert_eq!(*loads.lock().unwrap(), vec!["L1".to_string()]);
    let load = engine.logical_load("L1").unwrap();
    let members: Vec<String> = load
        .lightpads()
        .iter()
        .map(|pad| pad.lpid().to_string())
        .collect();
    assert_eq!(members, vec!["A", "B"]);
    assert_eq!(load.level(), 128);
    assert_eq!(engine.lightpads().len(), 2);

    engine.shutdown();
}

#[tokio::test]
async fn test_lightpad_is_wired_on_heartbeat_after_await_timeout() {
    // The record for A arrives long after the reconciler gives up on it
    let server = directory_server(&["A"], Duration::from_secs(2)).await;
    let mut engine =
        Engine::with_connector(&config(&server, 9, 0, 1), Arc::new(FakeConnector)).unwrap();
    let mut pads = lightpad_names(&engine);

    engine.start_discovery().await.unwrap();
    let target = heartbeat_target(&engine);
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let (report, _) = tokio::join!(engine.sync_directory(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        sender.send_to(b"PLUM 1 A 8443", target).await.unwrap();
    });
    assert_eq!(report.unwrap().devices, 1);
    assert!(pads.try_recv().is_err());
    assert!(engine.lightpad("A").is_none());

    // The record is known now, so the next heartbeat wires A
    sender.send_to(b"PLUM 2 A 8443", target).await.unwrap();
    let wired = tokio::time::timeout(Duration::from_secs(5), pads.recv())
        .await
        .unwrap();
    assert_eq!(wired.as_deref(), Some("A"));
    assert_eq!(engine.logical_load("L1").unwrap().lightpads().len(), 1);

    engine.shutdown();
}
