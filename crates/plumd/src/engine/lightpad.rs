use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use super::event::{EventKind, LightpadEvent};
use crate::control::{ControlChannel, LightpadMetrics};
use crate::directory::DeviceRecord;
use crate::discovery::DiscoveredDevice;
use crate::error::Result;

/// Callback invoked for each event of the kind it was registered for.
pub type EventListener = Arc<dyn Fn(&LightpadEvent) + Send + Sync>;

/// A physical wall switch, live on the local network.
pub struct Lightpad {
    lpid: String,
    llid: String,
    name: Option<String>,
    address: SocketAddr,
    control: Arc<dyn ControlChannel>,
    config: Mutex<Value>,
    listeners: Mutex<HashMap<EventKind, Vec<EventListener>>>,
}

impl Lightpad {
    pub fn new(
        device: &DiscoveredDevice,
        record: &DeviceRecord,
        control: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            lpid: device.lpid.clone(),
            llid: record.llid.clone(),
            name: record.lightpad_name.clone(),
            address: device.address,
            control,
            config: Mutex::new(record.config.clone()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn lpid(&self) -> &str {
        &self.lpid
    }

    /// Owning logical load
    pub fn llid(&self) -> &str {
        &self.llid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn control(&self) -> &Arc<dyn ControlChannel> {
        &self.control
    }

    /// Current configuration, including changes pushed by the device.
    pub fn config(&self) -> Value {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn glow_enabled(&self) -> bool {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get("glowEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn add_event_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(&LightpadEvent) + Send + Sync + 'static,
    ) {
        self.add_shared_listener(kind, Arc::new(listener));
    }

    pub(crate) fn add_shared_listener(&self, kind: EventKind, listener: EventListener) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(listener);
    }

    /// Deliver `event` to every listener registered for its kind.
    ///
    /// Config changes are merged into [`Lightpad::config`] before listeners run.
    pub fn dispatch(&self, event: &LightpadEvent) {
        if let LightpadEvent::ConfigChange { changes, .. } = event {
            merge_config(&mut self.config.lock().unwrap_or_else(|e| e.into_inner()), changes);
        }

        // Listeners may register further listeners; call them unlocked
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!("No listeners for {} event on {}", event.kind(), self.lpid);
        }

        for listener in listeners {
            listener(event);
        }
    }

    /// Level and power of this lightpad, taken from its load's metrics.
    pub async fn metrics(&self) -> Result<Option<LightpadMetrics>> {
        let report = self.control.get_metrics(&self.llid).await?;
        Ok(report
            .lightpad_metrics
            .into_iter()
            .find(|m| m.lpid == self.lpid))
    }

    pub async fn set_config(&self, patch: Value) -> Result<()> {
        self.control.set_config(&self.llid, patch.clone()).await?;
        merge_config(&mut self.config.lock().unwrap_or_else(|e| e.into_inner()), &patch);
        Ok(())
    }

    pub async fn set_glow(&self, enabled: bool) -> Result<()> {
        self.set_config(serde_json::json!({ "glowEnabled": enabled }))
            .await
    }
}

impl std::fmt::Debug for Lightpad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lightpad")
            .field("lpid", &self.lpid)
            .field("llid", &self.llid)
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn merge_config(config: &mut Value, changes: &Value) {
    match (config, changes) {
        (Value::Object(config), Value::Object(changes)) => {
            for (key, value) in changes {
                config.insert(key.clone(), value.clone());
            }
        }
        (config, changes) if !changes.is_null() => *config = changes.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::control::mock::MockControl;

    fn lightpad(control: Arc<MockControl>) -> Lightpad {
        let device = DiscoveredDevice {
            lpid: "lp-1".to_string(),
            address: "10.0.0.5:8443".parse().unwrap(),
        };
        let record: DeviceRecord = serde_json::from_value(serde_json::json!({
            "lpid": "lp-1",
            "llid": "ll-1",
            "lightpad_name": "Hall",
            "config": {"glowEnabled": true, "glowIntensity": 0.5}
        }))
        .unwrap();
        Lightpad::new(&device, &record, control)
    }

    #[test]
    fn test_listeners_receive_matching_kind_only() {
        let pad = lightpad(Arc::new(MockControl::new("lp-1")));
        let power = Arc::new(AtomicUsize::new(0));

        let counter = power.clone();
        pad.add_event_listener(EventKind::Power, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        pad.dispatch(&LightpadEvent::Power {
            lpid: "lp-1".to_string(),
            watts: 3.0,
        });
        pad.dispatch(&LightpadEvent::DimmerChange {
            lpid: "lp-1".to_string(),
            level: 10,
        });

        assert_eq!(power.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_change_merges_before_listeners() {
        let pad = Arc::new(lightpad(Arc::new(MockControl::new("lp-1"))));
        let seen_glow = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&pad);
        let seen = seen_glow.clone();
        pad.add_event_listener(EventKind::ConfigChange, move |_| {
            if let Some(pad) = weak.upgrade() {
                *seen.lock().unwrap() = Some(pad.glow_enabled());
            }
        });

        pad.dispatch(&LightpadEvent::ConfigChange {
            lpid: "lp-1".to_string(),
            changes: serde_json::json!({"glowEnabled": false}),
        });

        assert_eq!(*seen_glow.lock().unwrap(), Some(false));
        assert_eq!(pad.config()["glowIntensity"], 0.5);
    }

    #[tokio::test]
    async fn test_set_glow_patches_config() {
        let control = Arc::new(MockControl::new("lp-1"));
        let pad = lightpad(control.clone());

        pad.set_glow(false).await.unwrap();

        assert!(!pad.glow_enabled());
        assert_eq!(
            *control.configs.lock().unwrap(),
            vec![serde_json::json!({"glowEnabled": false})]
        );
    }

    #[tokio::test]
    async fn test_metrics_picks_own_entry() {
        let control = Arc::new(
            MockControl::new("lp-1").with_metrics(&[("lp-0", 0, 1.0), ("lp-1", 90, 7.5)]),
        );
        let pad = lightpad(control);

        let metrics = pad.metrics().await.unwrap().unwrap();
        assert_eq!(metrics.level, 90);
        assert_eq!(metrics.power, 7.5);
    }
}
