use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::{debug, info};

use super::event::{EventKind, LightpadEvent};
use super::lightpad::{EventListener, Lightpad};
use crate::control::MetricsReport;
use crate::directory::LoadRecord;
use crate::error::{Error, Result};

/// Snapshot of one member's contribution to a load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberMetrics {
    pub lpid: String,
    pub level: u8,
    pub power: f64,
}

/// Snapshot of a load's aggregated metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadMetrics {
    pub level: u8,
    /// Sum of member power
    pub power: f64,
    pub lightpads: Vec<MemberMetrics>,
}

/// A value with the sequence number of the update that wrote it.
#[derive(Debug, Clone, Copy, Default)]
struct Stamped<T> {
    value: T,
    seq: u64,
}

impl<T> Stamped<T> {
    /// Take a fetched value unless an event wrote this field after the
    /// fetch began.
    fn refresh(&mut self, value: T, fetch_started: u64) {
        if self.seq <= fetch_started {
            self.value = value;
            self.seq = fetch_started;
        }
    }
}

#[derive(Debug)]
struct MemberState {
    lpid: String,
    level: Stamped<u8>,
    power: Stamped<f64>,
}

impl MemberState {
    fn new(lpid: &str) -> Self {
        Self {
            lpid: lpid.to_string(),
            level: Stamped::default(),
            power: Stamped::default(),
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    /// Bumped by every pushed event
    seq: u64,
    seeded: bool,
    level: Stamped<u8>,
    members: Vec<MemberState>,
}

impl MetricsState {
    fn member_mut(&mut self, lpid: &str) -> Option<&mut MemberState> {
        self.members.iter_mut().find(|m| m.lpid == lpid)
    }

    fn ensure_member(&mut self, lpid: &str) -> &mut MemberState {
        match self.members.iter().position(|m| m.lpid == lpid) {
            Some(i) => &mut self.members[i],
            None => {
                self.members.push(MemberState::new(lpid));
                let last = self.members.len() - 1;
                &mut self.members[last]
            }
        }
    }

    fn snapshot(&self) -> LoadMetrics {
        LoadMetrics {
            level: self.level.value,
            power: self.members.iter().map(|m| m.power.value).sum(),
            lightpads: self
                .members
                .iter()
                .map(|m| MemberMetrics {
                    lpid: m.lpid.clone(),
                    level: m.level.value,
                    power: m.power.value,
                })
                .collect(),
        }
    }
}

/// The set of lightpads controlling the same electrical output.
///
/// Member events keep the cached metrics current; [`LogicalLoad::refresh_metrics`]
/// seeds them from the device. Commands go through the primary member, the
/// first lightpad added.
pub struct LogicalLoad {
    llid: String,
    name: String,
    rid: Option<String>,
    room_name: Option<String>,
    lpids: Vec<String>,
    members: Mutex<Vec<Arc<Lightpad>>>,
    listeners: Mutex<Vec<(EventKind, EventListener)>>,
    metrics: Mutex<MetricsState>,
}

impl LogicalLoad {
    pub fn from_record(record: &LoadRecord) -> Arc<Self> {
        Arc::new(Self {
            llid: record.llid.clone(),
            name: record.logical_load_name.clone(),
            rid: record.rid.clone(),
            room_name: record.room_name.clone(),
            lpids: record.lpids.clone(),
            members: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            metrics: Mutex::new(MetricsState::default()),
        })
    }

    pub fn llid(&self) -> &str {
        &self.llid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rid(&self) -> Option<&str> {
        self.rid.as_deref()
    }

    pub fn room_name(&self) -> Option<&str> {
        self.room_name.as_deref()
    }

    /// Member ids as listed by the directory, discovered or not.
    pub fn lpids(&self) -> &[String] {
        &self.lpids
    }

    /// Members wired so far, in the order they were added.
    pub fn lightpads(&self) -> Vec<Arc<Lightpad>> {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn primary_lightpad(&self) -> Option<Arc<Lightpad>> {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()
    }

    /// Whether the primary lightpad's glow ring is enabled.
    pub fn dimmable(&self) -> bool {
        self.primary_lightpad()
            .is_some_and(|pad| pad.glow_enabled())
    }

    /// Add `lightpad` as a member and subscribe to its power and dimmer
    /// events. Returns false if it was already a member.
    pub fn add_member(self: &Arc<Self>, lightpad: Arc<Lightpad>) -> bool {
        {
            let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
            if members.iter().any(|m| m.lpid() == lightpad.lpid()) {
                debug!("Lightpad {} already wired to load {}", lightpad.lpid(), self.llid);
                return false;
            }
            members.push(lightpad.clone());
        }

        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ensure_member(lightpad.lpid());

        let weak: Weak<Self> = Arc::downgrade(self);
        lightpad.add_event_listener(EventKind::Power, move |event| {
            if let (Some(load), LightpadEvent::Power { lpid, watts }) = (weak.upgrade(), event) {
                load.on_power_event(lpid, *watts);
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        lightpad.add_event_listener(EventKind::DimmerChange, move |event| {
            if let (Some(load), LightpadEvent::DimmerChange { lpid, level }) =
                (weak.upgrade(), event)
            {
                load.on_dimmerchange_event(lpid, *level);
            }
        });

        // Listeners registered on the load before this member arrived
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (kind, listener) in listeners {
            lightpad.add_shared_listener(kind, listener);
        }

        info!("Lightpad {} joined load {} ({})", lightpad.lpid(), self.name, self.llid);
        true
    }

    /// Subscribe to `kind` events from every member, present and future.
    pub fn add_event_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(&LightpadEvent) + Send + Sync + 'static,
    ) {
        let listener: EventListener = Arc::new(listener);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, listener.clone()));

        for member in self.lightpads() {
            member.add_shared_listener(kind, listener.clone());
        }
    }

    /// Record the latest power draw of member `lpid`.
    pub fn on_power_event(&self, lpid: &str, watts: f64) {
        let mut state = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        state.seq += 1;
        let seq = state.seq;
        match state.member_mut(lpid) {
            Some(member) => member.power = Stamped { value: watts, seq },
            None => debug!("Power event for {} which is not in load {}", lpid, self.llid),
        }
    }

    /// Record a dimmer move reported by member `lpid`.
    ///
    /// All members of a load share one output, so the load level follows.
    pub fn on_dimmerchange_event(&self, lpid: &str, level: u8) {
        let mut state = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        state.seq += 1;
        let seq = state.seq;
        // Every member follows the same dimmer, so the level holds either way
        state.level = Stamped { value: level, seq };
        match state.member_mut(lpid) {
            Some(member) => member.level = Stamped { value: level, seq },
            None => debug!("Dimmer event for {} which is not in load {}", lpid, self.llid),
        }
    }

    /// Latest metrics, or `None` until the first successful refresh.
    pub fn metrics(&self) -> Option<LoadMetrics> {
        let state = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        state.seeded.then(|| state.snapshot())
    }

    /// Current level; 0 until seeded
    pub fn level(&self) -> u8 {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .level
            .value
    }

    /// Current total power draw; 0 until seeded
    pub fn power(&self) -> f64 {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
            .power
    }

    /// Fetch metrics through the primary lightpad and merge them in.
    ///
    /// Fields an event updated while the fetch was in flight keep the
    /// event's value.
    pub async fn refresh_metrics(&self) -> Result<LoadMetrics> {
        let primary = self.primary()?;
        let started = self.metrics.lock().unwrap_or_else(|e| e.into_inner()).seq;

        let report = primary.control().get_metrics(&self.llid).await?;

        let mut state = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        Self::merge_report(&mut state, &report, started);
        state.seeded = true;
        debug!("Load {} metrics: level {} power {}", self.llid, state.level.value, report.power());
        Ok(state.snapshot())
    }

    fn merge_report(state: &mut MetricsState, report: &MetricsReport, started: u64) {
        state.level.refresh(report.level(), started);
        for entry in &report.lightpad_metrics {
            let member = state.ensure_member(&entry.lpid);
            member.level.refresh(entry.level, started);
            member.power.refresh(entry.power, started);
        }
    }

    fn primary(&self) -> Result<Arc<Lightpad>> {
        self.primary_lightpad()
            .ok_or_else(|| Error::NoMembers(self.llid.clone()))
    }

    /// Set the load's level (0-255) through the primary lightpad.
    pub async fn set_level(&self, level: u8) -> Result<()> {
        let primary = self.primary()?;
        info!("Setting load {} to {} via {}", self.llid, level, primary.lpid());
        primary.control().set_level(&self.llid, level).await
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.set_level(255).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_level(0).await
    }
}

impl std::fmt::Debug for LogicalLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalLoad")
            .field("llid", &self.llid)
            .field("name", &self.name)
            .field("room_name", &self.room_name)
            .field("lpids", &self.lpids)
            .finish_non_exhaustive()
    }
}
