use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::model::{DeviceRecord, HouseRecord, LoadRecord, RecordKind, RoomRecord};
use super::registry::DirectoryRegistry;
use crate::config::CloudConfig;
use crate::error::{Error, Result};

/// User agent the Plum app sends; the directory rejects unknown clients.
pub(crate) const PLUM_USER_AGENT: &str = "Plum/2.3.0 (iPhone; iOS 9.2.1; Scale/2.00)";

/// Counts from one directory walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub houses: usize,
    pub rooms: usize,
    pub loads: usize,
    pub devices: usize,
    /// Leaf fetches that failed and whose subtree was skipped
    pub skipped: usize,
}

#[derive(Default)]
struct SyncCounters {
    houses: AtomicUsize,
    rooms: AtomicUsize,
    loads: AtomicUsize,
    devices: AtomicUsize,
    skipped: AtomicUsize,
}

impl SyncCounters {
    fn report(&self) -> SyncReport {
        SyncReport {
            houses: self.houses.load(Ordering::Relaxed),
            rooms: self.rooms.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            devices: self.devices.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// House-level facts every record below it is annotated with.
struct HouseContext {
    hid: String,
    access_token: String,
}

/// Client for the Plum cloud directory.
///
/// Fetched records land in the shared [`DirectoryRegistry`]; callers that
/// need a record before the walk reaches it use [`await_device`] /
/// [`await_load`].
///
/// [`await_device`]: DirectoryClient::await_device
/// [`await_load`]: DirectoryClient::await_load
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    registry: Arc<DirectoryRegistry>,
    await_timeout: Duration,
    sync_timeout: Duration,
}

impl DirectoryClient {
    /// Create a client that fills `registry`.
    pub fn new(config: &CloudConfig, registry: Arc<DirectoryRegistry>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(PLUM_USER_AGENT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            registry,
            await_timeout: config.await_timeout(),
            sync_timeout: config.sync_timeout(),
        })
    }

    pub fn registry(&self) -> &Arc<DirectoryRegistry> {
        &self.registry
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn decode<T: DeserializeOwned>(
        context: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::unavailable(context, format!("HTTP {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::unavailable(context, e))
    }

    /// List the ids of every house the account can see.
    pub async fn list_houses(&self) -> Result<Vec<String>> {
        let context = "listing houses";
        let response = self
            .http
            .get(self.url("getHouses"))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::unavailable(context, e))?;

        Self::decode(context, response).await
    }

    /// Fetch a single record of `kind` by id.
    pub async fn fetch<T: DeserializeOwned>(&self, kind: RecordKind, id: &str) -> Result<T> {
        let context = format!("fetching {} {}", kind, id);
        debug!("{}", context);

        let mut body = serde_json::Map::new();
        body.insert(
            kind.id_field().to_string(),
            serde_json::Value::String(id.to_string()),
        );
        let response = self
            .http
            .post(self.url(kind.endpoint()))
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::unavailable(context.as_str(), e))?;

        Self::decode(&context, response).await
    }

    pub async fn fetch_house(&self, hid: &str) -> Result<HouseRecord> {
        let mut house: HouseRecord = self.fetch(RecordKind::House, hid).await?;
        if house.hid.is_empty() {
            house.hid = hid.to_string();
        }
        Ok(house)
    }

    pub async fn fetch_room(&self, rid: &str) -> Result<RoomRecord> {
        let mut room: RoomRecord = self.fetch(RecordKind::Room, rid).await?;
        if room.rid.is_empty() {
            room.rid = rid.to_string();
        }
        Ok(room)
    }

    pub async fn fetch_load(&self, llid: &str) -> Result<LoadRecord> {
        let mut load: LoadRecord = self.fetch(RecordKind::Load, llid).await?;
        if load.llid.is_empty() {
            load.llid = llid.to_string();
        }
        Ok(load)
    }

    pub async fn fetch_device(&self, lpid: &str) -> Result<DeviceRecord> {
        let mut device: DeviceRecord = self.fetch(RecordKind::Device, lpid).await?;
        if device.lpid.is_empty() {
            device.lpid = lpid.to_string();
        }
        Ok(device)
    }

    /// Walk houses → rooms → loads → lightpads, caching every record.
    ///
    /// Siblings are fetched concurrently. A failed house listing aborts the
    /// walk; any other failed fetch is logged and its subtree skipped. The
    /// whole walk is bounded by the configured sync deadline.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        info!("Starting directory sync");
        let counters = SyncCounters::default();

        match tokio::time::timeout(self.sync_timeout, self.walk(&counters)).await {
            Ok(Ok(())) => {
                let report = counters.report();
                info!("Finished directory sync: {:?}", report);
                Ok(report)
            }
            Ok(Err(e)) => {
                error!("Directory sync failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Directory sync overran {:?}; partial results: {:?}",
                    self.sync_timeout,
                    counters.report()
                );
                Err(Error::SyncTimeout(self.sync_timeout))
            }
        }
    }

    async fn walk(&self, counters: &SyncCounters) -> Result<()> {
        let houses = self.list_houses().await?;
        debug!("Directory lists {} house(s)", houses.len());

        join_all(houses.iter().map(|hid| self.sync_house(hid, counters))).await;
        Ok(())
    }

    async fn sync_house(&self, hid: &str, counters: &SyncCounters) {
        let house = match self.fetch_house(hid).await {
            Ok(house) => house,
            Err(e) => {
                warn!("Skipping house {}: {}", hid, e);
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let ctx = HouseContext {
            hid: hid.to_string(),
            access_token: house.device_access_token(),
        };
        let house = self.registry.houses().insert(hid, house);
        counters.houses.fetch_add(1, Ordering::Relaxed);

        join_all(
            house
                .rids
                .iter()
                .map(|rid| self.sync_room(&ctx, rid, counters)),
        )
        .await;
    }

    async fn sync_room(&self, ctx: &HouseContext, rid: &str, counters: &SyncCounters) {
        let room = match self.fetch_room(rid).await {
            Ok(room) => room,
            Err(e) => {
                warn!("Skipping room {}: {}", rid, e);
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let room = self.registry.rooms().insert(rid, room);
        counters.rooms.fetch_add(1, Ordering::Relaxed);

        join_all(
            room.llids
                .iter()
                .map(|llid| self.sync_load(ctx, &room, llid, counters)),
        )
        .await;
    }

    async fn sync_load(
        &self,
        ctx: &HouseContext,
        room: &RoomRecord,
        llid: &str,
        counters: &SyncCounters,
    ) {
        let mut load = match self.fetch_load(llid).await {
            Ok(load) => load,
            Err(e) => {
                warn!("Skipping logical load {}: {}", llid, e);
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        load.rid.get_or_insert_with(|| room.rid.clone());
        load.room_name = room.room_name.clone();
        load.hid = Some(ctx.hid.clone());

        let load = self.registry.loads().insert(llid, load);
        counters.loads.fetch_add(1, Ordering::Relaxed);

        join_all(
            load.lpids
                .iter()
                .map(|lpid| self.sync_device(ctx, llid, lpid, counters)),
        )
        .await;
    }

    async fn sync_device(
        &self,
        ctx: &HouseContext,
        llid: &str,
        lpid: &str,
        counters: &SyncCounters,
    ) {
        let mut device = match self.fetch_device(lpid).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Skipping lightpad {}: {}", lpid, e);
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if device.llid.is_empty() {
            device.llid = llid.to_string();
        }
        device.access_token = Some(ctx.access_token.clone());
        device.hid = Some(ctx.hid.clone());

        self.registry.devices().insert(lpid, device);
        counters.devices.fetch_add(1, Ordering::Relaxed);
    }

    /// Wait for the lightpad record `lpid` to arrive.
    pub async fn await_device(&self, lpid: &str) -> Result<Arc<DeviceRecord>> {
        self.registry.devices().wait(lpid, self.await_timeout).await
    }

    /// Wait for the logical load record `llid` to arrive.
    pub async fn await_load(&self, llid: &str) -> Result<Arc<LoadRecord>> {
        self.registry.loads().wait(llid, self.await_timeout).await
    }
}
