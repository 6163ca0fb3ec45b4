//! Records served by the Plum cloud directory.
//!
//! Only the fields the reconciler relies on are typed; everything else the
//! service returns is kept verbatim in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The four record kinds of the directory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum RecordKind {
    #[strum(serialize = "house")]
    House,
    #[strum(serialize = "room")]
    Room,
    #[strum(serialize = "logical load")]
    Load,
    #[strum(serialize = "lightpad")]
    Device,
}

impl RecordKind {
    /// Endpoint name, relative to the directory base URL.
    pub fn endpoint(self) -> &'static str {
        match self {
            RecordKind::House => "getHouse",
            RecordKind::Room => "getRoom",
            RecordKind::Load => "getLogicalLoad",
            RecordKind::Device => "getLightpad",
        }
    }

    /// Name of the id field in the request body.
    pub fn id_field(self) -> &'static str {
        match self {
            RecordKind::House => "hid",
            RecordKind::Room => "rid",
            RecordKind::Load => "llid",
            RecordKind::Device => "lpid",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HouseRecord {
    #[serde(default)]
    pub hid: String,

    #[serde(default)]
    pub house_name: Option<String>,

    /// Seed of the per-device access token
    pub house_access_token: String,

    #[serde(default)]
    pub rids: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HouseRecord {
    /// Token lightpads in this house accept in `X-Plum-House-Access-Token`.
    pub fn device_access_token(&self) -> String {
        derive_access_token(&self.house_access_token)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomRecord {
    #[serde(default)]
    pub rid: String,

    #[serde(default)]
    pub room_name: Option<String>,

    #[serde(default)]
    pub llids: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadRecord {
    #[serde(default)]
    pub llid: String,

    #[serde(default)]
    pub logical_load_name: String,

    /// Member lightpads, in directory order
    #[serde(default)]
    pub lpids: Vec<String>,

    /// Owning room
    #[serde(default)]
    pub rid: Option<String>,

    /// Filled in from the owning room during a directory walk
    #[serde(default)]
    pub room_name: Option<String>,

    /// Filled in from the owning house during a directory walk
    #[serde(default)]
    pub hid: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub lpid: String,

    /// Owning logical load
    #[serde(default)]
    pub llid: String,

    #[serde(default)]
    pub lightpad_name: Option<String>,

    /// Device configuration (glow, colours, ...)
    #[serde(default)]
    pub config: Value,

    /// Derived from the owning house's token during a directory walk
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub hid: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One-way digest of a house access token: lowercase hex SHA-256.
pub fn derive_access_token(house_access_token: &str) -> String {
    hex::encode(Sha256::digest(house_access_token.as_bytes()))
}
