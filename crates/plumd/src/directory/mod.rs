//! Plum cloud directory: houses, rooms, logical loads and lightpads.

mod client;
mod model;
mod registry;

pub use client::DirectoryClient;
pub use client::SyncReport;
pub(crate) use client::PLUM_USER_AGENT;
pub use model::derive_access_token;
pub use model::DeviceRecord;
pub use model::HouseRecord;
pub use model::LoadRecord;
pub use model::RecordKind;
pub use model::RoomRecord;
pub use registry::DirectoryRegistry;
pub use registry::RecordCache;
