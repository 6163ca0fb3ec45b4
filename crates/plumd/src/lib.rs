pub mod config;
pub mod control;
pub mod directory;
pub mod discovery;
mod engine;
pub mod error;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EventKind;
pub use engine::EventListener;
pub use engine::Lightpad;
pub use engine::LightpadEvent;
pub use engine::LoadMetrics;
pub use engine::LogicalLoad;
pub use engine::MemberMetrics;
pub use engine::Observers;
pub use engine::Reconciler;
pub use engine::Reconciliation;
pub use error::Error;
pub use error::Result;
