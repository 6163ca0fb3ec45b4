mod engine;
mod event;
mod lightpad;
mod load;
mod observer;
mod reconciler;

pub use engine::Engine;
pub use event::EventKind;
pub use event::LightpadEvent;
pub use lightpad::EventListener;
pub use lightpad::Lightpad;
pub use load::LoadMetrics;
pub use load::LogicalLoad;
pub use load::MemberMetrics;
pub use observer::Observers;
pub use reconciler::Reconciler;
pub use reconciler::Reconciliation;
