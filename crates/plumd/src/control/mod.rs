//! Talking to lightpads directly: commands over HTTPS and the pushed
//! event stream.

mod channel;
mod stream;

pub use channel::ControlChannel;
pub use channel::Connector;
pub use channel::HttpsConnector;
pub use channel::HttpsControl;
pub use channel::LightpadMetrics;
pub use channel::MetricsReport;
pub use stream::read_events;
pub use stream::spawn_event_stream;

#[cfg(test)]
pub(crate) use channel::mock;
