use serde::Deserialize;
use serde_json::Value;

/// Event pushed by a lightpad, stamped with the lightpad it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum LightpadEvent {
    /// Instantaneous power draw of the lightpad's load output
    Power { lpid: String, watts: f64 },
    /// The dimmer moved, from the wall or by command
    DimmerChange { lpid: String, level: u8 },
    /// A subset of the device configuration changed
    ConfigChange { lpid: String, changes: Value },
}

/// Listener key for [`LightpadEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum EventKind {
    #[strum(serialize = "power")]
    Power,
    #[strum(serialize = "dimmerchange")]
    DimmerChange,
    #[strum(serialize = "configchange")]
    ConfigChange,
}

/// Event as it appears on the device stream, before the lpid is attached.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "power")]
    Power { watts: f64 },
    #[serde(rename = "dimmerchange")]
    DimmerChange { level: u8 },
    #[serde(rename = "configchange", alias = "config-change")]
    ConfigChange {
        #[serde(default)]
        changes: Value,
    },
    #[serde(other)]
    Other,
}

impl LightpadEvent {
    /// Decode one line of a lightpad's event stream.
    ///
    /// Unknown event types and undecodable lines yield `None`.
    pub fn from_json_line(line: &str, lpid: &str) -> Option<Self> {
        let lpid = lpid.to_string();
        match serde_json::from_str::<WireEvent>(line.trim()).ok()? {
            WireEvent::Power { watts } => Some(Self::Power { lpid, watts }),
            WireEvent::DimmerChange { level } => Some(Self::DimmerChange { lpid, level }),
            WireEvent::ConfigChange { changes } => Some(Self::ConfigChange { lpid, changes }),
            WireEvent::Other => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Power { .. } => EventKind::Power,
            Self::DimmerChange { .. } => EventKind::DimmerChange,
            Self::ConfigChange { .. } => EventKind::ConfigChange,
        }
    }

    pub fn lpid(&self) -> &str {
        match self {
            Self::Power { lpid, .. }
            | Self::DimmerChange { lpid, .. }
            | Self::ConfigChange { lpid, .. } => lpid,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_decode_stream_lines() {
        assert_eq!(
            LightpadEvent::from_json_line(r#"{"type":"power","watts":12.5}"#, "lp-1"),
            Some(LightpadEvent::Power {
                lpid: "lp-1".to_string(),
                watts: 12.5
            })
        );
        assert_eq!(
            LightpadEvent::from_json_line("{\"type\":\"dimmerchange\",\"level\":128}\r\n", "lp-1"),
            Some(LightpadEvent::DimmerChange {
                lpid: "lp-1".to_string(),
                level: 128
            })
        );

        let change = LightpadEvent::from_json_line(
            r#"{"type":"configchange","changes":{"glowEnabled":false}}"#,
            "lp-1",
        )
        .unwrap();
        assert_eq!(change.kind(), EventKind::ConfigChange);
        assert_eq!(change.lpid(), "lp-1");
    }

    #[test]
    fn test_unknown_and_malformed_lines_are_dropped() {
        assert_eq!(
            LightpadEvent::from_json_line(r#"{"type":"pirSignal","signal":[1,2]}"#, "lp-1"),
            None
        );
        assert_eq!(LightpadEvent::from_json_line("not json", "lp-1"), None);
        assert_eq!(LightpadEvent::from_json_line(r#"{"type":"power"}"#, "lp-1"), None);
        assert_eq!(LightpadEvent::from_json_line("", "lp-1"), None);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::DimmerChange.to_string(), "dimmerchange");
        assert_eq!(EventKind::from_str("power").unwrap(), EventKind::Power);
        assert!(EventKind::from_str("motion").is_err());
    }
}
