//! APRS frame recognition (C6): a UI frame whose destination sits in a
//! known APRS set and whose payload starts with a data-type identifier
//! byte.

use bytes::Bytes;

use crate::ax25::Frame;
use crate::callsign::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Position,
    Status,
    Message,
    Object,
    Item,
    MicE,
    Telemetry,
    Weather,
    UserDefined,
    ThirdParty,
    Invalid,
}

impl DataType {
    pub fn from_first_byte(byte: Option<u8>) -> Self {
        match byte {
            Some(b'!') | Some(b'=') | Some(b'/') | Some(b'@') => DataType::Position,
            Some(b'>') => DataType::Status,
            Some(b':') => DataType::Message,
            Some(b';') => DataType::Object,
            Some(b')') => DataType::Item,
            Some(b'`') | Some(b'\'') => DataType::MicE,
            Some(b'T') => DataType::Telemetry,
            Some(b'_') => DataType::Weather,
            Some(b'{') => DataType::UserDefined,
            Some(b'}') => DataType::ThirdParty,
            _ => DataType::Invalid,
        }
    }
}

/// An AX.25 UI frame recognized as carrying an APRS payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AprsFrame {
    pub path: Path,
    pub data_type: DataType,
    pub payload: Bytes,
}

impl AprsFrame {
    /// Recognizes `frame` as APRS if it's a UI frame whose destination
    /// base callsign is in `aprs_destinations` (the configured
    /// `aprs_destination` plus any `listen_destinations`/`listen_altnets`
    /// entries).
    pub fn recognize(frame: &Frame, aprs_destinations: &[String]) -> Option<Self> {
        let Frame::Ui { path, payload, .. } = frame else {
            return None;
        };
        let dest_base = path.destination.base();
        if !aprs_destinations.iter().any(|d| d == dest_base) {
            return None;
        }
        Some(AprsFrame {
            path: path.clone(),
            data_type: DataType::from_first_byte(payload.first().copied()),
            payload: payload.clone(),
        })
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsign::Callsign;

    fn ui(dest: &str, payload: &[u8]) -> Frame {
        Frame::Ui {
            path: Path::new(Callsign::new(dest, 0), Callsign::new("N0CALL", 5)),
            pf: false,
            pid: 0xF0,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn recognizes_configured_destinations_only() {
        let destinations = vec!["APRS".to_string(), "APZAIO".to_string()];
        assert!(AprsFrame::recognize(&ui("APRS", b"!"), &destinations).is_some());
        assert!(AprsFrame::recognize(&ui("OTHER", b"!"), &destinations).is_none());
    }

    #[test]
    fn data_type_detection_matches_first_byte() {
        let destinations = vec!["APRS".to_string()];
        let cases: &[(&[u8], DataType)] = &[
            (b"!4903.50N/07201.75W>", DataType::Position),
            (b"=4903.50N/07201.75W>", DataType::Position),
            (b">Status text", DataType::Status),
            (b":N0CALL   :Hello", DataType::Message),
            (b";Object   *", DataType::Object),
            (b")Item!", DataType::Item),
            (b"`MicE data", DataType::MicE),
            (b"T#001,123,456", DataType::Telemetry),
            (b"_weather", DataType::Weather),
            (b"{user", DataType::UserDefined),
            (b"}third", DataType::ThirdParty),
            (b"", DataType::Invalid),
        ];
        for (payload, expected) in cases {
            let frame = AprsFrame::recognize(&ui("APRS", payload), &destinations).unwrap();
            assert_eq!(frame.data_type, *expected, "payload {payload:?}");
        }
    }
}
