//! Attendance records sent to the remote spreadsheet.
//!
//! A record is the identifier of one scan plus the session context it was
//! taken in. Records are immutable once built and serialize to the exact JSON
//! body the endpoint expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

/// Attendance mode used when none is selected.
pub const DEFAULT_MODE: &str = "auto";

/// Source tag identifying records produced by this client.
pub const SOURCE_TAG: &str = "pwa";

/// One attendance event.
///
/// Identifier fields serialize under the spreadsheet's column names
/// (`codigo`, `nombre`, `documento`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Student code.
    #[serde(rename = "codigo")]
    pub code: String,

    /// Student name.
    #[serde(rename = "nombre")]
    pub name: String,

    /// Identity document number.
    #[serde(rename = "documento")]
    pub document: String,

    /// Attendance mode (`auto`, or an operator choice such as `entrada`).
    pub mode: String,

    /// Lab the kiosk is installed in.
    pub lab: String,

    /// When the scan happened according to the kiosk clock. Advisory only;
    /// the remote side assigns the authoritative time.
    #[serde(with = "client_ts")]
    pub client_ts: DateTime<Utc>,

    /// Client tag, always [`SOURCE_TAG`] for records built here.
    pub source: String,
}

impl AttendanceRecord {
    /// Build a record stamped with the current time.
    ///
    /// Blank `mode` falls back to [`DEFAULT_MODE`], blank `lab` to empty.
    #[must_use]
    pub fn build(identifier: &Identifier, mode: Option<&str>, lab: Option<&str>) -> Self {
        Self::build_at(identifier, mode, lab, Utc::now())
    }

    /// Build a record with an explicit timestamp.
    #[must_use]
    pub fn build_at(
        identifier: &Identifier,
        mode: Option<&str>,
        lab: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let mode = mode.map(str::trim).filter(|m| !m.is_empty());
        Self {
            code: identifier.code.trim().to_string(),
            name: identifier.name.trim().to_string(),
            document: identifier.document.trim().to_string(),
            mode: mode.unwrap_or(DEFAULT_MODE).to_string(),
            lab: lab.map(str::trim).unwrap_or_default().to_string(),
            client_ts: now,
            source: SOURCE_TAG.to_string(),
        }
    }

    /// Serialize the record to the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// RFC 3339 timestamps with millisecond precision and a `Z` suffix.
mod client_ts {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 0).unwrap()
    }

    fn student() -> Identifier {
        Identifier {
            code: " 202367506 ".to_string(),
            name: "Juan Camilo ".to_string(),
            document: "1006327468\n".to_string(),
        }
    }

    #[test]
    fn test_build_trims_fields() {
        let record = AttendanceRecord::build_at(&student(), Some(" entrada "), Some(" L2 "), fixed_time());

        assert_eq!(record.code, "202367506");
        assert_eq!(record.name, "Juan Camilo");
        assert_eq!(record.document, "1006327468");
        assert_eq!(record.mode, "entrada");
        assert_eq!(record.lab, "L2");
        assert_eq!(record.source, "pwa");
        assert_eq!(record.client_ts, fixed_time());
    }

    #[test]
    fn test_build_defaults() {
        let record = AttendanceRecord::build_at(&student(), None, None, fixed_time());
        assert_eq!(record.mode, "auto");
        assert_eq!(record.lab, "");

        let record = AttendanceRecord::build_at(&student(), Some("  "), Some(""), fixed_time());
        assert_eq!(record.mode, "auto");
        assert_eq!(record.lab, "");
    }

    #[test]
    fn test_build_stamps_now() {
        let before = Utc::now();
        let record = AttendanceRecord::build(&student(), None, None);
        assert!(record.client_ts >= before);
        assert!(record.client_ts <= Utc::now());
    }

    #[test]
    fn test_wire_format() {
        let record = AttendanceRecord::build_at(&student(), Some("salida"), Some("L1"), fixed_time());
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "codigo": "202367506",
                "nombre": "Juan Camilo",
                "documento": "1006327468",
                "mode": "salida",
                "lab": "L1",
                "client_ts": "2026-10-19T08:15:00.000Z",
                "source": "pwa"
            })
        );
    }

    #[test]
    fn test_client_ts_survives_storage() {
        let ts = Utc.timestamp_millis_opt(1_792_400_000_123).unwrap();
        let record = AttendanceRecord::build_at(&student(), None, None, ts);

        let restored: AttendanceRecord = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let json = r#"{"codigo":"1","nombre":"","documento":"","mode":"auto","lab":"","client_ts":"yesterday","source":"pwa"}"#;
        assert!(serde_json::from_str::<AttendanceRecord>(json).is_err());
    }
}
