use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::model::Ms;

pub const DAY_MS: Ms = 86_400_000;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date as midnight UTC.
pub fn parse_iso8601(s: &str) -> Result<Ms, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(format!("invalid ISO-8601 timestamp: {s}"))
}

pub fn format_iso8601(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => ms.to_string(),
    }
}

/// Whole nights covered by `duration`, partial nights rounded up.
pub fn nights(duration: Ms) -> u64 {
    if duration <= 0 {
        return 0;
    }
    ((duration + DAY_MS - 1) / DAY_MS) as u64
}

/// `#[serde(with = "crate::time::iso8601")]` for `Ms` fields.
///
/// Values travel as RFC 3339 strings in JSON and in WAL records alike.
pub mod iso8601 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_iso8601(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ms, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_iso8601(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use crate::model::Ms;

        pub fn serialize<S: Serializer>(ms: &Option<Ms>, serializer: S) -> Result<S::Ok, S::Error> {
            match ms {
                Some(ms) => serializer.serialize_some(&super::super::format_iso8601(*ms)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Ms>, D::Error> {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| super::super::parse_iso8601(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_bare_dates() {
        let a = parse_iso8601("2025-01-01T00:00:00Z").unwrap();
        let b = parse_iso8601("2025-01-01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 1_735_689_600_000);
        let offset = parse_iso8601("2025-01-01T02:00:00+02:00").unwrap();
        assert_eq!(offset, a);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_iso8601("next tuesday").is_err());
        assert!(parse_iso8601("2025-13-01").is_err());
    }

    #[test]
    fn format_round_trips_whole_seconds() {
        let ms = parse_iso8601("2025-06-30T14:00:00Z").unwrap();
        assert_eq!(format_iso8601(ms), "2025-06-30T14:00:00Z");
    }

    #[test]
    fn format_keeps_milliseconds() {
        let ms = parse_iso8601("2025-06-30T14:00:00.250Z").unwrap();
        assert_eq!(format_iso8601(ms), "2025-06-30T14:00:00.250Z");
        assert_eq!(parse_iso8601(&format_iso8601(ms)).unwrap(), ms);
    }

    #[test]
    fn nights_round_up() {
        assert_eq!(nights(4 * DAY_MS), 4);
        assert_eq!(nights(4 * DAY_MS + 1), 5);
        assert_eq!(nights(3_600_000), 1);
        assert_eq!(nights(0), 0);
    }
}
