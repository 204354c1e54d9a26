//! ISO-8601 timestamp handling for manifest fields.
//!
//! Manifests store UTC-naive timestamps with microsecond precision.
//! Parsing accepts the fractional seconds as optional, since older
//! manifests omit them.

use chrono::NaiveDateTime;
use serde::{self, Deserialize, Deserializer, Serializer};

const EMIT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Format a timestamp the way manifests store it.
pub fn format_iso(t: &NaiveDateTime) -> String {
    t.format(EMIT_FORMAT).to_string()
}

/// Parse an ISO-8601 timestamp, with or without fractional seconds.
pub fn parse_iso(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
}

pub fn serialize<S>(t: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_iso(t))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_iso(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_fraction() {
        let a = parse_iso("2015-01-01T00:00:00.0").unwrap();
        let b = parse_iso("2015-01-01T00:00:00").unwrap();
        assert_eq!(a, b);

        let c = parse_iso("2015-06-30T23:59:59.123456").unwrap();
        assert_eq!(format_iso(&c), "2015-06-30T23:59:59.123456");
    }

    #[test]
    fn emits_microseconds() {
        let t = parse_iso("2015-01-01T00:00:00").unwrap();
        assert_eq!(format_iso(&t), "2015-01-01T00:00:00.000000");
    }
}
