use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// The `CURRENT_TIMESTAMP` layout SQLite-backed servers emit.
const SQLITE_TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const SQLITE_TIMESTAMP_SUBSECOND: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");

const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a timestamp as RFC 3339, falling back to the SQLite layout (read as UTC).
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let s = s.trim();
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(datetime) => Ok(datetime),
        Err(err) => PrimitiveDateTime::parse(s, SQLITE_TIMESTAMP)
            .or_else(|_| PrimitiveDateTime::parse(s, SQLITE_TIMESTAMP_SUBSECOND))
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|_| err),
    }
}

/// Deserialize a timestamp string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// Same as the parent module, for fields the server may omit or send as null.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::parse(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }

    pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match datetime {
            Some(datetime) => super::serialize(datetime, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Describe `then` relative to `now` the way the session list shows it.
pub fn relative(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let diff = now - then;
    if diff < Duration::minutes(1) {
        "just now".to_string()
    } else if diff < Duration::hours(1) {
        format!("{} min ago", diff.whole_minutes())
    } else if diff < Duration::days(1) {
        format!("{} h ago", diff.whole_hours())
    } else if diff < Duration::days(7) {
        format!("{} days ago", diff.whole_days())
    } else {
        then.format(DATE_ONLY)
            .unwrap_or_else(|_| then.date().to_string())
    }
}
