use serde::{Deserialize, Deserializer};

/// Record identifiers are kept as text; the store mixes UUID and BIGINT keys.
pub type RecordId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for RecordId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Deserialize an id column that may arrive as a JSON string or number.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RecordId::from)
}

/// Nullable variant of [`deserialize_id`].
pub fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<RecordId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(RecordId::from))
}

/// Parse an RFC 3339 timestamp, returning `None` for anything unparseable.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    chrono::DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "deserialize_id")]
        id: RecordId,
        #[serde(default, deserialize_with = "deserialize_opt_id")]
        parent: Option<RecordId>,
    }

    #[test]
    fn numeric_and_text_ids_both_become_strings() {
        let a: Row = serde_json::from_str(r#"{"id": 42, "parent": "p-1"}"#).unwrap();
        assert_eq!(a.id, "42");
        assert_eq!(a.parent.as_deref(), Some("p-1"));

        let b: Row = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(b.id, "abc");
        assert!(b.parent.is_none());
    }

    #[test]
    fn null_optional_id_is_none() {
        let row: Row = serde_json::from_str(r#"{"id": 1, "parent": null}"#).unwrap();
        assert!(row.parent.is_none());
    }

    #[test]
    fn parse_timestamp_accepts_offsets_and_rejects_garbage() {
        let ts = parse_timestamp("2026-01-28T18:00:00+08:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-28T10:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
