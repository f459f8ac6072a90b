//! Stream entries and cursors.

use std::collections::HashMap;
use std::fmt;

/// One entry read from a stream: the store-assigned ID plus a flat string
/// field map, exactly as the store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned entry ID, `<ms>-<seq>`.
    pub id: String,
    /// Flat field map.
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    /// Build an entry from an ID and field pairs.
    pub fn new(id: impl Into<String>, pairs: &[(String, String)]) -> Self {
        Self {
            id: id.into(),
            fields: pairs.iter().cloned().collect(),
        }
    }

    /// Look up a field by name.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Position within one stream.
///
/// Entry IDs are `<ms>-<seq>` pairs ordered numerically. A consumer holds
/// exactly one cursor per stream it tails; reads return entries strictly
/// after the cursor, and [`StreamCursor::advance_to`] only ever moves it to
/// an ID the store just handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCursor(String);

impl StreamCursor {
    /// Cursor at an explicit position (`"0-0"` for the stream head, `"$"`
    /// for the current tail).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw position string handed to the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Move the cursor to the given entry ID.
    pub fn advance_to(&mut self, id: &str) {
        self.0 = id.to_string();
    }
}

impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a `<ms>-<seq>` entry ID into its numeric parts.
///
/// Returns `None` for the special positions (`"$"`) and anything else that
/// is not a well-formed ID.
pub fn parse_entry_id(id: &str) -> Option<(u64, u64)> {
    let (ms, seq) = id.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_field_lookup() {
        let entry = StreamEntry::new(
            "1-0",
            &[("deviceId".to_string(), "T1".to_string())],
        );
        assert_eq!(entry.field("deviceId"), Some("T1"));
        assert_eq!(entry.field("missing"), None);
    }

    #[test]
    fn cursor_advances() {
        let mut cursor = StreamCursor::new("0-0");
        cursor.advance_to("1719933000000-3");
        assert_eq!(cursor.as_str(), "1719933000000-3");
    }

    #[test]
    fn parses_well_formed_ids() {
        assert_eq!(parse_entry_id("1719933000000-3"), Some((1_719_933_000_000, 3)));
        assert_eq!(parse_entry_id("0-0"), Some((0, 0)));
    }

    #[test]
    fn rejects_special_and_malformed_ids() {
        assert_eq!(parse_entry_id("$"), None);
        assert_eq!(parse_entry_id("123"), None);
        assert_eq!(parse_entry_id("a-b"), None);
    }
}
