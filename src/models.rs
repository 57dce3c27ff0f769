//! Core data types shared by the ingestion and reconciliation pipelines

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Identifier field in source payloads
pub const SOURCE_ID_FIELD: &str = "uniqueid";

/// Date field embedded in setlist payloads
pub const SHOWDATE_FIELD: &str = "showdate";

/// Year -> set of external ids, built independently per tier.
pub type IdSet = BTreeMap<i32, BTreeSet<String>>;

/// Normalize an identifier value to its string form.
///
/// Numeric and string ids compare equal once normalized (`123` == `"123"`).
/// Null and empty strings count as "no identifier".
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Year prefix of a date-like string (`"2014-07-04"` -> 2014).
pub fn year_from_date(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

/// Walk a dotted field path (`["data", "showdate"]`) through a JSON row.
pub fn lookup_path<'a>(row: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(row, |cur, key| cur.get(key.as_str()))
}

/// A single setlist event with its external id and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub external_id: String,
    pub year: i32,
    /// Original source payload, sent as-is to the ingestion endpoint
    pub payload: Value,
}

impl Record {
    /// Build a record from a source payload whose year is known from the file.
    ///
    /// Returns `Ok(None)` when the payload has no identifier; callers skip
    /// those silently. Non-object payloads and non-scalar ids are malformed.
    pub fn from_source(payload: Value, year: i32) -> Result<Option<Self>> {
        let Some(obj) = payload.as_object() else {
            return Err(SyncError::malformed(format!(
                "expected JSON object, got {}",
                type_name(&payload)
            )));
        };

        let external_id = match obj.get(SOURCE_ID_FIELD) {
            None => return Ok(None),
            Some(v @ (Value::Object(_) | Value::Array(_))) => {
                return Err(SyncError::malformed(format!(
                    "{} must be a string or number, got {}",
                    SOURCE_ID_FIELD,
                    type_name(v)
                )));
            }
            Some(v) => match id_text(v) {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        Ok(Some(Self {
            external_id,
            year,
            payload,
        }))
    }

    /// Structural check applied at the ingestion boundary.
    pub fn validate(&self) -> Result<()> {
        if self.external_id.is_empty() {
            return Err(SyncError::malformed("empty external_id"));
        }
        if !self.payload.is_object() {
            return Err(SyncError::malformed(format!(
                "record {} has a non-object payload",
                self.external_id
            )));
        }
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Group record ids by year.
pub fn id_set_from_records(records: &[Record]) -> IdSet {
    let mut ids = IdSet::new();
    for record in records {
        ids.entry(record.year)
            .or_default()
            .insert(record.external_id.clone());
    }
    ids
}

/// Outcome of one or more ingestion submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub accepted: bool,
    pub new_count: u64,
    pub updated_count: u64,
    /// Per-batch results reported by the endpoint, in submission order
    pub results: Vec<Value>,
}

impl Default for IngestOutcome {
    /// Identity for [`IngestOutcome::absorb`]: accepted, zero counts.
    fn default() -> Self {
        Self {
            accepted: true,
            new_count: 0,
            updated_count: 0,
            results: Vec::new(),
        }
    }
}

impl IngestOutcome {
    /// Fold a later outcome into this one (left-then-right order).
    pub fn absorb(&mut self, other: IngestOutcome) {
        self.accepted = self.accepted && other.accepted;
        self.new_count += other.new_count;
        self.updated_count += other.updated_count;
        self.results.extend(other.results);
    }

    /// Combine two outcomes produced by the halves of a split batch.
    pub fn combine(mut left: IngestOutcome, right: IngestOutcome) -> IngestOutcome {
        left.absorb(right);
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_normalization() {
        assert_eq!(id_text(&json!(123)), Some("123".to_string()));
        assert_eq!(id_text(&json!("123")), Some("123".to_string()));
        assert_eq!(id_text(&json!(null)), None);
        assert_eq!(id_text(&json!("")), None);
    }

    #[test]
    fn test_year_from_date() {
        assert_eq!(year_from_date("2014-07-04"), Some(2014));
        assert_eq!(year_from_date("2014"), Some(2014));
        assert_eq!(year_from_date("201"), None);
        assert_eq!(year_from_date("abcd-01-01"), None);
    }

    #[test]
    fn test_from_source_skips_missing_id() {
        let rec = Record::from_source(json!({"showdate": "2013-01-01"}), 2013).unwrap();
        assert!(rec.is_none());

        let rec = Record::from_source(json!({"uniqueid": null}), 2013).unwrap();
        assert!(rec.is_none());
    }

    #[test]
    fn test_from_source_rejects_malformed() {
        assert!(matches!(
            Record::from_source(json!([1, 2]), 2013),
            Err(SyncError::MalformedRecord { .. })
        ));
        assert!(matches!(
            Record::from_source(json!({"uniqueid": {"nested": 1}}), 2013),
            Err(SyncError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_lookup_path() {
        let row = json!({"external_id": "1", "data": {"showdate": "2012-12-31"}});
        let path = vec!["data".to_string(), "showdate".to_string()];
        assert_eq!(lookup_path(&row, &path), Some(&json!("2012-12-31")));
        assert_eq!(lookup_path(&row, &["missing".to_string()]), None);
    }

    #[test]
    fn test_outcome_combine() {
        let left = IngestOutcome {
            accepted: true,
            new_count: 3,
            updated_count: 1,
            results: vec![json!("a")],
        };
        let right = IngestOutcome {
            accepted: false,
            new_count: 2,
            updated_count: 0,
            results: vec![json!("b")],
        };
        let merged = IngestOutcome::combine(left, right);
        assert!(!merged.accepted);
        assert_eq!(merged.new_count, 5);
        assert_eq!(merged.updated_count, 1);
        assert_eq!(merged.results, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_id_set_groups_by_year() {
        let records = vec![
            Record::from_source(json!({"uniqueid": 1}), 2012).unwrap().unwrap(),
            Record::from_source(json!({"uniqueid": "2"}), 2012).unwrap().unwrap(),
            Record::from_source(json!({"uniqueid": 3}), 2013).unwrap().unwrap(),
        ];
        let ids = id_set_from_records(&records);
        assert_eq!(ids[&2012].len(), 2);
        assert!(ids[&2013].contains("3"));
    }
}
