use serde_json::{Map, Value};

/// A stored record. Records are JSON objects identified by their `id` field.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";

/// Returns the record identifier as a string, whatever JSON scalar it was stored as.
pub fn document_id(doc: &Document) -> Option<String> {
    match doc.get(ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Field is present and not null.
    Exists(String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In(
            ID_FIELD.to_string(),
            ids.into_iter().map(|id| Value::String(id.into())).collect(),
        )
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::In(field, values) => doc
                .get(field)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            Filter::Exists(field) => doc.get(field).map(|v| !v.is_null()).unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Set(String, Value),
    Unset(String),
}

impl Update {
    /// Applies the update, returning whether the document changed.
    pub fn apply(&self, doc: &mut Document) -> bool {
        match self {
            Update::Set(field, value) => {
                if doc.get(field) == Some(value) {
                    return false;
                }
                doc.insert(field.clone(), value.clone());
                true
            }
            Update::Unset(field) => doc.remove(field).is_some(),
        }
    }
}

/// Server-side aggregations the engine relies on.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Left join `local_field` against `foreign_collection.foreign_field` and keep
    /// the rows whose local field is set but matched nothing.
    UnmatchedReferences {
        local_field: String,
        foreign_collection: String,
        foreign_field: String,
    },
    /// Group rows by `field` and emit `{ key, count, ids }` for groups with at
    /// least `min_count` members. Rows without the field are skipped.
    GroupByKey {
        field: String,
        case_insensitive: bool,
        min_count: usize,
    },
}

/// Exact join key for reference matching: the value's JSON text, untrimmed,
/// so `"42"` and `42` stay distinct. `null` references nothing.
pub fn reference_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Normalises a grouping key; non-string scalars group by their JSON text.
pub fn group_key(value: &Value, case_insensitive: bool) -> Option<String> {
    let raw = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if case_insensitive {
        Some(raw.to_lowercase())
    } else {
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn filters_match_by_field() {
        let d = doc(json!({"id": "c1", "name": "Math", "headTeacherId": null}));

        assert!(Filter::All.matches(&d));
        assert!(Filter::eq("name", "Math").matches(&d));
        assert!(!Filter::eq("name", "math").matches(&d));
        assert!(Filter::ids(["c0", "c1"]).matches(&d));
        assert!(!Filter::Exists("headTeacherId".into()).matches(&d));
        assert!(!Filter::And(vec![Filter::All, Filter::eq("id", "c2")]).matches(&d));
    }

    #[test]
    fn unset_reports_change_only_once() {
        let mut d = doc(json!({"id": "c1", "headTeacherId": "u404"}));
        let update = Update::Unset("headTeacherId".into());
        assert!(update.apply(&mut d));
        assert!(!update.apply(&mut d));
        assert!(!d.contains_key("headTeacherId"));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let d = doc(json!({"id": 42}));
        assert_eq!(document_id(&d).as_deref(), Some("42"));
    }

    #[test]
    fn group_key_lowercases_when_requested() {
        assert_eq!(group_key(&json!(" Math "), true).as_deref(), Some("math"));
        assert_eq!(group_key(&json!("Math"), false).as_deref(), Some("Math"));
        assert_eq!(group_key(&Value::Null, true), None);
    }

    #[test]
    fn reference_keys_compare_exactly() {
        assert_ne!(reference_key(&json!("u1 ")), reference_key(&json!("u1")));
        assert_ne!(reference_key(&json!(42)), reference_key(&json!("42")));
        assert_eq!(reference_key(&json!("u1")), reference_key(&json!("u1")));
        assert_eq!(reference_key(&Value::Null), None);
    }
}
