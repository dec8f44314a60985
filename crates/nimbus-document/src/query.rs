//! Nimbus Query - Predicate Matcher
//!
//! Operator-tagged predicate expressions evaluated against single
//! documents. Queries arrive as JSON mappings (`{age: {"$gt": 26}}`) and
//! parse into a closed filter enumeration; unknown operators and
//! malformed shapes are rejected at parse time. Evaluation never fails:
//! type mismatches and missing fields fold into boolean falsity.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use crate::types::{compare_values, values_equal, Document, Value};
use nimbus_common::{NimbusError, Result};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

// =============================================================================
// Filter
// =============================================================================

/// A single parsed filter condition.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, exists: bool },
    Regex { field: String, regex: Regex },
    Like { field: String, needle: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
}

impl Filter {
    /// Check if a document matches this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq { field, value } => doc
                .get(field)
                .map(|dv| values_equal(dv, value))
                .unwrap_or(false),
            Self::Ne { field, value } => !doc
                .get(field)
                .map(|dv| values_equal(dv, value))
                .unwrap_or(false),
            Self::Gt { field, value } => ordered(doc, field, value, |o| o == Ordering::Greater),
            Self::Gte { field, value } => ordered(doc, field, value, |o| o != Ordering::Less),
            Self::Lt { field, value } => ordered(doc, field, value, |o| o == Ordering::Less),
            Self::Lte { field, value } => ordered(doc, field, value, |o| o != Ordering::Greater),
            Self::In { field, values } => in_list(doc.get(field), values),
            Self::Nin { field, values } => !in_list(doc.get(field), values),
            Self::Exists { field, exists } => doc.contains(field) == *exists,
            Self::Regex { field, regex } => doc
                .get(field)
                .and_then(Value::as_str)
                .map(|s| regex.is_match(s))
                .unwrap_or(false),
            Self::Like { field, needle } => doc
                .get(field)
                .and_then(Value::as_str)
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Self::Nor(filters) => !filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn ordered(doc: &Document, field: &str, value: &Value, pred: fn(Ordering) -> bool) -> bool {
    doc.get(field)
        .and_then(|dv| compare_values(dv, value))
        .map(pred)
        .unwrap_or(false)
}

/// `$in` membership. An array document value matches on any overlap with
/// the operand list; a scalar matches when the operand list contains it.
/// A missing field matches nothing.
fn in_list(dv: Option<&Value>, values: &[Value]) -> bool {
    match dv {
        None => false,
        Some(Value::Array(elems)) => elems
            .iter()
            .any(|e| values.iter().any(|v| values_equal(e, v))),
        Some(v) => values.iter().any(|x| values_equal(v, x)),
    }
}

// =============================================================================
// Query
// =============================================================================

/// A parsed query: an implicit AND over its filters.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
}

impl Query {
    /// Parse a JSON query mapping into a filter tree. Unknown operators,
    /// wrong operand types, and invalid regex patterns are structural
    /// errors.
    pub fn parse(query: &JsonValue) -> Result<Self> {
        let obj = query
            .as_object()
            .ok_or_else(|| NimbusError::Query("query must be an object".to_string()))?;

        let mut filters = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            match key.as_str() {
                "$and" => filters.push(Filter::And(Self::parse_sub_queries(key, value)?)),
                "$or" => filters.push(Filter::Or(Self::parse_sub_queries(key, value)?)),
                "$nor" => filters.push(Filter::Nor(Self::parse_sub_queries(key, value)?)),
                k if k.starts_with('$') => {
                    return Err(NimbusError::Query(format!(
                        "unknown top-level operator: {k}"
                    )));
                }
                field => match value {
                    JsonValue::Object(ops) => {
                        for (op, arg) in ops {
                            filters.push(Self::parse_operator(field, op, arg)?);
                        }
                    }
                    other => filters.push(Filter::Eq {
                        field: field.to_string(),
                        value: Value::from_json(other.clone()),
                    }),
                },
            }
        }
        Ok(Self { filters })
    }

    fn parse_sub_queries(op: &str, value: &JsonValue) -> Result<Vec<Filter>> {
        let items = value
            .as_array()
            .ok_or_else(|| NimbusError::Query(format!("{op} requires an array of queries")))?;
        items
            .iter()
            .map(|item| Ok(Filter::And(Self::parse(item)?.filters)))
            .collect()
    }

    fn parse_operator(field: &str, op: &str, arg: &JsonValue) -> Result<Filter> {
        let field = field.to_string();
        let filter = match op {
            "$eq" => Filter::Eq {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$ne" => Filter::Ne {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$gt" => Filter::Gt {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$gte" => Filter::Gte {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$lt" => Filter::Lt {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$lte" => Filter::Lte {
                field,
                value: Value::from_json(arg.clone()),
            },
            "$in" | "$nin" => {
                let values: Vec<Value> = arg
                    .as_array()
                    .ok_or_else(|| NimbusError::Query(format!("{op} requires an array")))?
                    .iter()
                    .map(|v| Value::from_json(v.clone()))
                    .collect();
                if op == "$in" {
                    Filter::In { field, values }
                } else {
                    Filter::Nin { field, values }
                }
            }
            "$exists" => Filter::Exists {
                field,
                exists: arg
                    .as_bool()
                    .ok_or_else(|| NimbusError::Query("$exists requires a boolean".to_string()))?,
            },
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| NimbusError::Query("$regex requires a string".to_string()))?;
                Filter::Regex {
                    field,
                    regex: Regex::new(pattern).map_err(|e| {
                        NimbusError::Query(format!("invalid regex pattern: {e}"))
                    })?,
                }
            }
            "$like" => Filter::Like {
                field,
                needle: arg
                    .as_str()
                    .ok_or_else(|| NimbusError::Query("$like requires a string".to_string()))?
                    .to_string(),
            },
            other => {
                return Err(NimbusError::Query(format!("unknown operator: {other}")));
            }
        };
        Ok(filter)
    }

    /// Check if a document matches this query.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Whether this query constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: JsonValue) -> Document {
        Document::from_json(json).unwrap()
    }

    fn matches(query: JsonValue, document: JsonValue) -> bool {
        Query::parse(&query).unwrap().matches(&doc(document))
    }

    #[test]
    fn test_scalar_equality() {
        assert!(matches(json!({"name": "Alice"}), json!({"name": "Alice"})));
        assert!(!matches(json!({"name": "Bob"}), json!({"name": "Alice"})));
        assert!(!matches(json!({"name": "Alice"}), json!({"age": 30})));
    }

    #[test]
    fn test_nested_path_equality() {
        assert!(matches(
            json!({"address.city": "NYC"}),
            json!({"address": {"city": "NYC"}})
        ));
        assert!(!matches(
            json!({"address.city": "NYC"}),
            json!({"address": "NYC"})
        ));
    }

    #[test]
    fn test_comparison_operators() {
        let d = json!({"age": 30});
        assert!(matches(json!({"age": {"$gt": 26}}), d.clone()));
        assert!(matches(json!({"age": {"$gte": 30}}), d.clone()));
        assert!(matches(json!({"age": {"$lt": 30.5}}), d.clone()));
        assert!(matches(json!({"age": {"$lte": 30}}), d.clone()));
        assert!(!matches(json!({"age": {"$gt": 30}}), d.clone()));
        // Incomparable pairings are false.
        assert!(!matches(json!({"age": {"$gt": "26"}}), d));
    }

    #[test]
    fn test_eq_ne_and_missing_fields() {
        let d = json!({"age": 25});
        assert!(matches(json!({"age": {"$eq": 25.0}}), d.clone()));
        assert!(matches(json!({"age": {"$ne": 30}}), d.clone()));
        // Missing field: $ne holds, ordered operators and $eq do not.
        assert!(matches(json!({"city": {"$ne": "LA"}}), d.clone()));
        assert!(!matches(json!({"city": {"$eq": "LA"}}), d.clone()));
        assert!(!matches(json!({"city": {"$lt": "Z"}}), d));
    }

    #[test]
    fn test_in_nin() {
        let d = json!({"city": "LA", "tags": ["developer", "rust"]});
        assert!(matches(json!({"city": {"$in": ["LA", "NYC"]}}), d.clone()));
        assert!(!matches(json!({"city": {"$in": ["NYC"]}}), d.clone()));
        assert!(matches(json!({"city": {"$nin": ["NYC"]}}), d.clone()));
        // Array field: any overlap with the operand list matches.
        assert!(matches(json!({"tags": {"$in": ["developer"]}}), d.clone()));
        assert!(!matches(json!({"tags": {"$in": ["golang"]}}), d.clone()));
        assert!(matches(json!({"tags": {"$nin": ["golang"]}}), d.clone()));
        // Missing field: $in fails, $nin holds.
        assert!(!matches(json!({"state": {"$in": ["CA"]}}), d.clone()));
        assert!(matches(json!({"state": {"$nin": ["CA"]}}), d));
    }

    #[test]
    fn test_exists() {
        let d = json!({"status": null, "name": "Alice"});
        assert!(matches(json!({"name": {"$exists": true}}), d.clone()));
        assert!(matches(json!({"status": {"$exists": true}}), d.clone()));
        assert!(matches(json!({"missing": {"$exists": false}}), d.clone()));
        assert!(!matches(json!({"name": {"$exists": false}}), d));
    }

    #[test]
    fn test_regex_and_like() {
        let d = json!({"email": "alice@example.com", "age": 30});
        assert!(matches(json!({"email": {"$regex": "@example\\."}}), d.clone()));
        assert!(!matches(json!({"email": {"$regex": "^bob"}}), d.clone()));
        assert!(matches(json!({"email": {"$like": "example"}}), d.clone()));
        assert!(!matches(json!({"email": {"$like": "EXAMPLE"}}), d.clone()));
        // Non-string document values never match.
        assert!(!matches(json!({"age": {"$regex": "3"}}), d.clone()));
        assert!(!matches(json!({"age": {"$like": "3"}}), d));
    }

    #[test]
    fn test_logical_operators() {
        let d = json!({"age": 30, "city": "LA"});
        assert!(matches(
            json!({"$and": [{"age": {"$gte": 30}}, {"city": "LA"}]}),
            d.clone()
        ));
        assert!(matches(
            json!({"$or": [{"age": {"$lt": 10}}, {"city": "LA"}]}),
            d.clone()
        ));
        assert!(!matches(
            json!({"$or": [{"age": {"$lt": 10}}, {"city": "NYC"}]}),
            d.clone()
        ));
        assert!(matches(
            json!({"$nor": [{"age": {"$lt": 10}}, {"city": "NYC"}]}),
            d.clone()
        ));
        // Entries beside a logical operator still AND in.
        assert!(!matches(
            json!({"$or": [{"city": "LA"}], "age": {"$gt": 40}}),
            d
        ));
    }

    #[test]
    fn test_implicit_and_across_entries() {
        let d = json!({"age": 30, "city": "LA"});
        assert!(matches(
            json!({"age": {"$gte": 18, "$lt": 40}, "city": "LA"}),
            d.clone()
        ));
        assert!(!matches(json!({"age": {"$gte": 18, "$lt": 30}}), d));
    }

    #[test]
    fn test_empty_query_matches_all() {
        let q = Query::parse(&json!({})).unwrap();
        assert!(q.is_empty());
        assert!(q.matches(&doc(json!({"anything": 1}))));
    }

    #[test]
    fn test_structural_errors() {
        assert!(Query::parse(&json!({"$bogus": []})).unwrap_err().is_user_error());
        assert!(Query::parse(&json!({"age": {"$unknown": 1}})).is_err());
        assert!(Query::parse(&json!({"$or": {"age": 1}})).is_err());
        assert!(Query::parse(&json!({"age": {"$in": 5}})).is_err());
        assert!(Query::parse(&json!({"age": {"$exists": "yes"}})).is_err());
        assert!(Query::parse(&json!({"name": {"$regex": "("}})).is_err());
        assert!(Query::parse(&json!([1, 2])).is_err());
    }
}
