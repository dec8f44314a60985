//! Nimbus Pipeline - Aggregation Stages
//!
//! Ordered pipelines of transformation stages over a document set, in the
//! MongoDB idiom: each stage is a single-operator mapping, applied in
//! order, the output of one feeding the next. Stages parse into a closed
//! enumeration; unknown stages are structural errors. `$lookup` reaches
//! other collections through the [`DocumentSource`] seam.
//!
//! Key Features:
//! - $match / $sort / $limit / $skip / $project
//! - $group with sum/avg/max/min/first/last/push/addToSet accumulators
//! - $count, $unwind, $lookup, $geoNear
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use crate::query::Query;
use crate::types::{compare_values, resolve, values_equal, Document, Value};
use nimbus_common::{NimbusError, Result};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;

// =============================================================================
// Document Source
// =============================================================================

/// Provides full-collection loads for cross-collection stages.
pub trait DocumentSource {
    /// Load every document of the named collection. Unknown collections
    /// load as empty.
    fn load_collection(&self, name: &str) -> Result<Vec<Document>>;
}

impl DocumentSource for HashMap<String, Vec<Document>> {
    fn load_collection(&self, name: &str) -> Result<Vec<Document>> {
        Ok(self.get(name).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Stage Types
// =============================================================================

/// One key of a `$sort` composite.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// A `$group` accumulator operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulator {
    Sum,
    Avg,
    Max,
    Min,
    First,
    Last,
    Push,
    AddToSet,
}

impl Accumulator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$sum" => Self::Sum,
            "$avg" => Self::Avg,
            "$max" => Self::Max,
            "$min" => Self::Min,
            "$first" => Self::First,
            "$last" => Self::Last,
            "$push" => Self::Push,
            "$addToSet" => Self::AddToSet,
            _ => return None,
        })
    }
}

/// One output field of a `$group` stage.
#[derive(Debug, Clone)]
pub struct GroupField {
    pub name: String,
    pub acc: Accumulator,
    pub expr: Value,
}

/// A parsed pipeline stage.
#[derive(Debug, Clone)]
pub enum Stage {
    Match(Query),
    Sort(Vec<SortKey>),
    Limit(usize),
    Skip(usize),
    Project(Vec<(String, bool)>),
    Group {
        key: Value,
        fields: Vec<GroupField>,
    },
    Count(String),
    Unwind(String),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    GeoNear {
        near: (f64, f64),
        distance_field: String,
        max_distance: Option<f64>,
    },
}

// =============================================================================
// Pipeline
// =============================================================================

/// An ordered sequence of parsed stages.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parse a JSON array of single-operator stage mappings.
    pub fn parse(stages: &JsonValue) -> Result<Self> {
        let items = stages
            .as_array()
            .ok_or_else(|| NimbusError::Query("pipeline must be an array".to_string()))?;
        let stages = items.iter().map(Stage::parse).collect::<Result<_>>()?;
        Ok(Self { stages })
    }

    /// Run every stage in order over the input set.
    pub fn run(&self, mut docs: Vec<Document>, source: &dyn DocumentSource) -> Result<Vec<Document>> {
        for stage in &self.stages {
            docs = stage.apply(docs, source)?;
        }
        Ok(docs)
    }
}

// =============================================================================
// Stage Parsing
// =============================================================================

impl Stage {
    fn parse(stage: &JsonValue) -> Result<Self> {
        let obj = stage
            .as_object()
            .ok_or_else(|| NimbusError::Query("stage must be an object".to_string()))?;
        if obj.len() != 1 {
            return Err(NimbusError::Query(
                "stage must have exactly one operator".to_string(),
            ));
        }
        let (op, arg) = obj.iter().next().expect("len checked above");

        match op.as_str() {
            "$match" => Ok(Self::Match(Query::parse(arg)?)),
            "$sort" => Self::parse_sort(arg),
            "$limit" => Ok(Self::Limit(parse_count(op, arg)?)),
            "$skip" => Ok(Self::Skip(parse_count(op, arg)?)),
            "$project" => Self::parse_project(arg),
            "$group" => Self::parse_group(arg),
            "$count" => {
                let name = arg
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        NimbusError::Query("$count requires a non-empty field name".to_string())
                    })?;
                Ok(Self::Count(name.to_string()))
            }
            "$unwind" => {
                let path = arg
                    .as_str()
                    .and_then(|s| s.strip_prefix('$'))
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        NimbusError::Query("$unwind requires a \"$path\" string".to_string())
                    })?;
                Ok(Self::Unwind(path.to_string()))
            }
            "$lookup" => Self::parse_lookup(arg),
            "$geoNear" => Self::parse_geo_near(arg),
            other => Err(NimbusError::Query(format!(
                "unknown pipeline stage: {other}"
            ))),
        }
    }

    fn parse_sort(arg: &JsonValue) -> Result<Self> {
        let entries: Vec<(&String, &JsonValue)> = match arg {
            JsonValue::Object(obj) => obj.iter().collect(),
            // Ordered form for composite sorts: a JSON mapping cannot
            // carry key precedence, an array of single-key mappings can.
            JsonValue::Array(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let obj = item.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                        NimbusError::Query(
                            "$sort array entries must be single-key objects".to_string(),
                        )
                    })?;
                    entries.extend(obj.iter());
                }
                entries
            }
            _ => {
                return Err(NimbusError::Query(
                    "$sort requires an object or an array of single-key objects".to_string(),
                ));
            }
        };

        let mut keys = Vec::with_capacity(entries.len());
        for (field, dir) in entries {
            let dir = dir.as_f64().filter(|d| *d != 0.0).ok_or_else(|| {
                NimbusError::Query(format!("$sort direction for '{field}' must be 1 or -1"))
            })?;
            keys.push(SortKey {
                field: field.clone(),
                descending: dir < 0.0,
            });
        }
        Ok(Self::Sort(keys))
    }

    fn parse_project(arg: &JsonValue) -> Result<Self> {
        let obj = arg
            .as_object()
            .ok_or_else(|| NimbusError::Query("$project requires an object".to_string()))?;
        let mut spec = Vec::with_capacity(obj.len());
        for (field, flag) in obj {
            let include = match flag {
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) if n.as_f64() == Some(0.0) => false,
                JsonValue::Number(n) if n.as_f64() == Some(1.0) => true,
                _ => {
                    return Err(NimbusError::Query(format!(
                        "$project flag for '{field}' must be 0 or 1"
                    )));
                }
            };
            spec.push((field.clone(), include));
        }
        Ok(Self::Project(spec))
    }

    fn parse_group(arg: &JsonValue) -> Result<Self> {
        let obj = arg
            .as_object()
            .ok_or_else(|| NimbusError::Query("$group requires an object".to_string()))?;
        let key = obj
            .get("_id")
            .ok_or_else(|| NimbusError::Query("$group requires an _id expression".to_string()))?;

        let mut fields = Vec::new();
        for (name, spec) in obj {
            if name == "_id" {
                continue;
            }
            let spec = spec.as_object().filter(|s| s.len() == 1).ok_or_else(|| {
                NimbusError::Query(format!(
                    "accumulator '{name}' must be a single-operator object"
                ))
            })?;
            let (op, expr) = spec.iter().next().expect("len checked above");
            let acc = Accumulator::parse(op)
                .ok_or_else(|| NimbusError::Query(format!("unknown accumulator: {op}")))?;
            fields.push(GroupField {
                name: name.clone(),
                acc,
                expr: Value::from_json(expr.clone()),
            });
        }

        Ok(Self::Group {
            key: Value::from_json(key.clone()),
            fields,
        })
    }

    fn parse_lookup(arg: &JsonValue) -> Result<Self> {
        let obj = arg
            .as_object()
            .ok_or_else(|| NimbusError::Query("$lookup requires an object".to_string()))?;
        let get = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| NimbusError::Query(format!("$lookup requires a string '{key}'")))
        };
        for key in obj.keys() {
            if !matches!(key.as_str(), "from" | "localField" | "foreignField" | "as") {
                return Err(NimbusError::Query(format!(
                    "unsupported $lookup option: {key}"
                )));
            }
        }
        Ok(Self::Lookup {
            from: get("from")?,
            local_field: get("localField")?,
            foreign_field: get("foreignField")?,
            as_field: get("as")?,
        })
    }

    fn parse_geo_near(arg: &JsonValue) -> Result<Self> {
        let obj = arg
            .as_object()
            .ok_or_else(|| NimbusError::Query("$geoNear requires an object".to_string()))?;
        for key in obj.keys() {
            if !matches!(
                key.as_str(),
                "near" | "distanceField" | "maxDistance" | "spherical"
            ) {
                return Err(NimbusError::Query(format!(
                    "unsupported $geoNear option: {key}"
                )));
            }
        }

        let near = obj
            .get("near")
            .and_then(JsonValue::as_array)
            .filter(|a| a.len() == 2)
            .and_then(|a| Some((a[0].as_f64()?, a[1].as_f64()?)))
            .ok_or_else(|| {
                NimbusError::Query("$geoNear requires 'near' as [x, y]".to_string())
            })?;
        let distance_field = obj
            .get("distanceField")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                NimbusError::Query("$geoNear requires a string 'distanceField'".to_string())
            })?
            .to_string();
        let max_distance = match obj.get("maxDistance") {
            None => None,
            Some(v) => Some(v.as_f64().ok_or_else(|| {
                NimbusError::Query("$geoNear 'maxDistance' must be numeric".to_string())
            })?),
        };
        // 'spherical' is accepted for compatibility; distances are planar.

        Ok(Self::GeoNear {
            near,
            distance_field,
            max_distance,
        })
    }
}

fn parse_count(op: &str, arg: &JsonValue) -> Result<usize> {
    arg.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| NimbusError::Query(format!("{op} requires a non-negative integer")))
}

// =============================================================================
// Stage Execution
// =============================================================================

impl Stage {
    fn apply(&self, docs: Vec<Document>, source: &dyn DocumentSource) -> Result<Vec<Document>> {
        match self {
            Self::Match(query) => Ok(docs.into_iter().filter(|d| query.matches(d)).collect()),
            Self::Sort(keys) => Ok(apply_sort(docs, keys)),
            Self::Limit(n) => {
                let mut docs = docs;
                docs.truncate(*n);
                Ok(docs)
            }
            Self::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Self::Project(spec) => Ok(docs.into_iter().map(|d| apply_project(d, spec)).collect()),
            Self::Group { key, fields } => Ok(apply_group(&docs, key, fields)),
            Self::Count(name) => {
                let mut out = Document::new();
                out.set(name.clone(), Value::Int(docs.len() as i64));
                Ok(vec![out])
            }
            Self::Unwind(path) => Ok(apply_unwind(docs, path)),
            Self::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => apply_lookup(docs, source, from, local_field, foreign_field, as_field),
            Self::GeoNear {
                near,
                distance_field,
                max_distance,
            } => Ok(apply_geo_near(docs, *near, distance_field, *max_distance)),
        }
    }
}

fn apply_sort(mut docs: Vec<Document>, keys: &[SortKey]) -> Vec<Document> {
    // Vec::sort_by is stable; ties keep input order.
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = match (a.get(&key.field), b.get(&key.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    docs
}

fn apply_project(doc: Document, spec: &[(String, bool)]) -> Document {
    let any_included = spec.iter().any(|(_, include)| *include);
    if any_included {
        let mut out = Document::new();
        for (field, include) in spec {
            if *include {
                // Top-level values only; dotted paths are not projected.
                if let Some(v) = doc.fields().get(field) {
                    out.set(field.clone(), v.clone());
                }
            }
        }
        out
    } else {
        let mut out = doc;
        for (field, _) in spec {
            out.remove(field);
        }
        out
    }
}

fn apply_unwind(docs: Vec<Document>, path: &str) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match doc.get(path) {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        };
        match items {
            Some(items) => {
                for item in items {
                    let mut copy = doc.clone();
                    copy.set_path(path, item);
                    out.push(copy);
                }
            }
            // Non-list (or missing) values pass the document through
            // unchanged.
            None => out.push(doc),
        }
    }
    out
}

fn apply_lookup(
    mut docs: Vec<Document>,
    source: &dyn DocumentSource,
    from: &str,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> Result<Vec<Document>> {
    let foreign = source.load_collection(from)?;
    for doc in docs.iter_mut() {
        let local = doc.get(local_field).cloned().unwrap_or(Value::Null);
        let matched: Vec<Value> = foreign
            .iter()
            .filter(|f| values_equal(f.get(foreign_field).unwrap_or(&Value::Null), &local))
            .map(|f| Value::Object(f.fields().clone()))
            .collect();
        doc.set(as_field.to_string(), Value::Array(matched));
    }
    Ok(docs)
}

fn apply_geo_near(
    docs: Vec<Document>,
    near: (f64, f64),
    distance_field: &str,
    max_distance: Option<f64>,
) -> Vec<Document> {
    let mut out = Vec::new();
    for mut doc in docs {
        let point = doc.get(distance_field).and_then(Value::as_array).and_then(|a| {
            if a.len() == 2 {
                Some((a[0].as_f64()?, a[1].as_f64()?))
            } else {
                None
            }
        });
        let Some((x, y)) = point else {
            // Documents without a usable coordinate pair are dropped.
            continue;
        };
        let distance = ((x - near.0).powi(2) + (y - near.1).powi(2)).sqrt();
        if max_distance.is_some_and(|max| distance > max) {
            continue;
        }
        doc.set_path(distance_field, Value::Float(distance));
        out.push(doc);
    }
    out
}

// =============================================================================
// Grouping
// =============================================================================

fn apply_group(docs: &[Document], key_expr: &Value, fields: &[GroupField]) -> Vec<Document> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, GroupState> = HashMap::new();

    for doc in docs {
        let key = resolve(key_expr, doc).unwrap_or(Value::Null);
        let canon = group_key_string(&key);
        let state = groups.entry(canon.clone()).or_insert_with(|| {
            order.push(canon);
            GroupState::new(key, fields)
        });
        state.update(doc, fields);
    }

    order
        .into_iter()
        .map(|canon| {
            groups
                .remove(&canon)
                .expect("group key recorded in order")
                .finalize(fields)
        })
        .collect()
}

/// Canonical text form of a group key. Equal values (including mixed
/// integer/float numbers) map to the same string; object keys are sorted
/// so key order never splits a partition.
fn group_key_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Int(i) => format!("n:{}", *i as f64),
        Value::Float(f) => format!("n:{f}"),
        Value::String(s) => format!("s:{s}"),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(group_key_string).collect();
            format!("a:[{}]", inner.join(","))
        }
        Value::Object(obj) => {
            let mut entries: Vec<(&String, &Value)> = obj.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{k}={}", group_key_string(v)))
                .collect();
            format!("o:{{{}}}", inner.join(","))
        }
    }
}

struct GroupState {
    key: Value,
    accs: Vec<AccState>,
}

impl GroupState {
    fn new(key: Value, fields: &[GroupField]) -> Self {
        Self {
            key,
            accs: fields.iter().map(|f| AccState::new(f.acc)).collect(),
        }
    }

    fn update(&mut self, doc: &Document, fields: &[GroupField]) {
        for (state, field) in self.accs.iter_mut().zip(fields) {
            state.update(resolve(&field.expr, doc));
        }
    }

    fn finalize(self, fields: &[GroupField]) -> Document {
        let mut out = Document::new();
        out.set("_id", self.key);
        for (state, field) in self.accs.into_iter().zip(fields) {
            out.set(field.name.clone(), state.finalize());
        }
        out
    }
}

enum AccState {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Max(f64),
    Min(f64),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
}

impl AccState {
    fn new(acc: Accumulator) -> Self {
        match acc {
            Accumulator::Sum => Self::Sum {
                total: 0.0,
                integral: true,
            },
            Accumulator::Avg => Self::Avg {
                total: 0.0,
                count: 0,
            },
            Accumulator::Max => Self::Max(f64::NEG_INFINITY),
            Accumulator::Min => Self::Min(f64::INFINITY),
            Accumulator::First => Self::First(None),
            Accumulator::Last => Self::Last(None),
            Accumulator::Push => Self::Push(Vec::new()),
            Accumulator::AddToSet => Self::AddToSet(Vec::new()),
        }
    }

    fn update(&mut self, resolved: Option<Value>) {
        match self {
            Self::Sum { total, integral } => match resolved {
                Some(Value::Int(i)) => *total += i as f64,
                Some(Value::Float(f)) => {
                    *total += f;
                    *integral = false;
                }
                // Non-numeric operands are ignored.
                _ => {}
            },
            Self::Avg { total, count } => {
                if let Some(n) = numeric(resolved.as_ref()) {
                    *total += n;
                    *count += 1;
                }
            }
            Self::Max(value) => {
                if let Some(n) = numeric(resolved.as_ref()) {
                    *value = value.max(n);
                }
            }
            Self::Min(value) => {
                if let Some(n) = numeric(resolved.as_ref()) {
                    *value = value.min(n);
                }
            }
            Self::First(slot) => {
                if slot.is_none() {
                    *slot = resolved;
                }
            }
            Self::Last(slot) => {
                if resolved.is_some() {
                    *slot = resolved;
                }
            }
            Self::Push(items) => {
                if let Some(v) = resolved {
                    items.push(v);
                }
            }
            Self::AddToSet(items) => {
                if let Some(v) = resolved {
                    if !items.iter().any(|e| values_equal(e, &v)) {
                        items.push(v);
                    }
                }
            }
        }
    }

    fn finalize(self) -> Value {
        match self {
            Self::Sum { total, integral } => {
                if integral {
                    Value::Int(total as i64)
                } else {
                    Value::Float(total)
                }
            }
            Self::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(total / count as f64)
                }
            }
            Self::Max(value) => Value::Float(value),
            Self::Min(value) => Value::Float(value),
            Self::First(v) | Self::Last(v) => v.unwrap_or(Value::Null),
            Self::Push(items) | Self::AddToSet(items) => Value::Array(items),
        }
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    value.filter(|v| v.is_number()).and_then(Value::as_f64)
}

// =============================================================================
// Tests
// =============================================================================
