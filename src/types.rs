//! Core value and entity types shared by every layer.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::xxh3_64;

use crate::schema::Schema;

/// Entity type given to tables whose rows carry no declared entity type.
pub const GENERIC_ENTITY_TYPE: &str = "record";

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
    List(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType { Null, Bool, Int, Float, Str, Time, List, Untyped }

impl Display for AttrType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttrType::Null => "null",
            AttrType::Bool => "bool",
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Str => "string",
            AttrType::Time => "timestamp",
            AttrType::List => "list",
            AttrType::Untyped => "untyped",
        };
        f.write_str(s)
    }
}

/// Parse an RFC 3339 / ISO-8601 timestamp. A trailing `Z` is optional for
/// second-precision literals such as `2021-05-06T00:00:00`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        let ndt = d.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }
    None
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Null => AttrType::Null,
            Value::Bool(_) => AttrType::Bool,
            Value::Int(_) => AttrType::Int,
            Value::Float(_) => AttrType::Float,
            Value::Str(_) => AttrType::Str,
            Value::Time(_) => AttrType::Time,
            Value::List(_) => AttrType::List,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::Str(s) => Some(s.as_str()), _ => None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert a JSON value. Strings that parse as RFC 3339 timestamps become `Time`.
    pub fn from_json(j: &serde_json::Value) -> Value {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() { Value::Int(i) } else { Value::Float(n.as_f64().unwrap_or(f64::NAN)) }
            }
            serde_json::Value::String(s) => {
                if s.len() >= 19 && s.as_bytes().get(4) == Some(&b'-') && s.contains('T') {
                    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                        return Value::Time(dt.with_timezone(&Utc));
                    }
                }
                Value::Str(s.clone())
            }
            serde_json::Value::Array(arr) => Value::List(arr.iter().map(Value::from_json).collect()),
            // Nested objects are kept verbatim as their JSON text
            serde_json::Value::Object(_) => Value::Str(j.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::json!(b),
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::json!(f),
            Value::Str(s) => serde_json::json!(s),
            Value::Time(t) => serde_json::json!(t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            Value::List(items) => serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Time(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Null => 5,
        }
    }

    /// Semantic comparison used by predicates. Returns `None` when the values are not
    /// comparable (either side null, or incompatible kinds).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) | (Value::Float(_), Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Str(s)) => parse_timestamp(s).map(|b| a.cmp(&b)),
            (Value::Str(s), Value::Time(b)) => parse_timestamp(s).map(|a| a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Str(s)) => {
                let b = s.trim().parse::<f64>().ok()?;
                self.as_f64()?.partial_cmp(&b)
            }
            (Value::Str(s), Value::Int(_) | Value::Float(_)) => {
                let a = s.trim().parse::<f64>().ok()?;
                a.partial_cmp(&other.as_f64()?)
            }
            (Value::List(a), Value::List(b)) => {
                if a == b { Some(Ordering::Equal) } else { None }
            }
            _ => None,
        }
    }

    /// Total order for sorting: kind rank first (nulls last), then numbers by value,
    /// strings by the instant they name (when they parse as timestamps) then by text.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        let (ra, rb) = (self.type_rank(), other.type_rank());
        if ra != rb { return ra.cmp(&rb); }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
                let (fa, fb) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                fa.total_cmp(&fb).then_with(|| matches!(a, Value::Float(_)).cmp(&matches!(b, Value::Float(_))))
            }
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => parse_timestamp(a).cmp(&parse_timestamp(b)).then_with(|| a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let o = x.cmp_total(y);
                    if o != Ordering::Equal { return o; }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Canonical text used for keys, grouping and display.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 { format!("{:.1}", f) } else { f.to_string() }
            }
            Value::Str(s) => s.clone(),
            Value::Time(t) => t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", parts.join(","))
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::Time(_) => write!(f, "t'{}'", self.render()),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            _ => f.write_str(&self.render()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let j = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&j))
    }
}

impl From<&str> for Value { fn from(s: &str) -> Self { Value::Str(s.to_string()) } }
impl From<String> for Value { fn from(s: String) -> Self { Value::Str(s) } }
impl From<i64> for Value { fn from(i: i64) -> Self { Value::Int(i) } }
impl From<f64> for Value { fn from(f: f64) -> Self { Value::Float(f) } }
impl From<bool> for Value { fn from(b: bool) -> Self { Value::Bool(b) } }
impl From<DateTime<Utc>> for Value { fn from(t: DateTime<Utc>) -> Self { Value::Time(t) } }

/// Identity attributes per entity type; the first candidate set present on a record
/// forms its natural key.
static NATURAL_KEYS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("process", &["pid", "name"]);
    m.insert("file", &["name"]);
    m.insert("directory", &["path"]);
    m.insert("ipv4-addr", &["value"]);
    m.insert("ipv6-addr", &["value"]);
    m.insert("mac-addr", &["value"]);
    m.insert("domain-name", &["value"]);
    m.insert("url", &["value"]);
    m.insert("email-addr", &["value"]);
    m.insert("user-account", &["user_id"]);
    m.insert("windows-registry-key", &["key"]);
    m.insert("mutex", &["name"]);
    m.insert("software", &["name"]);
    m
});

/// Identity attribute names declared for an entity type (empty if none).
pub fn identity_attributes(entity_type: &str) -> &'static [&'static str] {
    NATURAL_KEYS.get(entity_type).copied().unwrap_or(&[])
}

/// Natural key text of a record: the identity attributes that are present and
/// non-null, or `None` when the record has none of them.
pub fn natural_key(entity_type: &str, attributes: &BTreeMap<String, Value>) -> Option<String> {
    let ids = identity_attributes(entity_type);
    let mut parts: Vec<String> = Vec::new();
    for a in ids {
        if let Some(v) = attributes.get(*a) {
            if !v.is_null() { parts.push(format!("{}={}", a, v.render())); }
        }
    }
    if parts.is_empty() { None } else { Some(parts.join("|")) }
}

fn full_record_key(attributes: &BTreeMap<String, Value>) -> String {
    let parts: Vec<String> = attributes.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| format!("{}={}", k, v.render())).collect();
    parts.join("|")
}

/// Derive a stable row identifier from a record's natural key (or its full attribute set).
pub fn derive_entity_id(entity_type: &str, attributes: &BTreeMap<String, Value>) -> String {
    let key = natural_key(entity_type, attributes).unwrap_or_else(|| full_record_key(attributes));
    format!("{}--{:016x}", entity_type, xxh3_64(key.as_bytes()))
}

/// One observed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, attributes: BTreeMap<String, Value>) -> Self {
        Self { id: id.into(), attributes }
    }

    /// Build an entity from a raw record. A string `id` attribute becomes the row id;
    /// otherwise the id is derived from the natural key.
    pub fn from_record(entity_type: &str, mut attributes: BTreeMap<String, Value>) -> Self {
        let id = match attributes.remove("id") {
            Some(Value::Str(s)) if !s.is_empty() => s,
            Some(other) if !other.is_null() => other.render(),
            _ => derive_entity_id(entity_type, &attributes),
        };
        Self { id, attributes }
    }

    pub fn get(&self, attr: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attributes.get(attr).unwrap_or(&NULL)
    }

    /// Attribute lookup that also exposes the row id under the name `id`.
    pub fn value_of(&self, attr: &str) -> Value {
        if attr == "id" && !self.attributes.contains_key("id") {
            return Value::Str(self.id.clone());
        }
        self.get(attr).clone()
    }

    /// Key used to deduplicate identical entities seen from several sources.
    pub fn dedup_key(&self, entity_type: &str) -> String {
        natural_key(entity_type, &self.attributes).unwrap_or_else(|| format!("id={}", self.id))
    }

    /// Fill attributes missing (or null) here from `other`.
    pub fn absorb(&mut self, other: &Entity) {
        for (k, v) in other.attributes.iter() {
            match self.attributes.get(k) {
                Some(existing) if !existing.is_null() => {}
                _ => { self.attributes.insert(k.clone(), v.clone()); }
            }
        }
    }
}

/// Typed rows of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTable {
    pub entity_type: String,
    pub schema: Schema,
    pub rows: Vec<Entity>,
}

impl EntityTable {
    /// Build a table, inferring its schema from the rows.
    pub fn new(entity_type: impl Into<String>, rows: Vec<Entity>) -> Self {
        let entity_type = entity_type.into();
        let schema = Schema::infer(&entity_type, &rows);
        Self { entity_type, schema, rows }
    }

    pub fn with_schema(schema: Schema, rows: Vec<Entity>) -> Self {
        Self { entity_type: schema.entity_type.clone(), schema, rows }
    }

    pub fn empty(entity_type: impl Into<String>) -> Self { Self::new(entity_type, Vec::new()) }

    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn ids(&self) -> Vec<&str> { self.rows.iter().map(|r| r.id.as_str()).collect() }

    /// Distinct non-null values of one attribute, in first-seen order. List values
    /// contribute their elements.
    pub fn distinct_values(&self, attr: &str) -> Vec<Value> {
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut push = |v: &Value, out: &mut Vec<Value>| {
            if v.is_null() { return; }
            let k = format!("{:?}|{}", v.attr_type(), v.render());
            if seen.insert(k) { out.push(v.clone()); }
        };
        for r in &self.rows {
            match r.value_of(attr) {
                Value::List(items) => { for it in items.iter() { push(it, &mut out); } }
                v => push(&v, &mut out),
            }
        }
        out
    }
}

/// A directed relationship between two entities, by row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub relation: String,
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, t: &DateTime<Utc>) -> bool { *t >= self.start && *t <= self.stop }

    /// True when the entity has no timestamp among `time_attributes`, or any of its
    /// timestamps falls inside the window.
    pub fn admits(&self, entity: &Entity, time_attributes: &[String]) -> bool {
        let mut saw_time = false;
        for a in time_attributes {
            let t = match entity.get(a) {
                Value::Time(t) => Some(*t),
                Value::Str(s) => parse_timestamp(s),
                _ => None,
            };
            if let Some(t) = t {
                saw_time = true;
                if self.contains(&t) { return true; }
            }
        }
        !saw_time
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "START t'{}' STOP t'{}'",
            self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.stop.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn derived_ids_follow_natural_key() {
        let a = Entity::from_record("process", attrs(&[("pid", Value::Int(4)), ("name", "cmd.exe".into()), ("x", Value::Int(1))]));
        let b = Entity::from_record("process", attrs(&[("pid", Value::Int(4)), ("name", "cmd.exe".into())]));
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("process--"));
        let c = Entity::from_record("process", attrs(&[("id", "p-1".into()), ("pid", Value::Int(4))]));
        assert_eq!(c.id, "p-1");
    }

    #[test]
    fn numeric_comparison_crosses_int_float() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(1.5).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
    }

    #[test]
    fn total_order_puts_nulls_last() {
        let mut v = vec![Value::Null, Value::Int(3), Value::Int(1)];
        v.sort_by(|a, b| a.cmp_total(b));
        assert_eq!(v, vec![Value::Int(1), Value::Int(3), Value::Null]);
    }

    #[test]
    fn total_order_handles_nan_and_offsets() {
        let mut v = vec![Value::Float(f64::NAN), Value::Int(2), Value::Float(1.5), Value::Float(-f64::NAN), Value::Float(2.0)];
        v.sort_by(|a, b| a.cmp_total(b));
        assert!(matches!(v[0], Value::Float(f) if f.is_nan()));
        assert_eq!(&v[1..4], &[Value::Float(1.5), Value::Int(2), Value::Float(2.0)]);
        assert!(matches!(v[4], Value::Float(f) if f.is_nan()));
        for a in &v {
            assert_eq!(a.cmp_total(a), Ordering::Equal);
            for b in &v {
                assert_eq!(a.cmp_total(b), b.cmp_total(a).reverse());
            }
        }

        // 09:00+02:00 is 07:00Z, earlier than 08:00Z
        let late = Value::Str("2021-05-06T08:00:00Z".into());
        let early = Value::Str("2021-05-06T09:00:00+02:00".into());
        assert_eq!(early.cmp_total(&late), Ordering::Less);
        assert_eq!(Value::Str("abc".into()).cmp_total(&early), Ordering::Less);
    }

    #[test]
    fn json_strings_with_timestamps_become_time() {
        let v = Value::from_json(&serde_json::json!("2021-05-06T00:00:00Z"));
        assert_eq!(v.attr_type(), AttrType::Time);
        let s = Value::from_json(&serde_json::json!("cmd.exe"));
        assert_eq!(s, Value::Str("cmd.exe".into()));
    }

    #[test]
    fn window_admits_untimed_entities() {
        let w = TimeWindow { start: parse_timestamp("2021-01-01T00:00:00Z").unwrap(), stop: parse_timestamp("2021-01-02T00:00:00Z").unwrap() };
        let ta = vec!["first_observed".to_string()];
        let untimed = Entity::new("a", BTreeMap::new());
        assert!(w.admits(&untimed, &ta));
        let inside = Entity::new("b", attrs(&[("first_observed", Value::Time(parse_timestamp("2021-01-01T12:00:00Z").unwrap()))]));
        assert!(w.admits(&inside, &ta));
        let outside = Entity::new("c", attrs(&[("first_observed", Value::Time(parse_timestamp("2021-03-01T00:00:00Z").unwrap()))]));
        assert!(!w.admits(&outside, &ta));
    }
}
