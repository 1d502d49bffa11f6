//! Typed schemas for entity tables and the unification policy used when tables from
//! several sources are combined.
//!
//! Unification rules (applied per attribute):
//! - identical types are kept;
//! - `null` (only nulls observed) yields to the other type;
//! - `int` and `float` widen to `float`;
//! - any other conflict becomes `untyped` and is reported as a `UnificationWarning`.
//!
//! Unification never drops an attribute: a column missing from one source is null there.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{AttrType, Entity, Value, GENERIC_ENTITY_TYPE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub ty: AttrType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entity_type: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnificationWarning {
    pub attribute: String,
    pub types: Vec<AttrType>,
}

impl std::fmt::Display for UnificationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tys: Vec<String> = self.types.iter().map(|t| t.to_string()).collect();
        write!(f, "attribute '{}' has conflicting types ({}); kept as untyped", self.attribute, tys.join(", "))
    }
}

/// Result of unifying several schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct Unified {
    pub schema: Schema,
    pub warnings: Vec<UnificationWarning>,
}

/// Resolve two attribute types. `None` means the types conflict.
pub fn unify_types(a: AttrType, b: AttrType) -> Option<AttrType> {
    use AttrType::*;
    match (a, b) {
        (x, y) if x == y => Some(x),
        (Null, y) => Some(y),
        (x, Null) => Some(x),
        (Int, Float) | (Float, Int) => Some(Float),
        _ => None,
    }
}

/// Declared entity-type groups whose members may be joined or related with each other.
const TYPE_GROUPS: &[&[&str]] = &[
    &["ipv4-addr", "ipv6-addr", "mac-addr", "domain-name"],
    &["file", "directory"],
];

/// Entity-type compatibility used to reject cross-type JOIN operations.
pub fn compatible(a: &str, b: &str) -> bool {
    if a == b || a == GENERIC_ENTITY_TYPE || b == GENERIC_ENTITY_TYPE {
        return true;
    }
    TYPE_GROUPS.iter().any(|g| g.contains(&a) && g.contains(&b))
}

impl Schema {
    pub fn new(entity_type: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self { entity_type: entity_type.into(), attributes }
    }

    pub fn empty(entity_type: impl Into<String>) -> Self { Self::new(entity_type, Vec::new()) }

    /// Infer a schema from rows: attribute names in first-seen order; conflicting value
    /// types inside one table become `untyped`.
    pub fn infer(entity_type: &str, rows: &[Entity]) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut types: HashMap<String, Option<AttrType>> = HashMap::new();
        for r in rows {
            for (k, v) in r.attributes.iter() {
                let vt = v.attr_type();
                match types.get_mut(k) {
                    None => {
                        order.push(k.clone());
                        types.insert(k.clone(), Some(vt));
                    }
                    Some(slot) => {
                        *slot = match *slot {
                            Some(t) => unify_types(t, vt),
                            None => None,
                        };
                    }
                }
            }
        }
        let attributes = order
            .into_iter()
            .map(|name| {
                let ty = types.get(&name).copied().flatten().unwrap_or(AttrType::Untyped);
                Attribute { name, ty }
            })
            .collect();
        Self { entity_type: entity_type.to_string(), attributes }
    }

    pub fn names(&self) -> Vec<&str> { self.attributes.iter().map(|a| a.name.as_str()).collect() }

    pub fn has(&self, name: &str) -> bool { name == "id" || self.attributes.iter().any(|a| a.name == name) }

    pub fn type_of(&self, name: &str) -> Option<AttrType> {
        if name == "id" && !self.attributes.iter().any(|a| a.name == "id") {
            return Some(AttrType::Str);
        }
        self.attributes.iter().find(|a| a.name == name).map(|a| a.ty)
    }

    /// Keep only the named attributes, in the given order.
    pub fn project(&self, names: &[String]) -> Schema {
        let attributes = names
            .iter()
            .filter_map(|n| self.attributes.iter().find(|a| &a.name == n).cloned())
            .collect();
        Schema { entity_type: self.entity_type.clone(), attributes }
    }

    /// Add an attribute if absent, unifying its type if present.
    pub fn upsert(&mut self, name: &str, ty: AttrType) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(a) => a.ty = unify_types(a.ty, ty).unwrap_or(AttrType::Untyped),
            None => self.attributes.push(Attribute { name: name.to_string(), ty }),
        }
    }

    /// Fill every schema attribute missing from a row with null.
    pub fn conform(&self, rows: &mut [Entity]) {
        for r in rows.iter_mut() {
            for a in &self.attributes {
                r.attributes.entry(a.name.clone()).or_insert(Value::Null);
            }
        }
    }
}

/// Unify schemas into a superset schema. The entity type is kept when all inputs agree
/// and becomes the generic `record` type otherwise.
pub fn unify(schemas: &[Schema]) -> Unified {
    let entity_type = match schemas.first() {
        Some(first) if schemas.iter().all(|s| s.entity_type == first.entity_type) => first.entity_type.clone(),
        Some(_) => GENERIC_ENTITY_TYPE.to_string(),
        None => GENERIC_ENTITY_TYPE.to_string(),
    };
    let mut attributes: Vec<Attribute> = Vec::new();
    let mut seen: BTreeMap<String, Vec<AttrType>> = BTreeMap::new();
    for s in schemas {
        for a in &s.attributes {
            let observed = seen.entry(a.name.clone()).or_default();
            if !observed.contains(&a.ty) { observed.push(a.ty); }
            match attributes.iter_mut().find(|x| x.name == a.name) {
                Some(existing) => {
                    existing.ty = if existing.ty == AttrType::Untyped || a.ty == AttrType::Untyped {
                        AttrType::Untyped
                    } else {
                        unify_types(existing.ty, a.ty).unwrap_or(AttrType::Untyped)
                    };
                }
                None => attributes.push(a.clone()),
            }
        }
    }
    let mut warnings = Vec::new();
    for a in &attributes {
        if a.ty != AttrType::Untyped { continue; }
        let mut types: Vec<AttrType> = seen.get(&a.name).cloned().unwrap_or_default();
        // A source that itself reported untyped is not a new conflict
        types.retain(|t| !matches!(t, AttrType::Untyped | AttrType::Null));
        if types.len() > 1 {
            warnings.push(UnificationWarning { attribute: a.name.clone(), types });
        }
    }
    Unified { schema: Schema { entity_type, attributes }, warnings }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
