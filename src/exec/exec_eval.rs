//! Pattern evaluation over entities. Patterns are compiled once per statement:
//! LIKE and MATCHES operands become `regex::Regex`es, and every variable reference
//! must already have been resolved into a value list.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{HuntError, HuntResult};
use crate::syntax::{CompOp, Comparison, Operand, Pattern};
use crate::types::{Entity, Value};

/// Convert a LIKE pattern to an anchored regex: `%` -> `.*`, `_` -> `.`; everything else
/// is literal. Matching is case-sensitive.
pub fn like_to_regex(pat: &str) -> String {
    let mut out = String::from("(?s)^");
    for c in pat.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: Pattern,
    regexes: HashMap<(bool, String), Regex>,
}

impl CompiledPattern {
    pub fn compile(pattern: &Pattern) -> HuntResult<Self> {
        let mut regexes = HashMap::new();
        for c in pattern.comparisons() {
            match (&c.op, &c.operand) {
                (CompOp::Like | CompOp::NotLike, Operand::Value(Value::Str(p))) => {
                    let key = (true, p.clone());
                    if !regexes.contains_key(&key) {
                        let re = Regex::new(&like_to_regex(p))
                            .map_err(|e| HuntError::semantic(format!("invalid LIKE pattern '{}': {}", p, e)))?;
                        regexes.insert(key, re);
                    }
                }
                (CompOp::Matches | CompOp::NotMatches, Operand::Value(Value::Str(p))) => {
                    let key = (false, p.clone());
                    if !regexes.contains_key(&key) {
                        let re = Regex::new(p)
                            .map_err(|e| HuntError::semantic(format!("invalid regular expression '{}': {}", p, e)))?;
                        regexes.insert(key, re);
                    }
                }
                (_, Operand::Ref { var, attr }) => {
                    return Err(HuntError::internal(format!("unresolved reference {}.{}", var, attr)));
                }
                _ => {}
            }
        }
        Ok(Self { pattern: pattern.clone(), regexes })
    }

    pub fn pattern(&self) -> &Pattern { &self.pattern }

    pub fn matches(&self, e: &Entity) -> bool { self.eval(&self.pattern, e) }

    fn eval(&self, p: &Pattern, e: &Entity) -> bool {
        match p {
            Pattern::And(v) => v.iter().all(|x| self.eval(x, e)),
            Pattern::Or(v) => v.iter().any(|x| self.eval(x, e)),
            Pattern::Not(inner) => !self.eval(inner, e),
            Pattern::Cmp(c) => self.eval_cmp(c, e),
        }
    }

    fn eval_cmp(&self, c: &Comparison, e: &Entity) -> bool {
        let v = e.value_of(&c.attr);
        match c.op {
            CompOp::IsNull => return v.is_null(),
            CompOp::IsNotNull => return !v.is_null(),
            _ => {}
        }
        if v.is_null() {
            return false;
        }
        let (positive, negated) = match c.op {
            CompOp::Ne => (CompOp::Eq, true),
            CompOp::NotLike => (CompOp::Like, true),
            CompOp::NotMatches => (CompOp::Matches, true),
            CompOp::NotIn => (CompOp::In, true),
            op => (op, false),
        };
        // A list-valued attribute matches when any element does
        let hit = match &v {
            Value::List(items) => items.iter().any(|item| self.scalar(item, positive, &c.operand)),
            scalar => self.scalar(scalar, positive, &c.operand),
        };
        hit != negated
    }

    fn scalar(&self, v: &Value, op: CompOp, operand: &Operand) -> bool {
        use std::cmp::Ordering::*;
        let candidates: &[Value] = match operand {
            Operand::Value(x) => std::slice::from_ref(x),
            Operand::List(xs) => xs.as_slice(),
            Operand::Ref { .. } | Operand::None => &[],
        };
        match op {
            CompOp::Eq | CompOp::In => candidates.iter().any(|x| v.compare(x) == Some(Equal)),
            CompOp::Lt => candidates.iter().any(|x| v.compare(x) == Some(Less)),
            CompOp::Le => candidates.iter().any(|x| matches!(v.compare(x), Some(Less | Equal))),
            CompOp::Gt => candidates.iter().any(|x| v.compare(x) == Some(Greater)),
            CompOp::Ge => candidates.iter().any(|x| matches!(v.compare(x), Some(Greater | Equal))),
            CompOp::Like | CompOp::Matches => {
                let text = v.render();
                candidates.iter().any(|x| match x {
                    Value::Str(p) => self
                        .regexes
                        .get(&(op == CompOp::Like, p.clone()))
                        .map(|re| re.is_match(&text))
                        .unwrap_or(false),
                    _ => false,
                })
            }
            _ => false,
        }
    }
}

/// Check a pattern against an entity type: every `type:attr` prefix must name it.
pub fn check_type_prefixes(pattern: &Pattern, entity_type: &str) -> HuntResult<()> {
    for c in pattern.comparisons() {
        if let Some(prefix) = &c.type_prefix {
            if prefix != entity_type {
                return Err(HuntError::semantic(format!(
                    "pattern refers to '{}:{}' but the statement works on '{}'",
                    prefix, c.attr, entity_type
                )));
            }
        }
    }
    Ok(())
}
