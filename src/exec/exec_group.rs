//! GROUP: partition rows by one or more attributes and compute aggregates per group.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::exec_common::{check_attributes, match_key, ExecContext};
use crate::error::{HuntError, HuntResult};
use crate::schema::Schema;
use crate::syntax::{AggFunc, Aggregation};
use crate::types::{AttrType, Entity, Value};

fn check_aggregations(schema: &Schema, aggs: &[Aggregation]) -> HuntResult<()> {
    check_attributes(schema, aggs.iter().map(|a| a.attr.as_str()), "GROUP WITH")?;
    for a in aggs {
        if !matches!(a.func, AggFunc::Sum | AggFunc::Avg) {
            continue;
        }
        if a.attr == "*" {
            return Err(HuntError::semantic(format!("{}(*) is not defined; only COUNT(*) is", a.func.as_str().to_uppercase())));
        }
        if let Some(ty @ (AttrType::Str | AttrType::Time | AttrType::Bool | AttrType::List)) = schema.type_of(&a.attr) {
            return Err(HuntError::type_mismatch(format!("{} needs a numeric attribute, '{}' is {}", a.func.as_str().to_uppercase(), a.attr, ty)));
        }
    }
    Ok(())
}

/// Aggregate one attribute over the rows of a group.
pub fn aggregate(func: AggFunc, attr: &str, rows: &[&Entity]) -> Value {
    if func == AggFunc::Count && attr == "*" {
        return Value::Int(rows.len() as i64);
    }
    let values: Vec<Value> = rows.iter().map(|r| r.value_of(attr)).filter(|v| !v.is_null()).collect();
    match func {
        AggFunc::Count => Value::Int(values.len() as i64),
        AggFunc::NUnique => {
            let distinct: HashSet<String> = values.iter().filter_map(match_key).collect();
            Value::Int(distinct.len() as i64)
        }
        AggFunc::Min => values.into_iter().min_by(|a, b| a.cmp_total(b)).unwrap_or(Value::Null),
        AggFunc::Max => values.into_iter().max_by(|a, b| a.cmp_total(b)).unwrap_or(Value::Null),
        AggFunc::Sum => {
            if values.is_empty() {
                return Value::Null;
            }
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(values.iter().filter_map(|v| if let Value::Int(i) = v { Some(*i) } else { None }).fold(0i64, |acc, i| acc.saturating_add(i)))
            } else {
                Value::Float(values.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        AggFunc::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() { Value::Null } else { Value::Float(nums.iter().sum::<f64>() / nums.len() as f64) }
        }
    }
}

fn group_key(row: &Entity, by: &[String]) -> String {
    by.iter().map(|a| match_key(&row.value_of(a)).unwrap_or_else(|| "null".to_string())).collect::<Vec<_>>().join("\u{1f}")
}

pub fn exec_group(ctx: &mut ExecContext<'_>, input: Option<&str>, by: &[String], aggregations: &[Aggregation]) -> HuntResult<()> {
    let v = ctx.variable(input)?;
    let table = ctx.table_of(v)?;
    check_attributes(&table.schema, by.iter().map(|s| s.as_str()), "GROUP BY")?;
    let default_count = [Aggregation { func: AggFunc::Count, attr: "*".to_string(), alias: "count".to_string() }];
    let aggs: &[Aggregation] = if aggregations.is_empty() { &default_count } else { aggregations };
    check_aggregations(&table.schema, aggs)?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Entity>> = HashMap::new();
    for r in &table.rows {
        let k = group_key(r, by);
        groups
            .entry(k.clone())
            .or_insert_with(|| {
                order.push(k);
                Vec::new()
            })
            .push(r);
    }
    debug!(target: "huntflow::exec", "group: input='{}' groups={} aggs={}", v.name, order.len(), aggs.len());

    let mut rows = Vec::with_capacity(order.len());
    for k in &order {
        let members = &groups[k];
        let mut attributes: BTreeMap<String, Value> = BTreeMap::new();
        for a in by {
            attributes.insert(a.clone(), members[0].value_of(a));
        }
        for a in aggs {
            attributes.insert(a.alias.clone(), aggregate(a.func, &a.attr, members));
        }
        rows.push(Entity::new(format!("group--{:016x}", xxh3_64(k.as_bytes())), attributes));
    }
    let table = crate::types::EntityTable::new(v.entity_type().to_string(), rows);
    let name = ctx.output_name();
    ctx.materialize(&name, table, vec![v.id], Vec::new())
}
