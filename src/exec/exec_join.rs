//! JOIN: combine two variables on a shared attribute.

use std::collections::HashMap;

use super::exec_common::{check_attributes, match_key, ExecContext};
use crate::error::{HuntError, HuntResult};
use crate::schema::{compatible, unify};
use crate::types::{Entity, EntityTable, GENERIC_ENTITY_TYPE};

/// Inner join of `left` and `right` on `left.lattr = right.rattr`. A left row takes the
/// attributes of its first match and keeps its id; further matches become new rows
/// with a combined id.
pub fn join_tables(left: &EntityTable, right: &EntityTable, lattr: &str, rattr: &str) -> Vec<Entity> {
    let mut index: HashMap<String, Vec<&Entity>> = HashMap::new();
    for r in &right.rows {
        if let Some(k) = match_key(&r.value_of(rattr)) {
            index.entry(k).or_default().push(r);
        }
    }
    let mut out = Vec::new();
    for l in &left.rows {
        let Some(k) = match_key(&l.value_of(lattr)) else { continue };
        let Some(matches) = index.get(&k) else { continue };
        for (i, r) in matches.iter().enumerate() {
            let mut row = l.clone();
            row.absorb(r);
            if i > 0 {
                row.id = format!("{}+{}", l.id, r.id);
            }
            out.push(row);
        }
    }
    out
}

pub fn exec_join(ctx: &mut ExecContext<'_>, left: &str, right: &str, by: Option<&(String, String)>) -> HuntResult<()> {
    let a = ctx.variable(Some(left))?;
    let b = ctx.variable(Some(right))?;
    if !compatible(a.entity_type(), b.entity_type()) {
        return Err(HuntError::type_mismatch(format!(
            "cannot join '{}' ({}) with '{}' ({})",
            left,
            a.entity_type(),
            right,
            b.entity_type()
        )));
    }
    let (lattr, rattr) = match by {
        Some((l, r)) => (l.as_str(), r.as_str()),
        None => ("id", "id"),
    };
    let lt = ctx.table_of(a)?;
    let rt = ctx.table_of(b)?;
    check_attributes(&lt.schema, [lattr], "JOIN")?;
    check_attributes(&rt.schema, [rattr], "JOIN")?;

    let unified = unify(&[lt.schema.clone(), rt.schema.clone()]);
    ctx.tx.warnings.extend(unified.warnings.iter().map(|w| w.to_string()));
    let mut schema = unified.schema;
    schema.entity_type = if a.entity_type() == GENERIC_ENTITY_TYPE { b.entity_type().to_string() } else { a.entity_type().to_string() };
    let mut rows = join_tables(&lt, &rt, lattr, rattr);
    schema.conform(&mut rows);
    let name = ctx.output_name();
    ctx.materialize(&name, EntityTable::with_schema(schema, rows), vec![a.id, b.id], Vec::new())
}
