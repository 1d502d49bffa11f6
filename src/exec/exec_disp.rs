//! DISP and INFO: read-only statements producing display payloads.

use std::collections::HashSet;

use super::exec_common::{refine, ExecContext};
use super::exec_eval::check_type_prefixes;
use crate::display::Display;
use crate::error::HuntResult;
use crate::syntax::Refinement;
use crate::types::{EntityTable, Value};

/// Column list for a display: the requested attributes, or `id` followed by the schema
/// order when none (or `*`) were requested.
fn display_columns(table: &EntityTable, attrs: Option<&Vec<String>>) -> Vec<String> {
    match attrs {
        Some(a) if !a.iter().any(|x| x == "*") => a.clone(),
        _ => std::iter::once("id".to_string()).chain(table.schema.names().into_iter().map(String::from)).collect(),
    }
}

/// Rows as display cells. Rows with nothing but nulls outside `id` are dropped and
/// duplicate rows collapse to their first occurrence.
pub fn table_display(table: &EntityTable, columns: Vec<String>) -> Display {
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let has_data_column = columns.iter().any(|c| c != "id");
    for r in &table.rows {
        let cells: Vec<Value> = columns.iter().map(|c| r.value_of(c)).collect();
        let empty = columns.iter().zip(cells.iter()).filter(|(c, _)| c.as_str() != "id").all(|(_, v)| v.is_null());
        if has_data_column && empty {
            continue;
        }
        let key = cells.iter().map(|v| format!("{:?}", v)).collect::<Vec<_>>().join("\u{1f}");
        if seen.insert(key) {
            rows.push(cells);
        }
    }
    Display::Table { columns, rows }
}

pub fn exec_disp(ctx: &mut ExecContext<'_>, input: Option<&str>, r: &Refinement) -> HuntResult<()> {
    let v = ctx.variable(input)?;
    let table = ctx.table_of(v)?;
    let mut r = r.clone();
    if let Some(p) = &r.pattern {
        check_type_prefixes(p, v.entity_type())?;
        r.pattern = Some(ctx.resolve_pattern(p)?.0);
    }
    let attrs = r.attrs.clone();
    let refined = refine(table, &r, ctx.config)?;
    let columns = display_columns(&refined, attrs.as_ref());
    ctx.tx.display = Some(table_display(&refined, columns));
    Ok(())
}

pub fn exec_info(ctx: &mut ExecContext<'_>, input: Option<&str>) -> HuntResult<()> {
    let v = ctx.variable(input)?;
    let lineage: Vec<String> = ctx.vars.lineage(&v.name)?.into_iter().map(|n| format!("{} ({})", n.name, n.birth.command)).collect();
    let dependents: Vec<String> = ctx.vars.dependents(&v.name)?.into_iter().collect();
    let attributes: Vec<String> = v.schema.attributes.iter().map(|a| format!("{}:{}", a.name, a.ty)).collect();
    let or_none = |items: Vec<String>| if items.is_empty() { "-".to_string() } else { items.join(", ") };
    let entries = vec![
        ("variable".to_string(), v.name.clone()),
        ("entity type".to_string(), v.entity_type().to_string()),
        ("entities".to_string(), v.row_count.to_string()),
        ("attributes".to_string(), or_none(attributes)),
        ("birth command".to_string(), v.birth.statement.clone()),
        ("data sources".to_string(), or_none(v.birth.sources.clone())),
        ("lineage".to_string(), or_none(lineage)),
        ("dependents".to_string(), or_none(dependents)),
        ("created".to_string(), v.created_at.to_rfc3339()),
    ];
    ctx.tx.display = Some(Display::Info { entries });
    Ok(())
}
