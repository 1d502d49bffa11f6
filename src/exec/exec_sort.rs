//! SORT: reorder a variable's rows by one attribute.

use super::exec_common::{check_attributes, sort_order, sort_rows, ExecContext};
use crate::error::HuntResult;
use crate::syntax::SortKey;
use crate::types::EntityTable;

pub fn exec_sort(ctx: &mut ExecContext<'_>, input: Option<&str>, key: &SortKey) -> HuntResult<()> {
    let v = ctx.variable(input)?;
    let table = ctx.table_of(v)?;
    check_attributes(&table.schema, [key.attr.as_str()], "SORT")?;
    let EntityTable { schema, mut rows, .. } = table;
    sort_rows(&mut rows, &key.attr, sort_order(key, ctx.config));
    let name = ctx.output_name();
    ctx.materialize(&name, EntityTable::with_schema(schema, rows), vec![v.id], Vec::new())
}
