// Submodules implementing parts of exec
// NOTE: keep this module thin; command logic lives in exec_*.rs files.
pub mod exec_common;
pub mod exec_eval;      // pattern compilation and row matching
pub mod exec_get;       // GET over connectors, bundles and variables
pub mod exec_find;      // FIND (pair and centered forms)
pub mod exec_join;
pub mod exec_sort;
pub mod exec_group;
pub mod exec_assign;    // assignment, transform and merge
pub mod exec_apply;     // APPLY analytics modules
pub mod exec_disp;      // DISP / INFO
pub mod exec_persist;   // SAVE / LOAD / NEW
pub mod relations;      // built-in relationship rules

use tracing::debug;

pub use exec_common::{ExecContext, PendingConnector, StatementTx};

use crate::error::HuntResult;
use crate::syntax::Command;

/// Plan and run one parsed statement. Everything the statement produces is collected
/// in `ctx.tx`; the caller commits or rolls it back.
pub async fn execute(ctx: &mut ExecContext<'_>) -> HuntResult<()> {
    let stmt = ctx.statement;
    debug!(target: "huntflow::exec", "execute: line={} command={}", stmt.line, stmt.statement.command.keyword());
    match &stmt.statement.command {
        Command::Get { entity_type, sources, pattern, window, limit } => {
            exec_get::exec_get(ctx, entity_type, sources, pattern.as_ref(), window, *limit).await
        }
        Command::FindBetween { relation, from, to, window } => exec_find::exec_find_between(ctx, relation, from, to, window).await,
        Command::FindRelated { entity_type, relation, reversed, input, pattern, window, limit } => {
            exec_find::exec_find_related(ctx, entity_type, relation, *reversed, input, pattern.as_ref(), window, *limit).await
        }
        Command::Join { left, right, by } => exec_join::exec_join(ctx, left, right, by.as_ref()),
        Command::Sort { input, key } => exec_sort::exec_sort(ctx, input.as_deref(), key),
        Command::Group { input, by, aggregations } => exec_group::exec_group(ctx, input.as_deref(), by, aggregations),
        Command::Transform { input, refine } => exec_assign::exec_transform(ctx, input, refine),
        Command::Merge { inputs } => exec_assign::exec_merge(ctx, inputs),
        Command::Assign { input } => exec_assign::exec_assign(ctx, input),
        Command::Apply { module, inputs, params } => exec_apply::exec_apply(ctx, module, inputs, params).await,
        Command::Disp { input, refine } => exec_disp::exec_disp(ctx, input.as_deref(), refine),
        Command::Info { input } => exec_disp::exec_info(ctx, input.as_deref()),
        Command::Save { input, target } => exec_persist::exec_save(ctx, input.as_deref(), target),
        Command::Load { target, entity_type } => exec_persist::exec_load(ctx, target, entity_type.as_deref()),
        Command::New { entity_type, records } => exec_persist::exec_new(ctx, entity_type.as_deref(), records),
    }
}

#[cfg(test)]
mod tests;
