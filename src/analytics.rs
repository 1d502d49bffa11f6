//! Analytics invocation: registered enrichment modules run over owned copies of
//! variable tables and hand back new tables to bind.
//! NOTE: keep this module thin; logic lives in the submodules.

pub mod module;
pub mod invoke;

pub use invoke::{invoke, Invocation};
pub use module::{
    AnalyticsExecutor, AnalyticsInput, AnalyticsOutput, CancelFlag, InputRequirement, ModuleDescriptor, ModuleRegistry, OutputSpec,
    RegisteredModule,
};
