//! Meta-tools: named recipes that build and run workflows.

mod compose;
mod registry;

pub use compose::{MetaToolContext, PlanOutcome};
pub use registry::{
    Complexity, MetaToolDescriptor, MetaToolHandler, MetaToolRegistry, MetaToolResponse,
    ResponseStatus, SearchMatch,
};
