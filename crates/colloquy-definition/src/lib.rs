//! Notation data model and definition loader

mod constraint;
mod loader;
mod model;
mod schema;
mod step;

pub use constraint::{ActionMatcher, ConstraintRule};
pub use loader::{load, load_module, split_qualified, SUPPORTED_VERSION};
pub use model::{
    AgentDefinition, AgentProfile, EventHandler, ModuleDefinition, ModuleLocator, StateDefinition,
};
pub use schema::{FieldSpec, FieldType, StateSchema};
pub use step::{DecideStep, ExecuteStep, RetrySpec, Step};
