//! Execution dispatcher: capability invocation under declared retry policy

mod dispatcher;
mod recording;
mod registry;

pub use colloquy_core::CapabilityAdapter;
pub use dispatcher::Dispatcher;
pub use recording::RecordingAdapter;
pub use registry::AdapterRegistry;
