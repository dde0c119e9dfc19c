pub mod capabilities;
pub mod graph;
pub mod source;
pub mod tools;

pub use capabilities::CapabilityRegistry;
pub use source::{ConfigSource, Registries, StaticConfigSource};
pub use tools::{ToolHealthRegistry, ToolSearchCriteria};
