pub mod config;
pub mod correlation;
pub mod domain;
pub mod errors;
pub mod events;
pub mod registry;
pub mod resilience;
pub mod supervisor;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use correlation::CorrelationId;
pub use domain::capability::{CapabilityDescriptor, CapabilityId};
pub use domain::classification::IntentClassification;
pub use domain::reasoning::{ReasoningAction, ReasoningStep, ReasoningTrace};
pub use domain::state::{CapabilityStatus, ConversationState};
pub use domain::tool::{CostClass, ToolCategory, ToolDescriptor, ToolId};
pub use errors::{RegistryError, SupervisorError, ToolCallError, ToolError};
pub use events::{EventCategory, EventOutcome, EventSink, RoutingEvent};
pub use registry::{CapabilityRegistry, ConfigSource, Registries, ToolHealthRegistry};
pub use resilience::{CircuitBreakerRegistry, CircuitState, RetryPolicy};
pub use supervisor::{ReasoningSupervisor, RoutingDecision, RoutingInput, SupervisorLimits};
