//! Agent runtime - the async half of helmsman
//!
//! The core crate decides; this crate does the I/O around those decisions:
//! - Classifies free text onto a capability with a model call, cached by
//!   normalized query hash (`classifier`, `cache`)
//! - Calls tools through timeouts, bounded retries and per-tool circuit
//!   breakers, feeding the tool health registry (`resilience`, `tools`)
//! - Drives one request from query to final answer, checkpointing the
//!   conversation between turns (`runtime`, `checkpoint`)
//!
//! # Architecture
//!
//! 1. **Classify** (`classifier`) - optional, advisory; failures fall back to
//!    keyword routing
//! 2. **Decide** (`helmsman_core::supervisor`) - pure, synchronous
//! 3. **Execute** (`resilience`) - required tools must succeed, optional tools
//!    are best-effort
//! 4. **Merge** (`runtime`) - tool outputs land under the capability's output
//!    key, failures mark the state degraded
//!
//! The model never executes anything. It only proposes a capability, and the
//! supervisor checks that proposal against the registry.

pub mod cache;
pub mod checkpoint;
pub mod classifier;
pub mod llm;
pub mod resilience;
pub mod runtime;
pub mod testing;
pub mod tools;

pub use cache::{Cache, InMemoryCache};
pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use classifier::{ClassifyOptions, IntentClassifier};
pub use llm::ModelClient;
pub use resilience::ResilienceLayer;
pub use runtime::{AgentRuntime, RuntimeError, TurnOutcome};
pub use tools::{Tool, ToolExecutor, ToolRegistry};
