pub mod breaker;
pub mod retry;

pub use breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitOpenError, CircuitState,
};
pub use retry::RetryPolicy;
