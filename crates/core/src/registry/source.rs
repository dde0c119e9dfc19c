use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::capability::CapabilityDescriptor;
use crate::domain::tool::ToolDescriptor;
use crate::errors::RegistryError;
use crate::registry::capabilities::CapabilityRegistry;
use crate::registry::tools::ToolHealthRegistry;

/// Where descriptors come from. File formats and hot reload live behind this trait.
pub trait ConfigSource: Send + Sync {
    fn load_tools(&self) -> Result<Vec<ToolDescriptor>, RegistryError>;
    fn load_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, RegistryError>;
}

/// Descriptors held in memory, for tests and embedded catalogs.
#[derive(Clone, Debug, Default)]
pub struct StaticConfigSource {
    tools: Vec<ToolDescriptor>,
    capabilities: Vec<CapabilityDescriptor>,
}

impl StaticConfigSource {
    pub fn new(tools: Vec<ToolDescriptor>, capabilities: Vec<CapabilityDescriptor>) -> Self {
        Self { tools, capabilities }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load_tools(&self) -> Result<Vec<ToolDescriptor>, RegistryError> {
        Ok(self.tools.clone())
    }

    fn load_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, RegistryError> {
        Ok(self.capabilities.clone())
    }
}

/// Both registries, ready to share across requests.
#[derive(Clone, Debug)]
pub struct Registries {
    pub tools: Arc<ToolHealthRegistry>,
    pub capabilities: Arc<CapabilityRegistry>,
}

impl Registries {
    /// Tools first so capability bindings can resolve, then a whole-graph
    /// dependency check. Any problem aborts bootstrap.
    pub fn bootstrap(source: &dyn ConfigSource) -> Result<Self, RegistryError> {
        info!(event_name = "registry.bootstrap.start", "loading capability catalog");

        let tools = ToolHealthRegistry::new();
        for tool in source.load_tools()? {
            tools.register(tool)?;
        }

        let mut capabilities = CapabilityRegistry::new();
        for descriptor in source.load_capabilities()? {
            capabilities.register(descriptor, &tools)?;
        }

        let mut problems = capabilities.validate_dependencies();
        if !problems.is_empty() {
            for problem in &problems {
                warn!(event_name = "registry.bootstrap.invalid", error = %problem, "catalog rejected");
            }
            return Err(problems.remove(0));
        }

        info!(
            event_name = "registry.bootstrap.ready",
            tool_count = tools.len(),
            capability_count = capabilities.len(),
            "capability catalog loaded"
        );
        Ok(Self { tools: Arc::new(tools), capabilities: Arc::new(capabilities) })
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigSource, Registries, StaticConfigSource};
    use crate::domain::capability::CapabilityDescriptor;
    use crate::domain::tool::{ToolCategory, ToolDescriptor};
    use crate::errors::RegistryError;

    struct FailingSource;

    impl ConfigSource for FailingSource {
        fn load_tools(&self) -> Result<Vec<ToolDescriptor>, RegistryError> {
            Err(RegistryError::Source("catalog unreadable".to_string()))
        }

        fn load_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, RegistryError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn bootstrap_builds_both_registries() {
        let source = StaticConfigSource::new(
            vec![ToolDescriptor::new("route_calculator", "Route", "route", ToolCategory::Calculation)],
            vec![
                CapabilityDescriptor::new("route_agent").with_required_tools(["route_calculator"]),
                CapabilityDescriptor::new("bunker_agent").with_upstream(["route_agent"]),
            ],
        );

        let registries = Registries::bootstrap(&source).expect("bootstrap");
        assert_eq!(registries.tools.len(), 1);
        assert_eq!(registries.capabilities.len(), 2);
    }

    #[test]
    fn bootstrap_rejects_unknown_upstream() {
        let source = StaticConfigSource::new(
            Vec::new(),
            vec![CapabilityDescriptor::new("bunker_agent").with_upstream(["route_agent"])],
        );

        assert_eq!(
            Registries::bootstrap(&source).expect_err("must fail"),
            RegistryError::UnknownDependency {
                capability_id: "bunker_agent".to_string(),
                dependency: "route_agent".to_string(),
            }
        );
    }

    #[test]
    fn source_failures_propagate() {
        assert_eq!(
            Registries::bootstrap(&FailingSource).expect_err("must fail"),
            RegistryError::Source("catalog unreadable".to_string())
        );
    }
}
