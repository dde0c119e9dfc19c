//! Capability registry: routable units of work, their tool bindings, and the
//! upstream dependency graph the supervisor walks.

use std::collections::HashMap;

use tracing::info;

use crate::domain::capability::{CapabilityDescriptor, CapabilityId};
use crate::domain::tool::ToolId;
use crate::errors::RegistryError;
use crate::registry::graph::{dependencies_first, find_any_cycle, find_cycle, Adjacency};
use crate::registry::source::ConfigSource;
use crate::registry::tools::ToolHealthRegistry;

/// Write-once at bootstrap, then shared read-only behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct CapabilityRegistry {
    order: Vec<CapabilityId>,
    by_id: HashMap<CapabilityId, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every required and optional tool must already be registered in `tools`.
    pub fn register(
        &mut self,
        descriptor: CapabilityDescriptor,
        tools: &ToolHealthRegistry,
    ) -> Result<(), RegistryError> {
        if descriptor.id.0.trim().is_empty() {
            return Err(RegistryError::Validation {
                id: descriptor.id.0.clone(),
                issues: vec!["id is required".to_string()],
            });
        }
        if self.by_id.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id.0.clone()));
        }
        ensure_tools_resolve(&descriptor, tools)?;

        info!(
            event_name = "registry.capability.registered",
            capability_id = %descriptor.id,
            tool_count = descriptor.all_tools().len(),
            enabled = descriptor.enabled,
            "capability registered"
        );
        self.order.push(descriptor.id.clone());
        self.by_id.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Option<&CapabilityDescriptor> {
        self.by_id.get(&CapabilityId::new(id))
    }

    /// Registration order.
    pub fn get_all(&self) -> Vec<&CapabilityDescriptor> {
        self.order.iter().filter_map(|id| self.by_id.get(id)).collect()
    }

    pub fn get_enabled(&self) -> Vec<&CapabilityDescriptor> {
        self.get_all().into_iter().filter(|descriptor| descriptor.enabled).collect()
    }

    pub fn get_by_capability(&self, capability: &str) -> Vec<&CapabilityDescriptor> {
        self.get_all()
            .into_iter()
            .filter(|descriptor| {
                descriptor.capabilities.iter().any(|entry| entry.eq_ignore_ascii_case(capability))
            })
            .collect()
    }

    pub fn get_by_intent(&self, intent: &str) -> Vec<&CapabilityDescriptor> {
        self.get_all()
            .into_iter()
            .filter(|descriptor| {
                descriptor.intents.iter().any(|entry| entry.eq_ignore_ascii_case(intent))
            })
            .collect()
    }

    pub fn is_deterministic(&self, id: &str) -> bool {
        self.get_by_id(id).is_some_and(|descriptor| descriptor.deterministic)
    }

    /// Required tools then optional ones; empty for unknown ids.
    pub fn get_tools_for(&self, id: &str) -> Vec<ToolId> {
        self.get_by_id(id).map(CapabilityDescriptor::all_tools).unwrap_or_default()
    }

    pub fn validate_tool_for_capability(&self, tool_id: &str, capability_id: &str) -> bool {
        self.get_tools_for(capability_id).iter().any(|tool| tool.0 == tool_id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.get_by_id(id).is_some_and(|descriptor| descriptor.enabled)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Transitive upstream closure of `id` with dependencies first and `id` last.
    pub fn dependency_chain(&self, id: &str) -> Result<Vec<CapabilityId>, RegistryError> {
        let descriptor =
            self.get_by_id(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let adjacency = self.adjacency();
        if let Some(cycle) = find_cycle(&adjacency, descriptor.id.as_str()) {
            return Err(RegistryError::CircularDependency { cycle });
        }

        let chain = dependencies_first(&adjacency, descriptor.id.as_str());
        for member in &chain {
            if !adjacency.contains_key(member) {
                let dependent = chain
                    .iter()
                    .filter_map(|candidate| self.get_by_id(candidate))
                    .find(|candidate| {
                        candidate.dependencies.upstream.iter().any(|up| &up.0 == member)
                    })
                    .map(|candidate| candidate.id.0.clone())
                    .unwrap_or_else(|| id.to_string());
                return Err(RegistryError::UnknownDependency {
                    capability_id: dependent,
                    dependency: member.clone(),
                });
            }
        }

        Ok(chain.into_iter().map(CapabilityId::new).collect())
    }

    /// Reports every unknown upstream reference and the first capability-level cycle.
    pub fn validate_dependencies(&self) -> Vec<RegistryError> {
        let mut problems = Vec::new();
        for descriptor in self.get_all() {
            for upstream in &descriptor.dependencies.upstream {
                if !self.by_id.contains_key(upstream) {
                    problems.push(RegistryError::UnknownDependency {
                        capability_id: descriptor.id.0.clone(),
                        dependency: upstream.0.clone(),
                    });
                }
            }
        }
        if let Some(cycle) = find_any_cycle(&self.adjacency()) {
            problems.push(RegistryError::CircularDependency { cycle });
        }
        problems
    }

    /// Replaces one descriptor with the version currently held by `source`.
    /// Keeps its position in registration order.
    pub fn reload(
        &mut self,
        id: &str,
        source: &dyn ConfigSource,
        tools: &ToolHealthRegistry,
    ) -> Result<(), RegistryError> {
        let fresh = source
            .load_capabilities()?
            .into_iter()
            .find(|descriptor| descriptor.id.0 == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        ensure_tools_resolve(&fresh, tools)?;

        if !self.by_id.contains_key(&fresh.id) {
            self.order.push(fresh.id.clone());
        }
        info!(event_name = "registry.capability.reloaded", capability_id = id, "capability reloaded");
        self.by_id.insert(fresh.id.clone(), fresh);
        Ok(())
    }

    pub fn invalidate(&mut self, id: &str) -> Option<CapabilityDescriptor> {
        let key = CapabilityId::new(id);
        let removed = self.by_id.remove(&key)?;
        self.order.retain(|existing| existing != &key);
        info!(
            event_name = "registry.capability.invalidated",
            capability_id = id,
            "capability removed"
        );
        Some(removed)
    }

    fn adjacency(&self) -> Adjacency {
        self.by_id
            .values()
            .map(|descriptor| {
                (
                    descriptor.id.0.clone(),
                    descriptor.dependencies.upstream.iter().map(|up| up.0.clone()).collect(),
                )
            })
            .collect()
    }
}

fn ensure_tools_resolve(
    descriptor: &CapabilityDescriptor,
    tools: &ToolHealthRegistry,
) -> Result<(), RegistryError> {
    match descriptor.all_tools().into_iter().find(|tool| !tools.contains(tool.as_str())) {
        Some(missing) => Err(RegistryError::UnknownToolReference {
            capability_id: descriptor.id.0.clone(),
            tool_id: missing.0,
        }),
        None => Ok(()),
    }
}
