use std::path::PathBuf;

use helmsman_core::domain::tool::{CostClass, ToolCategory};
use helmsman_core::supervisor::rules::ordering_constraints;
use serde_json::json;

use crate::commands::{load_catalog, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub catalog: Option<PathBuf>,
    /// Only list tools in this category.
    pub category: Option<ToolCategory>,
    /// Only list tools with this cost class.
    pub cost: Option<CostClass>,
}

pub fn run(args: &CheckArgs) -> CommandResult {
    let loaded = match load_catalog("check", args.catalog.as_deref()) {
        Ok(loaded) => loaded,
        Err(failure) => return failure,
    };
    let tools = &loaded.registries.tools;
    let capabilities = &loaded.registries.capabilities;

    let disabled = capabilities
        .get_all()
        .into_iter()
        .filter(|descriptor| !descriptor.enabled)
        .map(|descriptor| descriptor.id.to_string())
        .collect::<Vec<_>>();
    let deprecated = tools
        .all()
        .into_iter()
        .filter(|tool| tool.deprecated)
        .map(|tool| tool.id.to_string())
        .collect::<Vec<_>>();
    let ordering = ordering_constraints(capabilities)
        .into_iter()
        .map(|constraint| format!("{} -> {}", constraint.before, constraint.after))
        .collect::<Vec<_>>();
    let health = tools
        .all()
        .into_iter()
        .filter(|tool| args.category.map_or(true, |category| tool.category == category))
        .filter(|tool| args.cost.map_or(true, |cost| tool.cost == cost))
        .map(|tool| {
            json!({
                "id": tool.id,
                "category": tool.category,
                "cost": tool.cost,
                "total_calls": tool.metrics.total_calls,
                "success_rate": tool.metrics.success_rate(),
            })
        })
        .collect::<Vec<_>>();

    let data = json!({
        "catalog": loaded.catalog_path.display().to_string(),
        "tools": tools.len(),
        "capabilities": capabilities
            .get_all()
            .into_iter()
            .map(|descriptor| descriptor.id.to_string())
            .collect::<Vec<_>>(),
        "disabled": disabled,
        "deprecated_tools": deprecated,
        "ordering": ordering,
        "tool_health": health,
    });

    CommandResult::success_with_data(
        "check",
        format!(
            "catalog valid: {} tools, {} capabilities",
            tools.len(),
            capabilities.len()
        ),
        data,
    )
}
