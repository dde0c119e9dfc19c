pub mod check;
pub mod config;
pub mod route;

use std::path::{Path, PathBuf};

use helmsman_core::config::{AppConfig, LoadOptions};
use helmsman_core::errors::RegistryError;
use helmsman_core::registry::Registries;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::TomlCatalogSource;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None::<Value>)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: impl Into<Option<Value>>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: data.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Config, catalog and registries, or the failure result each command reports.
pub(crate) struct Loaded {
    pub config: AppConfig,
    pub catalog_path: PathBuf,
    pub registries: Registries,
}

pub(crate) fn load_catalog(command: &str, catalog: Option<&Path>) -> Result<Loaded, CommandResult> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| CommandResult::failure(command, "config_validation", error.to_string(), 2))?;
    let catalog_path = catalog.map(Path::to_path_buf).unwrap_or_else(|| config.catalog.path.clone());

    let source = TomlCatalogSource::load(&catalog_path)
        .map_err(|error| CommandResult::failure(command, "catalog_source", error.to_string(), 3))?;
    let registries = Registries::bootstrap(&source).map_err(|error| {
        CommandResult::failure(command, registry_error_class(&error), error.to_string(), 4)
    })?;

    Ok(Loaded { config, catalog_path, registries })
}

pub(crate) fn registry_error_class(error: &RegistryError) -> &'static str {
    match error {
        RegistryError::Validation { .. } => "descriptor_validation",
        RegistryError::DuplicateId(_) => "duplicate_id",
        RegistryError::UnknownToolReference { .. } => "unknown_tool_reference",
        RegistryError::CircularDependency { .. } => "circular_dependency",
        RegistryError::UnknownDependency { .. } => "unknown_dependency",
        RegistryError::NotFound(_) => "not_found",
        RegistryError::Source(_) => "catalog_source",
    }
}
