use std::fs;
use std::path::{Path, PathBuf};

use helmsman_core::domain::capability::CapabilityDescriptor;
use helmsman_core::domain::tool::ToolDescriptor;
use helmsman_core::errors::RegistryError;
use helmsman_core::registry::ConfigSource;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
    #[serde(default)]
    capabilities: Vec<CapabilityDescriptor>,
}

/// A capability catalog read from a TOML file with `[[tools]]` and
/// `[[capabilities]]` tables. The file is parsed once, at construction.
#[derive(Debug)]
pub struct TomlCatalogSource {
    path: PathBuf,
    document: CatalogDocument,
}

impl TomlCatalogSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let raw = fs::read_to_string(&path).map_err(|error| {
            RegistryError::Source(format!("could not read catalog `{}`: {error}", path.display()))
        })?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Result<Self, RegistryError> {
        let path = path.into();
        let document = toml::from_str::<CatalogDocument>(raw).map_err(|error| {
            RegistryError::Source(format!("could not parse catalog `{}`: {error}", path.display()))
        })?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for TomlCatalogSource {
    fn load_tools(&self) -> Result<Vec<ToolDescriptor>, RegistryError> {
        Ok(self.document.tools.clone())
    }

    fn load_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, RegistryError> {
        Ok(self.document.capabilities.clone())
    }
}
