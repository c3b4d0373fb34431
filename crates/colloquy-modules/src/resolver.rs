use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

use colloquy_core::{AgentError, Result};
use colloquy_definition::ModuleLocator;

/// Resolves a locator to module source text. Bundled locators are typically
/// served from disk; catalog locators by an external lookup.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    async fn resolve(&self, locator: &ModuleLocator) -> Result<String>;
}

/// Resolves bundled modules from `<name>.module.yaml` files under a list of
/// search paths.
pub struct DirResolver {
    search_paths: Vec<PathBuf>,
}

impl DirResolver {
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from("modules")],
        }
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }
}

impl Default for DirResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleResolver for DirResolver {
    async fn resolve(&self, locator: &ModuleLocator) -> Result<String> {
        let name = match locator {
            ModuleLocator::Bundled { bundled } => bundled,
            ModuleLocator::Catalog { .. } => {
                return Err(AgentError::ModuleLoad(format!(
                    "no catalog backing for locator '{}'",
                    locator
                )));
            }
        };

        let file_name = format!("{}.module.yaml", name);
        for search_path in &self.search_paths {
            let path = search_path.join(&file_name);
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    AgentError::ModuleLoad(format!("failed to read {:?}: {}", path, e))
                });
            }
        }

        Err(AgentError::ModuleLoad(format!(
            "module '{}' not found in search paths: {:?}",
            name, self.search_paths
        )))
    }
}

/// In-process resolver over a fixed table. Backs tests and embedded
/// catalogs.
#[derive(Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<ModuleLocator, String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: ModuleLocator, source: impl Into<String>) {
        self.entries.write().insert(locator, source.into());
    }
}

#[async_trait]
impl ModuleResolver for StaticResolver {
    async fn resolve(&self, locator: &ModuleLocator) -> Result<String> {
        self.entries.read().get(locator).cloned().ok_or_else(|| {
            AgentError::ModuleLoad(format!("no entry for locator '{}'", locator))
        })
    }
}
