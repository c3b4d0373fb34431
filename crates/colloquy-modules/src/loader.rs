use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use colloquy_core::{AgentError, Result};
use colloquy_definition::{load_module, ModuleLocator, Step};

use crate::resolver::ModuleResolver;

/// An immutable, validated unit of exported templates and behaviors.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub locator: ModuleLocator,
    pub templates: HashMap<String, String>,
    pub behaviors: HashMap<String, Vec<Step>>,
}

/// Loads and caches modules by locator identity. Loads of the same locator
/// are serialized so concurrent requests resolve the source once.
pub struct ModuleLoader {
    resolver: Arc<dyn ModuleResolver>,
    cache: RwLock<HashMap<ModuleLocator, Arc<Module>>>,
    in_flight: parking_lot::Mutex<HashMap<ModuleLocator, Arc<Mutex<()>>>>,
}

impl ModuleLoader {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, locator: &ModuleLocator) -> Result<Arc<Module>> {
        if let Some(module) = self.cache.read().get(locator) {
            return Ok(module.clone());
        }

        let gate = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .entry(locator.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // a concurrent load may have won the gate first
        if let Some(module) = self.cache.read().get(locator) {
            return Ok(module.clone());
        }

        let source = self.resolver.resolve(locator).await?;
        let definition = load_module(&source)?;

        if let ModuleLocator::Bundled { bundled } = locator {
            if bundled != &definition.name {
                return Err(AgentError::ModuleLoad(format!(
                    "bundled locator '{}' resolved to module named '{}'",
                    bundled, definition.name
                )));
            }
        }

        let module = Arc::new(Module {
            name: definition.name,
            locator: locator.clone(),
            templates: definition.templates,
            behaviors: definition.behaviors,
        });
        tracing::info!(module = %module.name, locator = %locator, "module loaded");

        self.cache.write().insert(locator.clone(), module.clone());
        Ok(module)
    }

    pub fn cached(&self, locator: &ModuleLocator) -> Option<Arc<Module>> {
        self.cache.read().get(locator).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    const FORMS_MODULE: &str = r#"
version: 1
module: forms
templates:
  prompt: "Enter your id"
behaviors:
  collect:
    - render: prompt
"#;

    fn loader_with(locator: ModuleLocator, source: &str) -> ModuleLoader {
        let resolver = StaticResolver::new();
        resolver.insert(locator, source);
        ModuleLoader::new(Arc::new(resolver))
    }

    #[tokio::test]
    async fn test_load_and_cache() {
        let locator = ModuleLocator::bundled("forms");
        let loader = loader_with(locator.clone(), FORMS_MODULE);

        let first = loader.load(&locator).await.unwrap();
        let second = loader.load(&locator).await.unwrap();
        assert_eq!(first.name, "forms");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_bundled_name_mismatch() {
        let locator = ModuleLocator::bundled("other");
        let loader = loader_with(locator.clone(), FORMS_MODULE);
        let err = loader.load(&locator).await.unwrap_err();
        assert!(err.to_string().contains("resolved to module named 'forms'"));
    }

    #[tokio::test]
    async fn test_malformed_module_fails_that_load_only() {
        let good = ModuleLocator::bundled("forms");
        let bad = ModuleLocator::catalog("broken");
        let resolver = StaticResolver::new();
        resolver.insert(good.clone(), FORMS_MODULE);
        resolver.insert(bad.clone(), "version: 1\nmodule: [nope");
        let loader = ModuleLoader::new(Arc::new(resolver));

        assert!(loader.load(&bad).await.is_err());
        assert!(loader.load(&good).await.is_ok());
        assert_eq!(loader.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_resolve_once() {
        struct CountingResolver {
            inner: StaticResolver,
            count: std::sync::atomic::AtomicUsize,
        }

        #[async_trait::async_trait]
        impl ModuleResolver for CountingResolver {
            async fn resolve(&self, locator: &ModuleLocator) -> Result<String> {
                self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                self.inner.resolve(locator).await
            }
        }

        let locator = ModuleLocator::bundled("forms");
        let inner = StaticResolver::new();
        inner.insert(locator.clone(), FORMS_MODULE);
        let resolver = Arc::new(CountingResolver {
            inner,
            count: std::sync::atomic::AtomicUsize::new(0),
        });
        let loader = Arc::new(ModuleLoader::new(resolver.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                let locator = locator.clone();
                tokio::spawn(async move { loader.load(&locator).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(resolver.count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
