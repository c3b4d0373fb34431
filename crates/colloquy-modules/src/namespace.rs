use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use colloquy_core::{AgentError, Result};
use colloquy_definition::{ModuleLocator, Step};

use crate::loader::Module;

/// Module exports merged under `<module>.<export>` names. Read-mostly and
/// safe for concurrent readers; merges are atomic, so a failed merge leaves
/// the namespace untouched.
#[derive(Default)]
pub struct Namespace {
    inner: RwLock<NamespaceInner>,
}

#[derive(Default)]
struct NamespaceInner {
    merged: HashMap<String, ModuleLocator>,
    templates: HashMap<String, String>,
    behaviors: HashMap<String, Arc<Vec<Step>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.inner.read().merged.contains_key(name)
    }

    pub fn template(&self, qualified: &str) -> Option<String> {
        self.inner.read().templates.get(qualified).cloned()
    }

    pub fn behavior(&self, qualified: &str) -> Option<Arc<Vec<Step>>> {
        self.inner.read().behaviors.get(qualified).cloned()
    }

    /// Merge a loaded module's exports. Re-merging the same module from the
    /// same locator is a no-op; the same name from a different locator, or
    /// any colliding export name, is an error and nothing is merged.
    pub fn merge(&self, module: &Module) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.merged.get(&module.name) {
            if existing == &module.locator {
                return Ok(());
            }
            return Err(AgentError::ModuleLoad(format!(
                "module name '{}' already merged from '{}'",
                module.name, existing
            )));
        }

        let template_keys: Vec<String> = module
            .templates
            .keys()
            .map(|k| format!("{}.{}", module.name, k))
            .collect();
        let behavior_keys: Vec<String> = module
            .behaviors
            .keys()
            .map(|k| format!("{}.{}", module.name, k))
            .collect();

        for key in template_keys.iter() {
            if inner.templates.contains_key(key) {
                return Err(AgentError::ModuleLoad(format!(
                    "template '{}' collides with an already-loaded export",
                    key
                )));
            }
        }
        for key in behavior_keys.iter() {
            if inner.behaviors.contains_key(key) {
                return Err(AgentError::ModuleLoad(format!(
                    "behavior '{}' collides with an already-loaded export",
                    key
                )));
            }
        }

        for (name, source) in &module.templates {
            inner
                .templates
                .insert(format!("{}.{}", module.name, name), source.clone());
        }
        for (name, steps) in &module.behaviors {
            inner
                .behaviors
                .insert(format!("{}.{}", module.name, name), Arc::new(steps.clone()));
        }
        inner
            .merged
            .insert(module.name.clone(), module.locator.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, locator: ModuleLocator) -> Module {
        let mut templates = HashMap::new();
        templates.insert("prompt".to_string(), "Enter your id".to_string());
        let mut behaviors = HashMap::new();
        behaviors.insert(
            "collect".to_string(),
            vec![Step::Render {
                render: "prompt".to_string(),
                store_as: None,
            }],
        );
        Module {
            name: name.to_string(),
            locator,
            templates,
            behaviors,
        }
    }

    #[test]
    fn test_merge_and_lookup() {
        let ns = Namespace::new();
        ns.merge(&module("forms", ModuleLocator::bundled("forms")))
            .unwrap();

        assert!(ns.has_module("forms"));
        assert_eq!(ns.template("forms.prompt"), Some("Enter your id".into()));
        assert!(ns.behavior("forms.collect").is_some());
        assert!(ns.template("forms.other").is_none());
    }

    #[test]
    fn test_remerge_same_locator_is_noop() {
        let ns = Namespace::new();
        let m = module("forms", ModuleLocator::bundled("forms"));
        ns.merge(&m).unwrap();
        ns.merge(&m).unwrap();
        assert!(ns.has_module("forms"));
    }

    #[test]
    fn test_same_name_different_locator_collides() {
        let ns = Namespace::new();
        ns.merge(&module("forms", ModuleLocator::bundled("forms")))
            .unwrap();
        let err = ns
            .merge(&module("forms", ModuleLocator::catalog("forms-v2")))
            .unwrap_err();
        assert!(matches!(err, AgentError::ModuleLoad(_)));
        // the first registration still wins
        assert_eq!(ns.template("forms.prompt"), Some("Enter your id".into()));
    }
}
