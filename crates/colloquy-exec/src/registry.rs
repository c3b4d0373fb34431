use std::collections::HashMap;
use std::sync::Arc;

use colloquy_core::CapabilityAdapter;

/// Registered resource adapters, keyed by adapter id.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn CapabilityAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn CapabilityAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CapabilityAdapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }
}
