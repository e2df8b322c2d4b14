//! Adapter registry
//!
//! Explicit map from source identifier to its adapter, built once at startup
//! and shared by reference.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    AdapterError, CrmAdapter, EcommerceAdapter, ErpAdapter, ManualAdapter, OmsAdapter,
    SourceAdapter, TmsAdapter, WfmAdapter,
};

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the seven built-in upstream adapters.
    pub fn with_default_adapters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ErpAdapter));
        registry.register(Arc::new(OmsAdapter));
        registry.register(Arc::new(TmsAdapter));
        registry.register(Arc::new(CrmAdapter));
        registry.register(Arc::new(EcommerceAdapter));
        registry.register(Arc::new(WfmAdapter));
        registry.register(Arc::new(ManualAdapter));
        registry
    }

    /// Register an adapter under its own source name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.source().as_str().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!(source = %name, "Replaced previously registered adapter");
        }
    }

    pub fn get_adapter(&self, source: &str) -> Result<Arc<dyn SourceAdapter>, AdapterError> {
        self.adapters
            .get(source)
            .cloned()
            .ok_or_else(|| AdapterError::UnregisteredSource {
                system: source.to_string(),
            })
    }

    /// Registered source names, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
