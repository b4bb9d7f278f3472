// ABOUTME: Registry pattern for selecting a transport at startup.
// ABOUTME: Backends register factories; the session manager creates adapters by name.

use crate::traits::TransportAdapter;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory that builds a fresh adapter from its config table
pub type TransportFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn TransportAdapter>> + Send + Sync>;

/// Name-keyed transport factories
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a transport factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn TransportAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a transport by name with the given config
    pub fn create(&self, name: &str, config: &Value) -> Result<Arc<dyn TransportAdapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown transport: {}", name))?;
        factory(config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List available transport names
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        use crate::backends::multidevice::MultiDeviceTransport;
        use crate::backends::webclient::WebClientTransport;

        Self::new()
            .register("multidevice", MultiDeviceTransport::factory())
            .register("webclient", WebClientTransport::factory())
    }
}
