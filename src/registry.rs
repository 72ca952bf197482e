//! Registry mapping module references to implementation factories.
//!
//! Stage configs refer to enrichment modules by name; the registry turns
//! those names into live [`EnrichmentModule`] instances. This replaces
//! reflection-style class loading with an explicit lookup table: "pluggable
//! by configuration" without any dynamic loading machinery.
//!
//! Resolution rules:
//! - no module reference, or a reference the registry doesn't know, resolves
//!   to the no-op [`Passthrough`] — a misconfigured optional stage degrades
//!   gracefully instead of failing the pipeline;
//! - a factory that fails is fatal: the error propagates and aborts the task.
//!
//! # Example
//! ```
//! use enrichflow::registry::ModuleRegistry;
//! use enrichflow::stage::Passthrough;
//!
//! let mut registry = ModuleRegistry::new();
//! registry.register("noop", || Ok(Box::new(Passthrough)));
//!
//! let module = registry.instantiate(Some("noop")).unwrap();
//! let fallback = registry.instantiate(Some("never_registered")).unwrap();
//! ```

use std::collections::HashMap;

use anyhow::Result;
use log::debug;

use crate::stage::{EnrichmentModule, Passthrough};

/// Factory producing a fresh module instance per stage binding.
pub type ModuleFactory = Box<dyn Fn() -> Result<Box<dyn EnrichmentModule>> + Send + Sync>;

/// Lookup table from module reference to factory.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn EnrichmentModule>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the module for the given reference.
    ///
    /// `None` and unknown references fall back to [`Passthrough`].
    ///
    /// # Errors
    /// Propagates the factory's error; callers treat this as fatal.
    pub fn instantiate(&self, reference: Option<&str>) -> Result<Box<dyn EnrichmentModule>> {
        match reference {
            Some(name) => match self.factories.get(name) {
                Some(factory) => factory(),
                None => {
                    debug!("no module registered as {name:?}, using passthrough");
                    Ok(Box::new(Passthrough))
                }
            },
            None => Ok(Box::new(Passthrough)),
        }
    }
}
