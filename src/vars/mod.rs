//! Variable scopes and providers
//!
//! Variables are plain strings published by the orchestrator as an activation
//! progresses. A [`LocalScope`] belongs to one node or instance; the single
//! [`GlobalScope`] of an activation additionally dispatches `prefix:reference`
//! names to registered [`VarProvider`]s, some of which block until another
//! node or instance publishes the requested value.

pub mod env;
pub mod xref;

pub use env::EnvProvider;
pub use xref::CrossReference;

use crate::orchestrator::{InstanceState, NodeState, RunState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Who is asking for a variable
///
/// Cross-reference providers use the requester to avoid waiting on values
/// the requester itself is responsible for publishing.
#[derive(Clone, Copy)]
pub struct VarContext<'a> {
    pub run: &'a RunState,
    pub node: Option<&'a NodeState>,
    pub instance: Option<&'a InstanceState>,
}

impl<'a> VarContext<'a> {
    /// Context outside any node
    pub fn cluster(run: &'a RunState) -> Self {
        Self {
            run,
            node: None,
            instance: None,
        }
    }

    /// Context of a node task
    pub fn node(run: &'a RunState, node: &'a NodeState) -> Self {
        Self {
            run,
            node: Some(node),
            instance: None,
        }
    }

    /// Context of an instance task
    pub fn instance(run: &'a RunState, node: &'a NodeState, instance: &'a InstanceState) -> Self {
        Self {
            run,
            node: Some(node),
            instance: Some(instance),
        }
    }
}

/// Resolves names of the form `prefix:reference`
#[async_trait]
pub trait VarProvider: Send + Sync {
    /// Look up `reference` for the provider key `prefix`
    async fn query(&self, prefix: &str, reference: &str, ctx: &VarContext<'_>) -> Option<String>;
}

/// Flat key/value scope
///
/// Values are only ever added or overwritten, never removed.
#[derive(Debug, Default)]
pub struct LocalScope {
    values: RwLock<HashMap<String, String>>,
}

impl LocalScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Publish a value
    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.into());
    }
}

/// Activation-wide scope with prefix-dispatched providers
pub struct GlobalScope {
    local: LocalScope,
    providers: HashMap<String, Arc<dyn VarProvider>>,
}

impl GlobalScope {
    /// Scope without any provider
    pub fn empty() -> Self {
        Self {
            local: LocalScope::new(),
            providers: HashMap::new(),
        }
    }

    /// Scope with the `env`, `instances`, `ip` and `mac` providers
    pub fn with_builtin_providers() -> Self {
        let mut scope = Self::empty();
        scope.register("env", Arc::new(EnvProvider));

        let xref: Arc<dyn VarProvider> = Arc::new(CrossReference);
        for prefix in xref::PREFIXES {
            scope.register(prefix, Arc::clone(&xref));
        }
        scope
    }

    /// Register a provider for names starting with `prefix:`
    pub fn register(&mut self, prefix: &str, provider: Arc<dyn VarProvider>) {
        self.providers.insert(prefix.to_string(), provider);
    }

    /// Publish a value
    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.local.set(name, value);
    }

    /// Look up a name, consulting providers for `prefix:reference` names
    ///
    /// May block when the provider waits on another task.
    pub async fn query(&self, name: &str, ctx: &VarContext<'_>) -> Option<String> {
        if let Some(value) = self.local.get(name) {
            return Some(value);
        }

        let (prefix, reference) = name.split_once(':')?;
        if prefix.is_empty() {
            return None;
        }
        let provider = self.providers.get(prefix)?;
        provider.query(prefix, reference, ctx).await
    }
}
