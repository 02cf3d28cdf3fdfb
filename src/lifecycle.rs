//! Scoped engine lifecycle management.
//!
//! [`with_engine`] guarantees teardown in reverse creation order on every
//! exit path, including early returns and errors from the body. Resource
//! accounting is injected per engine through [`ResourceCounters`] rather
//! than kept in globals, so concurrent tests never observe each other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::{ContextHandle, Engine, EngineConfig};
use crate::error::HostError;

/// Live-object counters for leak detection.
#[derive(Debug, Default)]
pub struct ResourceCounters {
    engines: AtomicUsize,
    contexts: AtomicUsize,
}

impl ResourceCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(ResourceCounters::default())
    }

    pub fn live_engines(&self) -> usize {
        self.engines.load(Ordering::Relaxed)
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.load(Ordering::Relaxed)
    }

    pub(crate) fn engine_created(&self) {
        self.engines.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn engine_destroyed(&self) {
        self.engines.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn context_created(&self) {
        self.contexts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn context_destroyed(&self) {
        self.contexts.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An engine whose contexts are tracked for scoped teardown.
///
/// Derefs to [`Engine`] for evaluation and bindings; create contexts
/// through the scope so they participate in ordered teardown.
pub struct EngineScope {
    engine: Engine,
    contexts: Vec<ContextHandle>,
}

impl EngineScope {
    /// Create a context that the scope will destroy on exit (in reverse
    /// creation order) if the body has not destroyed it already.
    pub fn create_context(&mut self) -> ContextHandle {
        let handle = self.engine.create_context();
        self.contexts.push(handle);
        handle
    }

    /// Destroy a context early; the scope forgets it.
    pub fn destroy_context(&mut self, handle: ContextHandle) -> Result<(), HostError> {
        self.engine.destroy_context(handle)?;
        self.contexts.retain(|h| *h != handle);
        Ok(())
    }

    fn teardown(mut self) {
        for handle in std::mem::take(&mut self.contexts).into_iter().rev() {
            if let Err(e) = self.engine.destroy_context(handle) {
                // Already destroyed by the body; anything else is logged
                // and left to the engine's drop cleanup.
                if !matches!(e, HostError::InvalidHandle(_)) {
                    tracing::warn!(error = %e, "context teardown failed");
                }
            }
        }
        if let Err(e) = self.engine.shutdown() {
            tracing::warn!(error = %e, "engine shutdown deferred to drop");
        }
    }
}

impl std::ops::Deref for EngineScope {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}

impl std::ops::DerefMut for EngineScope {
    fn deref_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

/// Run `body` against a fresh engine and tear everything down afterwards.
///
/// Teardown happens whether the body succeeds or fails; the body's result
/// is returned either way.
pub fn with_engine<T>(
    config: EngineConfig,
    body: impl FnOnce(&mut EngineScope) -> Result<T, HostError>,
) -> Result<T, HostError> {
    let mut scope = EngineScope {
        engine: Engine::new(config),
        contexts: Vec::new(),
    };
    let result = body(&mut scope);
    scope.teardown();
    result
}
