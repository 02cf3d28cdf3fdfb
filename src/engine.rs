//! Engine instances and execution contexts.
//!
//! An [`Engine`] owns a set of isolated contexts, a shared memory gauge,
//! and a shared interrupt flag. Engines are single-threaded by
//! construction (`Rc` internals make them `!Send`); the one crossing point
//! is [`InterruptHandle`], which is `Send` and lets another thread request
//! cancellation of whatever the engine is running.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bridge::{self, HostValue, ObjectHandle};
use crate::cache;
use crate::compiler::{compile_program, Chunk};
use crate::context::{Context, NativeFn, NativeSlot};
use crate::error::HostError;
use crate::lifecycle::ResourceCounters;
use crate::parser::Parser;
use crate::value::{JsFunction, JsObject, JsString, JsValue};
use crate::vm;

/// Cap on native-to-script re-entrancy through [`CallScope::eval`].
const MAX_REENTRANT_DEPTH: u32 = 64;

/// Identifies one context within an engine.
///
/// Generation-tagged: destroying a context and reusing its slot produces a
/// handle with a higher generation, so stale handles fail cleanly instead
/// of reaching the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ContextHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        ContextHandle { index, generation }
    }
}

/// Thread-safe trigger for cooperative cancellation.
///
/// The running script observes the flag at the next instruction boundary
/// and fails with [`HostError::Interrupted`]. The flag is sticky: clear it
/// before the next evaluation to resume normal service.
#[derive(Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Approximate heap accounting shared by every context in an engine.
///
/// Charges are recorded at allocation sites with rough size estimates and
/// are monotonic within a run; this deliberately overestimates rather than
/// tracking frees, so the limit is a ceiling on cumulative allocation.
pub(crate) struct MemoryGauge {
    used: Cell<usize>,
    limit: Option<usize>,
}

impl MemoryGauge {
    pub fn new(limit: Option<usize>) -> Self {
        MemoryGauge {
            used: Cell::new(0),
            limit,
        }
    }

    pub fn charge(&self, bytes: usize) -> Result<(), HostError> {
        let used = self.used.get().saturating_add(bytes);
        self.used.set(used);
        match self.limit {
            Some(limit) if used > limit => Err(HostError::OutOfMemory { limit }),
            _ => Ok(()),
        }
    }

    pub fn used(&self) -> usize {
        self.used.get()
    }
}

/// Shared run-time services a VM invocation needs.
#[derive(Clone)]
pub(crate) struct RunEnv {
    pub gauge: Rc<MemoryGauge>,
    pub interrupt: Arc<AtomicBool>,
    pub handler: Option<Rc<dyn Fn() -> bool>>,
}

/// Engine construction options.
#[derive(Default)]
pub struct EngineConfig {
    memory_limit: Option<usize>,
    interrupt_handler: Option<Rc<dyn Fn() -> bool>>,
    counters: Option<Arc<ResourceCounters>>,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig::default()
    }

    /// Cap cumulative heap allocation, in bytes. Exceeding the cap fails
    /// the offending evaluation with [`HostError::OutOfMemory`]; the
    /// engine itself stays usable.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Install a handler polled periodically during execution; returning
    /// `true` interrupts the running script. Useful for deadline checks.
    pub fn with_interrupt_handler(mut self, handler: impl Fn() -> bool + 'static) -> Self {
        self.interrupt_handler = Some(Rc::new(handler));
        self
    }

    /// Report engine and context lifetimes to an external counter set,
    /// typically a leak detector in tests.
    pub fn with_counters(mut self, counters: Arc<ResourceCounters>) -> Self {
        self.counters = Some(counters);
        self
    }
}

/// A JavaScript engine instance.
pub struct Engine {
    slots: Vec<Option<Context>>,
    generations: Vec<u32>,
    /// Live handles in creation order, for ordered teardown.
    creation_order: Vec<ContextHandle>,
    env: RunEnv,
    counters: Option<Arc<ResourceCounters>>,
    next_binding_id: u32,
    shut_down: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        if let Some(counters) = &config.counters {
            counters.engine_created();
        }
        tracing::debug!(
            memory_limit = ?config.memory_limit,
            "engine created"
        );
        Engine {
            slots: Vec::new(),
            generations: Vec::new(),
            creation_order: Vec::new(),
            env: RunEnv {
                gauge: Rc::new(MemoryGauge::new(config.memory_limit)),
                interrupt: Arc::new(AtomicBool::new(false)),
                handler: config.interrupt_handler,
            },
            counters: config.counters,
            next_binding_id: 0,
            shut_down: false,
        }
    }

    /// Create a fresh, isolated execution context.
    pub fn create_context(&mut self) -> ContextHandle {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        let generation = self.generations.get(index).copied().unwrap_or(0);
        let handle = ContextHandle::new(index as u32, generation);
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(Context::new(handle));
        }
        self.creation_order.push(handle);
        if let Some(counters) = &self.counters {
            counters.context_created();
        }
        tracing::debug!(index, generation, "context created");
        handle
    }

    /// Destroy a context, invalidating every outstanding value handle that
    /// was minted from it.
    pub fn destroy_context(&mut self, handle: ContextHandle) -> Result<(), HostError> {
        {
            let ctx = self.ctx(handle)?;
            if ctx.call_depth > 0 {
                return Err(HostError::ContextBusy);
            }
        }
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            *slot = None;
        }
        if let Some(generation) = self.generations.get_mut(handle.index as usize) {
            *generation = generation.wrapping_add(1);
        }
        self.creation_order.retain(|h| *h != handle);
        if let Some(counters) = &self.counters {
            counters.context_destroyed();
        }
        tracing::debug!(index = handle.index, "context destroyed");
        Ok(())
    }

    /// Compile and run a script, returning its completion value.
    pub fn eval(
        &mut self,
        context: ContextHandle,
        source: &str,
        filename: &str,
    ) -> Result<HostValue, HostError> {
        let chunk = compile_source(source, filename)?;
        self.run(context, Rc::new(chunk))
    }

    /// Compile a script to a cacheable bytecode blob without running it.
    pub fn compile(&self, source: &str, filename: &str) -> Result<Vec<u8>, HostError> {
        let chunk = compile_source(source, filename)?;
        cache::encode(&chunk)
    }

    /// Run a previously compiled blob. Fails with
    /// [`HostError::CacheVersionMismatch`] when the blob was produced by an
    /// incompatible build; callers fall back to [`Engine::eval`] on the
    /// original source.
    pub fn eval_bytecode(
        &mut self,
        context: ContextHandle,
        blob: &[u8],
    ) -> Result<HostValue, HostError> {
        let chunk = cache::decode(blob)?;
        self.run(context, Rc::new(chunk))
    }

    fn run(&mut self, context: ContextHandle, chunk: Rc<Chunk>) -> Result<HostValue, HostError> {
        let env = self.env.clone();
        let ctx = self.ctx_mut(context)?;
        if ctx.call_depth > 0 {
            return Err(HostError::ContextBusy);
        }
        ctx.call_depth += 1;
        let result = vm::run_chunk(ctx, chunk, &env);
        ctx.call_depth -= 1;
        let value = result?;
        bridge::to_host(ctx, &value)
    }

    /// Install a host callback as a global function in one context.
    ///
    /// The callback runs synchronously on the engine thread when script
    /// calls the global. Errors it returns surface in script as catchable
    /// exceptions marked as native-origin, except interrupts and
    /// out-of-memory, which abort the evaluation.
    pub fn install_binding(
        &mut self,
        context: ContextHandle,
        name: &str,
        arity: u8,
        func: impl FnMut(&mut CallScope<'_>, &[HostValue]) -> Result<HostValue, HostError> + 'static,
    ) -> Result<(), HostError> {
        let binding_id = self.next_binding_id;
        self.next_binding_id = self.next_binding_id.wrapping_add(1);
        let ctx = self.ctx_mut(context)?;
        let func: Rc<RefCell<NativeFn>> = Rc::new(RefCell::new(func));
        ctx.bindings.insert(
            binding_id,
            NativeSlot {
                name: JsString::from(name),
                func,
            },
        );
        ctx.globals.insert(
            JsString::from(name),
            JsValue::object(JsObject::function(JsFunction::Native {
                name: JsString::from(name),
                arity,
                binding_id,
            })),
        );
        tracing::debug!(name, binding_id, "binding installed");
        Ok(())
    }

    /// Call a script function previously obtained as a
    /// [`HostValue::FunctionRef`].
    pub fn call_function(
        &mut self,
        handle: &ObjectHandle,
        args: &[HostValue],
    ) -> Result<HostValue, HostError> {
        let env = self.env.clone();
        let ctx = self.ctx_mut(handle.context)?;
        if ctx.call_depth > 0 {
            return Err(HostError::ContextBusy);
        }
        let func = JsValue::Object(ctx.handle(handle.slot)?.clone());
        if !func.is_callable() {
            return Err(HostError::marshal("handle does not refer to a function"));
        }
        let mut engine_args = Vec::with_capacity(args.len());
        for arg in args {
            engine_args.push(bridge::to_engine(ctx, arg, &env.gauge)?);
        }
        ctx.call_depth += 1;
        let result = vm::call_value(ctx, &func, &engine_args, &env);
        ctx.call_depth -= 1;
        let value = result?;
        bridge::to_host(ctx, &value)
    }

    /// Snapshot the object behind a handle. Fails with
    /// [`HostError::InvalidHandle`] once the owning context is gone.
    pub fn deref(&mut self, handle: &ObjectHandle) -> Result<HostValue, HostError> {
        let ctx = self.ctx_mut(handle.context)?;
        bridge::deref_object(ctx, handle.slot)
    }

    /// Set or clear the shared interrupt flag.
    pub fn set_interrupt(&self, on: bool) {
        self.env.interrupt.store(on, Ordering::Relaxed);
    }

    /// A `Send` handle other threads can use to interrupt execution.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.env.interrupt))
    }

    /// Cumulative bytes charged against the memory gauge.
    pub fn memory_used(&self) -> usize {
        self.env.gauge.used()
    }

    pub fn live_contexts(&self) -> usize {
        self.creation_order.len()
    }

    /// Orderly teardown. Refuses while contexts are still live so leaks
    /// show up as errors at the call site instead of being absorbed.
    pub fn shutdown(&mut self) -> Result<(), HostError> {
        if !self.creation_order.is_empty() {
            return Err(HostError::LiveContexts {
                count: self.creation_order.len(),
            });
        }
        if !self.shut_down {
            self.shut_down = true;
            if let Some(counters) = &self.counters {
                counters.engine_destroyed();
            }
            tracing::debug!("engine shut down");
        }
        Ok(())
    }

    fn ctx(&self, handle: ContextHandle) -> Result<&Context, HostError> {
        self.slots
            .get(handle.index as usize)
            .and_then(Option::as_ref)
            .filter(|ctx| ctx.id == handle)
            .ok_or(HostError::InvalidHandle("context"))
    }

    fn ctx_mut(&mut self, handle: ContextHandle) -> Result<&mut Context, HostError> {
        self.slots
            .get_mut(handle.index as usize)
            .and_then(Option::as_mut)
            .filter(|ctx| ctx.id == handle)
            .ok_or(HostError::InvalidHandle("context"))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let leaked = self.creation_order.len();
        if leaked > 0 {
            tracing::warn!(leaked, "engine dropped with live contexts");
        }
        for handle in std::mem::take(&mut self.creation_order).into_iter().rev() {
            if let Some(slot) = self.slots.get_mut(handle.index as usize) {
                *slot = None;
            }
            if let Some(counters) = &self.counters {
                counters.context_destroyed();
            }
        }
        if !self.shut_down {
            if let Some(counters) = &self.counters {
                counters.engine_destroyed();
            }
        }
    }
}

/// Execution scope passed to native bindings.
///
/// Grants re-entrant evaluation in the context the binding was called
/// from, and only that context; a binding can never reach across contexts
/// or touch engine lifecycle.
pub struct CallScope<'a> {
    pub(crate) ctx: &'a mut Context,
    pub(crate) env: &'a RunEnv,
}

impl CallScope<'_> {
    /// The context this call is executing in.
    pub fn context(&self) -> ContextHandle {
        self.ctx.id
    }

    /// Evaluate script re-entrantly in the calling context.
    pub fn eval(&mut self, source: &str, filename: &str) -> Result<HostValue, HostError> {
        if self.ctx.call_depth >= MAX_REENTRANT_DEPTH {
            return Err(HostError::ContextBusy);
        }
        let chunk = compile_source(source, filename)?;
        self.ctx.call_depth += 1;
        let result = vm::run_chunk(self.ctx, Rc::new(chunk), self.env);
        self.ctx.call_depth -= 1;
        let value = result?;
        bridge::to_host(self.ctx, &value)
    }
}

fn compile_source(source: &str, filename: &str) -> Result<Chunk, HostError> {
    let program = Parser::new(source)?.parse_program()?;
    compile_program(&program, filename)
}
