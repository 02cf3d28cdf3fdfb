//! Embeddable JavaScript execution host.
//!
//! A small engine for running untrusted scripts inside a larger
//! application: isolated execution contexts, a copy-based host/engine
//! value bridge, native function bindings, cooperative interruption,
//! approximate memory limits, and a versioned bytecode cache.
//!
//! ```
//! use jshost::{Engine, EngineConfig, HostValue};
//!
//! let mut engine = Engine::new(EngineConfig::new());
//! let ctx = engine.create_context();
//! let result = engine.eval(ctx, "6 * 7", "demo.js")?;
//! assert_eq!(result, HostValue::Number(42.0));
//! engine.destroy_context(ctx)?;
//! engine.shutdown()?;
//! # Ok::<(), jshost::HostError>(())
//! ```
//!
//! Scripts can call back into the host through installed bindings:
//!
//! ```
//! use jshost::{Engine, EngineConfig, HostValue};
//!
//! let mut engine = Engine::new(EngineConfig::new());
//! let ctx = engine.create_context();
//! engine.install_binding(ctx, "double", 1, |_scope, args| {
//!     let n = args.first().and_then(|v| v.as_number()).unwrap_or(0.0);
//!     Ok(HostValue::Number(n * 2.0))
//! })?;
//! let result = engine.eval(ctx, "double(21)", "demo.js")?;
//! assert_eq!(result, HostValue::Number(42.0));
//! engine.destroy_context(ctx)?;
//! # engine.shutdown()?;
//! # Ok::<(), jshost::HostError>(())
//! ```

mod ast;
mod compiler;
mod context;
mod lexer;
mod parser;
mod value;
mod vm;

pub mod bridge;
pub mod cache;
pub mod engine;
pub mod error;
pub mod lifecycle;

pub use bridge::{HostValue, ObjectHandle};
pub use context::NativeFn;
pub use engine::{CallScope, ContextHandle, Engine, EngineConfig, InterruptHandle};
pub use error::{ExceptionInfo, FrameInfo, HostError, SourceLocation};
pub use lifecycle::{with_engine, EngineScope, ResourceCounters};
