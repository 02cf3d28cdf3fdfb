//! Per-context state: globals, native bindings, and the host handle table.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bridge::HostValue;
use crate::engine::{CallScope, ContextHandle};
use crate::error::HostError;
use crate::value::{JsFunction, JsObject, JsObjectRef, JsString, JsValue};

/// Native binding callback. Receives already-bridged argument values and a
/// scope that permits re-entrant evaluation in the owning context.
pub type NativeFn = dyn FnMut(&mut CallScope<'_>, &[HostValue]) -> Result<HostValue, HostError>;

pub(crate) struct NativeSlot {
    pub name: JsString,
    pub func: Rc<RefCell<NativeFn>>,
}

/// One isolated global environment within an engine.
pub(crate) struct Context {
    pub id: ContextHandle,
    pub globals: FxHashMap<JsString, JsValue>,
    pub bindings: FxHashMap<u32, NativeSlot>,
    /// Host-side object handle table. Slots are never reused within a
    /// context; the whole table dies with the context, which is what
    /// invalidates every outstanding handle at once.
    pub handles: Vec<JsObjectRef>,
    /// Re-entrancy depth; nonzero while a run is in progress.
    pub call_depth: u32,
}

impl Context {
    pub fn new(id: ContextHandle) -> Self {
        let mut globals = FxHashMap::default();
        globals.insert(JsString::from("undefined"), JsValue::Undefined);
        globals.insert(JsString::from("NaN"), JsValue::Number(f64::NAN));
        globals.insert(JsString::from("Infinity"), JsValue::Number(f64::INFINITY));
        for name in ["Error", "TypeError", "RangeError", "ReferenceError"] {
            globals.insert(
                JsString::from(name),
                JsValue::object(JsObject::function(JsFunction::ErrorCtor {
                    name: JsString::from(name),
                })),
            );
        }
        Context {
            id,
            globals,
            bindings: FxHashMap::default(),
            handles: Vec::new(),
            call_depth: 0,
        }
    }

    /// Mint a host-side handle slot for an engine object.
    pub fn mint_handle(&mut self, obj: JsObjectRef) -> u32 {
        self.handles.push(obj);
        (self.handles.len() - 1) as u32
    }

    pub fn handle(&self, slot: u32) -> Result<&JsObjectRef, HostError> {
        self.handles
            .get(slot as usize)
            .ok_or(HostError::InvalidHandle("object handle"))
    }
}
