//! Value bridging between host and engine representations.
//!
//! Plain data (primitives, arrays, objects) crosses the boundary by deep
//! copy, so host values never alias engine heap state. Functions cannot be
//! copied and cross as opaque [`ObjectHandle`]s instead; a handle stays
//! valid until its owning context is destroyed.

use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::engine::{ContextHandle, MemoryGauge};
use crate::error::HostError;
use crate::value::{CheapClone, ExoticObject, JsObject, JsObjectRef, JsString, JsValue};

/// Per-value heap cost estimates mirrored from the VM's allocation charges.
const STRING_BASE: usize = 24;
const OBJECT: usize = 64;
const ARRAY_BASE: usize = 48;
const ARRAY_ELEMENT: usize = 16;
const PROPERTY: usize = 32;

/// An opaque reference to an object living inside one context.
///
/// Handles are index-based, not pointers; a stale handle (context already
/// destroyed) is a recoverable [`HostError::InvalidHandle`], never UB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub(crate) context: ContextHandle,
    pub(crate) slot: u32,
}

impl ObjectHandle {
    /// The context this handle belongs to.
    pub fn context(&self) -> ContextHandle {
        self.context
    }
}

/// A host-side JavaScript value.
///
/// Owned and tree-shaped; sending one into the engine copies it, so the
/// host can keep or drop it freely afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    /// Insertion-ordered key/value pairs.
    Object(Vec<(String, HostValue)>),
    /// Handle to an engine object, resolved when sent into the engine.
    ///
    /// Input-only: conversion out of the engine deep-copies plain objects
    /// and arrays into [`HostValue::Object`]/[`HostValue::Array`] and mints
    /// handles only for functions, so this variant is never produced by
    /// the bridge. It lets a host pass a previously obtained handle back
    /// in value position.
    ObjectRef(ObjectHandle),
    /// Reference to an engine function, callable via
    /// [`Engine::call_function`](crate::Engine::call_function).
    FunctionRef(ObjectHandle),
}

impl HostValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    /// Look up a key in an object value.
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Convert a JSON document into a host value. Infallible: JSON is a
    /// strict subset of what `HostValue` represents.
    pub fn from_json(json: &JsonValue) -> HostValue {
        match json {
            JsonValue::Null => HostValue::Null,
            JsonValue::Bool(b) => HostValue::Bool(*b),
            JsonValue::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => HostValue::String(s.clone()),
            JsonValue::Array(items) => {
                HostValue::Array(items.iter().map(HostValue::from_json).collect())
            }
            JsonValue::Object(map) => HostValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), HostValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON, following `JSON.stringify` conventions: `undefined`
    /// and non-finite numbers become `null`. Engine references have no JSON
    /// form and fail with a marshal error.
    pub fn to_json(&self) -> Result<JsonValue, HostError> {
        match self {
            HostValue::Undefined | HostValue::Null => Ok(JsonValue::Null),
            HostValue::Bool(b) => Ok(JsonValue::Bool(*b)),
            HostValue::Number(n) => Ok(serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)),
            HostValue::String(s) => Ok(JsonValue::String(s.clone())),
            HostValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json()?);
                }
                Ok(JsonValue::Array(out))
            }
            HostValue::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json()?);
                }
                Ok(JsonValue::Object(map))
            }
            HostValue::ObjectRef(_) | HostValue::FunctionRef(_) => {
                Err(HostError::marshal("engine references have no JSON form"))
            }
        }
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

/// Copy an engine value out to the host.
///
/// Plain arrays and objects convert deeply; functions get a handle minted
/// in the context's handle table. Cyclic object graphs cannot be expressed
/// as host trees and fail with a marshal error.
pub(crate) fn to_host(ctx: &mut Context, value: &JsValue) -> Result<HostValue, HostError> {
    let mut visiting: Vec<*const std::cell::RefCell<JsObject>> = Vec::new();
    to_host_inner(ctx, value, &mut visiting)
}

fn to_host_inner(
    ctx: &mut Context,
    value: &JsValue,
    visiting: &mut Vec<*const std::cell::RefCell<JsObject>>,
) -> Result<HostValue, HostError> {
    match value {
        JsValue::Undefined => Ok(HostValue::Undefined),
        JsValue::Null => Ok(HostValue::Null),
        JsValue::Boolean(b) => Ok(HostValue::Bool(*b)),
        JsValue::Number(n) => Ok(HostValue::Number(*n)),
        JsValue::String(s) => Ok(HostValue::String(s.as_str().to_string())),
        JsValue::Object(obj) => to_host_object(ctx, obj, visiting),
    }
}

fn to_host_object(
    ctx: &mut Context,
    obj: &JsObjectRef,
    visiting: &mut Vec<*const std::cell::RefCell<JsObject>>,
) -> Result<HostValue, HostError> {
    let ptr = std::rc::Rc::as_ptr(obj);
    if visiting.contains(&ptr) {
        return Err(HostError::marshal("cyclic object graph"));
    }

    // Functions are handled without entering the visit set; they are
    // conversion leaves.
    if obj.borrow().is_callable() {
        let slot = ctx.mint_handle(obj.cheap_clone());
        return Ok(HostValue::FunctionRef(ObjectHandle {
            context: ctx.id,
            slot,
        }));
    }

    visiting.push(ptr);
    let result = {
        let borrowed = obj.borrow();
        match &borrowed.exotic {
            ExoticObject::Array { elements } => {
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    out.push(to_host_inner(ctx, element, visiting)?);
                }
                Ok(HostValue::Array(out))
            }
            ExoticObject::Ordinary | ExoticObject::Error { .. } => {
                let mut out = Vec::with_capacity(borrowed.properties.len());
                for (key, value) in &borrowed.properties {
                    out.push((
                        key.as_str().to_string(),
                        to_host_inner(ctx, value, visiting)?,
                    ));
                }
                Ok(HostValue::Object(out))
            }
            ExoticObject::Function(_) => Err(HostError::marshal("unexpected function")),
        }
    };
    visiting.pop();
    result
}

/// Copy a host value into the engine, charging the memory gauge for the
/// heap it creates. References must belong to the receiving context.
pub(crate) fn to_engine(
    ctx: &Context,
    value: &HostValue,
    gauge: &MemoryGauge,
) -> Result<JsValue, HostError> {
    match value {
        HostValue::Undefined => Ok(JsValue::Undefined),
        HostValue::Null => Ok(JsValue::Null),
        HostValue::Bool(b) => Ok(JsValue::Boolean(*b)),
        HostValue::Number(n) => Ok(JsValue::Number(*n)),
        HostValue::String(s) => {
            gauge.charge(STRING_BASE + s.len())?;
            Ok(JsValue::from(s.as_str()))
        }
        HostValue::Array(items) => {
            gauge.charge(ARRAY_BASE + ARRAY_ELEMENT * items.len())?;
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(to_engine(ctx, item, gauge)?);
            }
            Ok(JsValue::object(JsObject::array(elements)))
        }
        HostValue::Object(entries) => {
            gauge.charge(OBJECT + PROPERTY * entries.len())?;
            let mut obj = JsObject::ordinary();
            for (key, value) in entries {
                obj.set_property(JsString::from(key.as_str()), to_engine(ctx, value, gauge)?);
            }
            Ok(JsValue::object(obj))
        }
        HostValue::ObjectRef(handle) | HostValue::FunctionRef(handle) => {
            if handle.context != ctx.id {
                return Err(HostError::marshal("handle belongs to another context"));
            }
            Ok(JsValue::Object(ctx.handle(handle.slot)?.cheap_clone()))
        }
    }
}

/// Snapshot the object an existing handle refers to.
///
/// Functions carry no copyable data, so dereferencing a function handle
/// yields a snapshot of its plain properties (usually empty).
pub(crate) fn deref_object(ctx: &mut Context, slot: u32) -> Result<HostValue, HostError> {
    let obj = ctx.handle(slot)?.cheap_clone();
    if obj.borrow().is_callable() {
        let mut out = Vec::new();
        let keys: Vec<JsString> = obj.borrow().properties.keys().cloned().collect();
        for key in keys {
            let value = obj.borrow().get_property(key.as_str()).unwrap_or_default();
            out.push((key.as_str().to_string(), to_host(ctx, &value)?));
        }
        Ok(HostValue::Object(out))
    } else {
        to_host(ctx, &JsValue::Object(obj))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::ContextHandle;
    use crate::value::JsValue;

    fn test_context() -> Context {
        Context::new(ContextHandle::new(0, 0))
    }

    fn unlimited() -> MemoryGauge {
        MemoryGauge::new(None)
    }

    #[test]
    fn plain_tree_round_trips_unchanged() {
        let mut ctx = test_context();
        let gauge = unlimited();
        let original = HostValue::Object(vec![
            ("n".to_string(), HostValue::Number(1.5)),
            ("s".to_string(), HostValue::String("hi".to_string())),
            (
                "a".to_string(),
                HostValue::Array(vec![HostValue::Bool(true), HostValue::Null]),
            ),
        ]);
        let engine_value = to_engine(&ctx, &original, &gauge).unwrap();
        let back = to_host(&mut ctx, &engine_value).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn cyclic_engine_value_fails_marshal() {
        let mut ctx = test_context();
        let arr = JsValue::object(JsObject::array(vec![JsValue::Undefined]));
        if let Some(obj) = arr.as_object() {
            let self_ref = arr.clone();
            obj.borrow_mut().set_property(JsString::from("0"), self_ref);
        }
        let err = to_host(&mut ctx, &arr).unwrap_err();
        assert!(matches!(err, HostError::Marshal(_)));
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let ctx = test_context();
        let gauge = unlimited();
        let foreign = HostValue::ObjectRef(ObjectHandle {
            context: ContextHandle::new(7, 3),
            slot: 0,
        });
        let err = to_engine(&ctx, &foreign, &gauge).unwrap_err();
        assert!(matches!(err, HostError::Marshal(_)));
    }

    #[test]
    fn json_conversion_is_lossless_for_json_shapes() {
        // Float literals keep the serde_json number repr stable across the
        // f64 round trip.
        let json: JsonValue =
            serde_json::from_str(r#"{"a": [1.5, true, null], "b": "x"}"#).unwrap();
        let value = HostValue::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn non_finite_numbers_stringify_as_null() {
        assert_eq!(
            HostValue::Number(f64::NAN).to_json().unwrap(),
            JsonValue::Null
        );
    }
}
