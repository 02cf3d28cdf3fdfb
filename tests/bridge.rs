//! Tests for the host/engine value bridge
//!
//! These verify marshaling semantics across the public API: round-trip
//! identity for plain data, copy semantics for strings, handle behavior
//! for functions, and marshal failures for unrepresentable shapes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use jshost::{ContextHandle, Engine, EngineConfig, HostError, HostValue};

fn engine_with_context() -> (Engine, ContextHandle) {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    (engine, ctx)
}

/// Send a value in through a binding argument and read the echo back out.
fn round_trip(value: HostValue) -> HostValue {
    let (mut engine, ctx) = engine_with_context();
    let v = engine
        .eval(ctx, "function echo(x) { return x } echo", "rt.js")
        .unwrap();
    let handle = match v {
        HostValue::FunctionRef(h) => h,
        other => panic!("expected a function ref, got {:?}", other),
    };
    engine.call_function(&handle, &[value]).unwrap()
}

#[test]
fn test_round_trip_identity_for_primitives() {
    for value in [
        HostValue::Undefined,
        HostValue::Null,
        HostValue::Bool(true),
        HostValue::Bool(false),
        HostValue::Number(0.0),
        HostValue::Number(-1.5),
        HostValue::Number(f64::MAX),
    ] {
        assert_eq!(round_trip(value.clone()), value);
    }
}

#[test]
fn test_round_trip_identity_for_trees() {
    let value = HostValue::Object(vec![
        ("label".to_string(), HostValue::String("outer".to_string())),
        (
            "items".to_string(),
            HostValue::Array(vec![
                HostValue::Number(1.0),
                HostValue::Object(vec![("ok".to_string(), HostValue::Bool(true))]),
                HostValue::Null,
            ]),
        ),
    ]);
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn test_strings_cross_by_copy() {
    let mut original = HostValue::String("shared".to_string());
    let copy = round_trip(original.clone());
    assert_eq!(copy, original);
    // The engine copied the bytes; mutating the host's value afterwards
    // never reaches engine state.
    let (mut engine, ctx) = engine_with_context();
    let v = engine
        .eval(ctx, "function keep(x) { stored = x; return 0 } keep", "copy.js")
        .unwrap();
    let handle = match v {
        HostValue::FunctionRef(h) => h,
        other => panic!("expected a function ref, got {:?}", other),
    };
    engine.call_function(&handle, &[original.clone()]).unwrap();
    if let HostValue::String(s) = &mut original {
        s.push_str("-mutated");
    }
    let kept = engine.eval(ctx, "stored", "copy.js").unwrap();
    assert_eq!(kept.as_str(), Some("shared"));
}

#[test]
fn test_nan_round_trips_as_nan() {
    let back = round_trip(HostValue::Number(f64::NAN));
    assert!(back.as_number().unwrap().is_nan());
}

#[test]
fn test_engine_functions_cross_as_handles() {
    let (mut engine, ctx) = engine_with_context();
    let v = engine
        .eval(ctx, "function f() { return 7 } f", "fns.js")
        .unwrap();
    assert!(matches!(v, HostValue::FunctionRef(_)));
}

#[test]
fn test_cyclic_engine_object_fails_marshal() {
    let (mut engine, ctx) = engine_with_context();
    let err = engine
        .eval(ctx, "var a = [1]; a[1] = a; a", "cycle.js")
        .unwrap_err();
    assert!(matches!(err, HostError::Marshal(_)), "got {:?}", err);
}

#[test]
fn test_cyclic_object_through_property_fails_marshal() {
    let (mut engine, ctx) = engine_with_context();
    let err = engine
        .eval(ctx, "var o = {}; o.me = o; o", "cycle.js")
        .unwrap_err();
    assert!(matches!(err, HostError::Marshal(_)));
}

#[test]
fn test_handle_from_another_context_is_rejected() {
    let mut engine = Engine::new(EngineConfig::new());
    let a = engine.create_context();
    let b = engine.create_context();
    let from_a = engine
        .eval(a, "function fa() { return 1 } fa", "a.js")
        .unwrap();
    let into_b = engine
        .eval(b, "function fb(x) { return 2 } fb", "b.js")
        .unwrap();
    let (fa, fb) = match (from_a, into_b) {
        (HostValue::FunctionRef(fa), HostValue::FunctionRef(fb)) => (fa, fb),
        other => panic!("expected function refs, got {:?}", other),
    };
    let err = engine
        .call_function(&fb, &[HostValue::FunctionRef(fa)])
        .unwrap_err();
    assert!(matches!(err, HostError::Marshal(_)));
}

#[test]
fn test_shared_object_without_cycle_is_fine() {
    // Diamond sharing is not a cycle; it flattens into two copies.
    let (mut engine, ctx) = engine_with_context();
    let v = engine
        .eval(
            ctx,
            "var leaf = { n: 1 }; var root = { a: leaf, b: leaf }; root",
            "diamond.js",
        )
        .unwrap();
    assert_eq!(
        v.get("a").and_then(|a| a.get("n")).and_then(HostValue::as_number),
        Some(1.0)
    );
    assert_eq!(
        v.get("b").and_then(|b| b.get("n")).and_then(HostValue::as_number),
        Some(1.0)
    );
}

#[test]
fn test_json_round_trip_through_the_engine() {
    let json: serde_json::Value =
        serde_json::from_str(r#"{"name": "box", "dims": [2.5, 3.5], "open": false}"#).unwrap();
    let (mut engine, ctx) = engine_with_context();
    let v = engine
        .eval(ctx, "function echo(x) { return x } echo", "json.js")
        .unwrap();
    let handle = match v {
        HostValue::FunctionRef(h) => h,
        other => panic!("expected a function ref, got {:?}", other),
    };
    let back = engine
        .call_function(&handle, &[HostValue::from_json(&json)])
        .unwrap();
    assert_eq!(back.to_json().unwrap(), json);
}
