//! End-to-end tests for the execution host
//!
//! These exercise the public API: engine and context lifecycle, script
//! evaluation, native bindings, interrupts, and memory limits.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use jshost::{
    with_engine, ContextHandle, Engine, EngineConfig, HostError, HostValue, ResourceCounters,
};

fn engine() -> Engine {
    Engine::new(EngineConfig::new())
}

fn eval(engine: &mut Engine, ctx: ContextHandle, source: &str) -> HostValue {
    engine.eval(ctx, source, "test.js").expect("eval failed")
}

fn number(value: &HostValue) -> f64 {
    value.as_number().expect("expected a number")
}

// ----------------------------------------------------------------------
// Evaluation basics
// ----------------------------------------------------------------------

#[test]
fn test_eval_arithmetic() {
    let mut engine = engine();
    let ctx = engine.create_context();
    assert_eq!(number(&eval(&mut engine, ctx, "1 + 1")), 2.0);
    assert_eq!(number(&eval(&mut engine, ctx, "2 * 3 + 4")), 10.0);
    assert_eq!(number(&eval(&mut engine, ctx, "10 % 3")), 1.0);
}

#[test]
fn test_eval_string_and_comparison() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(&mut engine, ctx, "'foo' + 'bar'");
    assert_eq!(v.as_str(), Some("foobar"));
    let v = eval(&mut engine, ctx, "'a' < 'b' && 2 >= 2");
    assert_eq!(v.as_bool(), Some(true));
}

#[test]
fn test_globals_persist_across_evals() {
    let mut engine = engine();
    let ctx = engine.create_context();
    eval(&mut engine, ctx, "var counter = 0;");
    eval(&mut engine, ctx, "counter = counter + 5;");
    assert_eq!(number(&eval(&mut engine, ctx, "counter")), 5.0);
}

#[test]
fn test_functions_and_control_flow() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(
        &mut engine,
        ctx,
        r#"
        function fib(n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        fib(10)
        "#,
    );
    assert_eq!(number(&v), 55.0);
}

#[test]
fn test_arrays_and_objects() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(
        &mut engine,
        ctx,
        r#"
        var totals = { sum: 0 };
        var xs = [1, 2, 3, 4];
        var i = 0;
        while (i < xs.length) {
            totals.sum = totals.sum + xs[i];
            i = i + 1;
        }
        totals
        "#,
    );
    assert_eq!(v.get("sum").and_then(HostValue::as_number), Some(10.0));
}

#[test]
fn test_typeof_undeclared_name_is_undefined() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(&mut engine, ctx, "typeof neverDeclared");
    assert_eq!(v.as_str(), Some("undefined"));
    // A plain read of the same name still throws.
    let err = engine.eval(ctx, "neverDeclared", "test.js").unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert!(info.message.contains("not defined"));
}

#[test]
fn test_typeof_declared_names() {
    let mut engine = engine();
    let ctx = engine.create_context();
    eval(&mut engine, ctx, "var n = 1; var s = 'x'; function f() {}");
    assert_eq!(eval(&mut engine, ctx, "typeof n").as_str(), Some("number"));
    assert_eq!(eval(&mut engine, ctx, "typeof s").as_str(), Some("string"));
    assert_eq!(eval(&mut engine, ctx, "typeof f").as_str(), Some("function"));
}

#[test]
fn test_compile_error_reports_location() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine.eval(ctx, "var = ;", "broken.js").unwrap_err();
    assert!(matches!(err, HostError::Compile { .. }), "got {:?}", err);
}

#[test]
fn test_context_isolation() {
    let mut engine = engine();
    let a = engine.create_context();
    let b = engine.create_context();
    eval(&mut engine, a, "var secret = 42;");
    let err = engine.eval(b, "secret", "test.js").unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert!(info.message.contains("secret is not defined"));
}

// ----------------------------------------------------------------------
// Exceptions
// ----------------------------------------------------------------------

#[test]
fn test_thrown_error_surfaces_as_exception() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine
        .eval(ctx, "throw new Error('x')", "test.js")
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "x");
    assert!(!info.native_origin);
}

#[test]
fn test_exception_stack_names_the_throwing_function() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine
        .eval(
            ctx,
            "function boom() { throw new RangeError('too far') }\nboom()",
            "trace.js",
        )
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "too far");
    let top = info.stack.first().expect("expected a stack frame");
    assert_eq!(top.function.as_deref(), Some("boom"));
    assert_eq!(top.filename.as_deref(), Some("trace.js"));
}

#[test]
fn test_try_catch_recovers() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(
        &mut engine,
        ctx,
        r#"
        var caught;
        try {
            throw new TypeError('t');
        } catch (e) {
            caught = e.name + ':' + e.message;
        }
        caught
        "#,
    );
    assert_eq!(v.as_str(), Some("TypeError:t"));
}

#[test]
fn test_thrown_non_error_values_are_catchable() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(
        &mut engine,
        ctx,
        "var got; try { throw 42; } catch (e) { got = e; } got",
    );
    assert_eq!(number(&v), 42.0);
}

#[test]
fn test_calling_a_non_function_throws_type_error() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine.eval(ctx, "var x = 3; x()", "test.js").unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert!(info.message.contains("not a function"));
}

#[test]
fn test_deep_recursion_is_a_range_error_not_a_crash() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine
        .eval(ctx, "function down() { return down() } down()", "test.js")
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert!(info.message.contains("call stack"));
}

#[test]
fn test_break_out_of_try_leaves_no_handler_behind() {
    let mut engine = engine();
    let ctx = engine.create_context();
    // The break leaves the try block early; a later unrelated throw must
    // surface to the host instead of landing in the loop's catch.
    let err = engine
        .eval(
            ctx,
            r#"
            var caught;
            var i = 0;
            while (i < 1) {
                i = 1;
                try {
                    break;
                } catch (e) {
                    caught = 'wrong';
                }
            }
            throw new Error('boom');
            "#,
            "test.js",
        )
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "boom");
    let v = eval(&mut engine, ctx, "typeof caught");
    assert_eq!(v.as_str(), Some("undefined"));
}

#[test]
fn test_break_inside_try_terminates_the_loop() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(
        &mut engine,
        ctx,
        "var n = 0; while (true) { try { break; } catch (e) { n = n + 1; } } n",
    );
    assert_eq!(number(&v), 0.0);
}

#[test]
fn test_continue_out_of_try_leaves_no_handler_behind() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine
        .eval(
            ctx,
            r#"
            var hits = 0;
            var i = 0;
            while (i < 3) {
                i = i + 1;
                try {
                    continue;
                } catch (e) {
                    hits = hits + 1;
                }
            }
            throw new Error('after the loop');
            "#,
            "test.js",
        )
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "after the loop");
    assert_eq!(number(&eval(&mut engine, ctx, "hits")), 0.0);
}

#[test]
fn test_return_from_try_leaves_no_handler_behind() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine
        .eval(
            ctx,
            r#"
            function pick() { try { return 7; } catch (e) { return -1; } }
            var got = pick();
            throw new Error('later');
            "#,
            "test.js",
        )
        .unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "later");
    assert_eq!(number(&eval(&mut engine, ctx, "got")), 7.0);
}

// ----------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------

#[test]
fn test_eval_after_destroy_fails_with_invalid_handle() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine.destroy_context(ctx).unwrap();
    let err = engine.eval(ctx, "1", "test.js").unwrap_err();
    assert!(matches!(err, HostError::InvalidHandle(_)));
}

#[test]
fn test_stale_handle_does_not_reach_a_reused_slot() {
    let mut engine = engine();
    let old = engine.create_context();
    engine.destroy_context(old).unwrap();
    let reused = engine.create_context();
    eval(&mut engine, reused, "var alive = true;");
    let err = engine.eval(old, "alive", "test.js").unwrap_err();
    assert!(matches!(err, HostError::InvalidHandle(_)));
    engine.destroy_context(reused).unwrap();
}

#[test]
fn test_value_deref_fails_after_context_destroy() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(&mut engine, ctx, "function f() { return 1 } f");
    let handle = match v {
        HostValue::FunctionRef(h) => h,
        other => panic!("expected a function ref, got {:?}", other),
    };
    assert!(engine.deref(&handle).is_ok());
    engine.destroy_context(ctx).unwrap();
    assert!(matches!(
        engine.deref(&handle),
        Err(HostError::InvalidHandle(_))
    ));
    assert!(matches!(
        engine.call_function(&handle, &[]),
        Err(HostError::InvalidHandle(_))
    ));
}

#[test]
fn test_call_function_through_a_handle() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let v = eval(&mut engine, ctx, "function add(a, b) { return a + b } add");
    let handle = match v {
        HostValue::FunctionRef(h) => h,
        other => panic!("expected a function ref, got {:?}", other),
    };
    let result = engine
        .call_function(&handle, &[HostValue::Number(2.0), HostValue::Number(40.0)])
        .unwrap();
    assert_eq!(number(&result), 42.0);
}

// ----------------------------------------------------------------------
// Native bindings
// ----------------------------------------------------------------------

#[test]
fn test_ping_binding_returns_42() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "ping", 0, |_scope, _args| Ok(HostValue::Number(42.0)))
        .unwrap();
    assert_eq!(number(&eval(&mut engine, ctx, "ping()")), 42.0);
}

#[test]
fn test_binding_visible_only_after_install() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let err = engine.eval(ctx, "ping()", "test.js").unwrap_err();
    assert!(err.is_exception());
    engine
        .install_binding(ctx, "ping", 0, |_scope, _args| Ok(HostValue::Number(42.0)))
        .unwrap();
    assert_eq!(number(&eval(&mut engine, ctx, "ping()")), 42.0);
}

#[test]
fn test_binding_is_scoped_to_its_context() {
    let mut engine = engine();
    let with_binding = engine.create_context();
    let without = engine.create_context();
    engine
        .install_binding(with_binding, "ping", 0, |_scope, _args| {
            Ok(HostValue::Number(42.0))
        })
        .unwrap();
    assert_eq!(number(&eval(&mut engine, with_binding, "ping()")), 42.0);
    assert!(engine.eval(without, "ping()", "test.js").is_err());
}

#[test]
fn test_binding_receives_marshaled_arguments() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "concat", 2, |_scope, args| {
            let a = args.first().and_then(HostValue::as_str).unwrap_or("");
            let b = args.get(1).and_then(HostValue::as_str).unwrap_or("");
            Ok(HostValue::String(format!("{}{}", a, b)))
        })
        .unwrap();
    let v = eval(&mut engine, ctx, "concat('he', 'llo')");
    assert_eq!(v.as_str(), Some("hello"));
}

#[test]
fn test_binding_error_is_catchable_in_script() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "fails", 0, |_scope, _args| {
            Err(HostError::marshal("nope"))
        })
        .unwrap();
    let v = eval(
        &mut engine,
        ctx,
        "var msg; try { fails(); } catch (e) { msg = e.message; } msg",
    );
    assert!(v.as_str().unwrap_or("").contains("nope"));
}

#[test]
fn test_uncaught_binding_error_is_marked_native_origin() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "fails", 0, |_scope, _args| {
            Err(HostError::marshal("nope"))
        })
        .unwrap();
    let err = engine.eval(ctx, "fails()", "test.js").unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert!(info.native_origin);
}

#[test]
fn test_binding_interrupt_is_not_catchable() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "cancel", 0, |_scope, _args| Err(HostError::Interrupted))
        .unwrap();
    let err = engine
        .eval(ctx, "try { cancel(); } catch (e) { 'caught' }", "test.js")
        .unwrap_err();
    assert!(matches!(err, HostError::Interrupted));
}

#[test]
fn test_reentrant_eval_from_binding() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine
        .install_binding(ctx, "compute", 0, |scope, _args| {
            scope.eval("2 + 3", "nested.js")
        })
        .unwrap();
    assert_eq!(number(&eval(&mut engine, ctx, "compute()")), 5.0);
}

#[test]
fn test_reentrant_eval_shares_the_context_globals() {
    let mut engine = engine();
    let ctx = engine.create_context();
    eval(&mut engine, ctx, "var base = 40;");
    engine
        .install_binding(ctx, "addBase", 1, |scope, args| {
            let n = args.first().and_then(HostValue::as_number).unwrap_or(0.0);
            let base = scope.eval("base", "nested.js")?;
            Ok(HostValue::Number(n + base.as_number().unwrap_or(0.0)))
        })
        .unwrap();
    assert_eq!(number(&eval(&mut engine, ctx, "addBase(2)")), 42.0);
}

// ----------------------------------------------------------------------
// Interrupts
// ----------------------------------------------------------------------

#[test]
fn test_preset_interrupt_flag_stops_evaluation() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine.set_interrupt(true);
    let err = engine.eval(ctx, "while (true) {}", "test.js").unwrap_err();
    assert!(matches!(err, HostError::Interrupted));
}

#[test]
fn test_interrupt_flag_is_sticky_until_cleared() {
    let mut engine = engine();
    let ctx = engine.create_context();
    engine.set_interrupt(true);
    assert!(matches!(
        engine.eval(ctx, "1", "test.js"),
        Err(HostError::Interrupted)
    ));
    engine.set_interrupt(false);
    assert_eq!(number(&eval(&mut engine, ctx, "1")), 1.0);
}

#[test]
fn test_interrupt_from_another_thread_stops_a_loop() {
    let mut engine = engine();
    let ctx = engine.create_context();
    let handle = engine.interrupt_handle();
    let watchdog = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.interrupt();
    });
    let err = engine.eval(ctx, "while (true) {}", "test.js").unwrap_err();
    assert!(matches!(err, HostError::Interrupted));
    watchdog.join().unwrap();
}

#[test]
fn test_interrupt_handler_acts_as_a_deadline() {
    let polls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&polls);
    let mut engine = Engine::new(EngineConfig::new().with_interrupt_handler(move || {
        seen.fetch_add(1, Ordering::Relaxed) >= 2
    }));
    let ctx = engine.create_context();
    let err = engine.eval(ctx, "while (true) {}", "test.js").unwrap_err();
    assert!(matches!(err, HostError::Interrupted));
    assert!(polls.load(Ordering::Relaxed) >= 3);
}

// ----------------------------------------------------------------------
// Memory limits
// ----------------------------------------------------------------------

#[test]
fn test_unbounded_allocation_hits_the_memory_limit() {
    let mut engine = Engine::new(EngineConfig::new().with_memory_limit(64 * 1024));
    let ctx = engine.create_context();
    let err = engine
        .eval(
            ctx,
            r#"
            var hoard = [];
            var i = 0;
            while (true) {
                hoard[i] = 'xxxxxxxxxxxxxxxx' + i;
                i = i + 1;
            }
            "#,
            "greedy.js",
        )
        .unwrap_err();
    assert!(matches!(err, HostError::OutOfMemory { .. }), "got {:?}", err);
}

#[test]
fn test_out_of_memory_does_not_kill_the_process() {
    let mut engine = Engine::new(EngineConfig::new().with_memory_limit(16 * 1024));
    let ctx = engine.create_context();
    let _ = engine.eval(
        ctx,
        "var s = 'x'; while (true) { s = s + s; }",
        "greedy.js",
    );
    // Allocation-free evaluation still works afterwards.
    assert_eq!(number(&eval(&mut engine, ctx, "1 + 1")), 2.0);
}

#[test]
fn test_memory_usage_is_reported() {
    let mut engine = engine();
    let ctx = engine.create_context();
    assert_eq!(engine.memory_used(), 0);
    eval(&mut engine, ctx, "var blob = 'aaaaaaaaaaaaaaaa';");
    assert!(engine.memory_used() > 0);
}

// ----------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------

#[test]
fn test_shutdown_refused_while_contexts_live() {
    let mut engine = engine();
    let ctx = engine.create_context();
    assert!(matches!(
        engine.shutdown(),
        Err(HostError::LiveContexts { count: 1 })
    ));
    engine.destroy_context(ctx).unwrap();
    engine.shutdown().unwrap();
}

#[test]
fn test_with_engine_tears_down_on_success() {
    let counters = ResourceCounters::new();
    let tracked = Arc::clone(&counters);
    let result = with_engine(
        EngineConfig::new().with_counters(tracked),
        |scope| {
            let ctx = scope.create_context();
            scope.eval(ctx, "var x = 1;", "test.js")?;
            Ok(true)
        },
    );
    assert!(result.unwrap());
    assert_eq!(counters.live_engines(), 0);
    assert_eq!(counters.live_contexts(), 0);
}

#[test]
fn test_with_engine_tears_down_after_body_error() {
    let counters = ResourceCounters::new();
    let tracked = Arc::clone(&counters);
    let result: Result<(), HostError> = with_engine(
        EngineConfig::new().with_counters(tracked),
        |scope| {
            scope.create_context();
            scope.create_context();
            Err(HostError::marshal("body failed"))
        },
    );
    assert!(result.is_err());
    assert_eq!(counters.live_engines(), 0);
    assert_eq!(counters.live_contexts(), 0);
}

#[test]
fn test_with_engine_allows_early_context_destroy() {
    let counters = ResourceCounters::new();
    let tracked = Arc::clone(&counters);
    with_engine(EngineConfig::new().with_counters(tracked), |scope| {
        let ctx = scope.create_context();
        scope.destroy_context(ctx)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(counters.live_engines(), 0);
    assert_eq!(counters.live_contexts(), 0);
}
