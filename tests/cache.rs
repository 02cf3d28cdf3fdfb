//! Tests for the bytecode cache
//!
//! A blob produced by `compile` must run identically through
//! `eval_bytecode`, and anything stale or corrupt must be rejected as
//! `CacheVersionMismatch` so the caller can fall back to source.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use jshost::{Engine, EngineConfig, HostError, HostValue};

const SOURCE: &str = r#"
function scale(n) { return n * 3; }
scale(14)
"#;

#[test]
fn test_compiled_blob_runs_like_source() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    let from_source = engine.eval(ctx, SOURCE, "scale.js").unwrap();
    let blob = engine.compile(SOURCE, "scale.js").unwrap();
    let from_blob = engine.eval_bytecode(ctx, &blob).unwrap();
    assert_eq!(from_source, from_blob);
    assert_eq!(from_blob.as_number(), Some(42.0));
}

#[test]
fn test_blob_is_reusable_across_contexts() {
    let mut engine = Engine::new(EngineConfig::new());
    let blob = engine.compile("var tag = 'cached'; tag", "tag.js").unwrap();
    for _ in 0..2 {
        let ctx = engine.create_context();
        let v = engine.eval_bytecode(ctx, &blob).unwrap();
        assert_eq!(v.as_str(), Some("cached"));
        engine.destroy_context(ctx).unwrap();
    }
}

#[test]
fn test_compile_does_not_execute() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    engine.compile("flag = true;", "side.js").unwrap();
    let err = engine.eval(ctx, "flag", "side.js").unwrap_err();
    assert!(err.is_exception(), "compile must not run the script");
}

#[test]
fn test_foreign_version_blob_is_rejected_with_source_fallback() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    let mut blob = engine.compile(SOURCE, "scale.js").unwrap();
    // Byte 4 starts the format version; a bumped version simulates a blob
    // written by a different engine build.
    blob[4] = blob[4].wrapping_add(1);

    let err = engine.eval_bytecode(ctx, &blob).unwrap_err();
    assert!(
        matches!(err, HostError::CacheVersionMismatch { .. }),
        "got {:?}",
        err
    );

    // The documented recovery path: fall back to compiling the source.
    let v = engine.eval(ctx, SOURCE, "scale.js").unwrap();
    assert_eq!(v.as_number(), Some(42.0));
}

#[test]
fn test_garbage_blob_is_an_error_not_a_crash() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    for blob in [
        &b""[..],
        &b"JS"[..],
        &b"not a cache blob at all"[..],
        &[0xffu8; 64][..],
    ] {
        let err = engine.eval_bytecode(ctx, blob).unwrap_err();
        assert!(matches!(err, HostError::CacheVersionMismatch { .. }));
    }
}

#[test]
fn test_truncated_blob_is_rejected() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    let blob = engine.compile(SOURCE, "scale.js").unwrap();
    let truncated = &blob[..blob.len() / 2];
    assert!(engine.eval_bytecode(ctx, truncated).is_err());
}

#[test]
fn test_blob_respects_runtime_limits() {
    // Bytecode is not a trust boundary: cached scripts still hit the
    // interrupt and memory checks.
    let mut engine = Engine::new(EngineConfig::new().with_memory_limit(16 * 1024));
    let ctx = engine.create_context();
    let blob = engine
        .compile("var s = 'x'; while (true) { s = s + s; }", "greedy.js")
        .unwrap();
    let err = engine.eval_bytecode(ctx, &blob).unwrap_err();
    assert!(matches!(err, HostError::OutOfMemory { .. }));
}

#[test]
fn test_exceptions_from_cached_code_keep_the_filename() {
    let mut engine = Engine::new(EngineConfig::new());
    let ctx = engine.create_context();
    let blob = engine
        .compile("throw new Error('from cache')", "cached.js")
        .unwrap();
    let err = engine.eval_bytecode(ctx, &blob).unwrap_err();
    let info = err.exception().expect("expected an exception");
    assert_eq!(info.message, "from cache");
    assert_eq!(
        info.stack.first().and_then(|f| f.filename.as_deref()),
        Some("cached.js")
    );
}
