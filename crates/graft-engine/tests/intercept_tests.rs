//! Intercept Set Tests
//!
//! Tests for which operations of a host hierarchy receive a thunk:
//! - Final operations are never intercepted
//! - A final declaration shadows the same slot in ancestors and interfaces
//! - Static, private and finalizer operations are skipped
//! - Protected operations and interface operations are included
//!
//! # Running Tests
//! ```bash
//! cargo test --test intercept_tests
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use graft_engine::harvest::{class_chain, compute_intercept_set, harvest, interface_list};
use graft_engine::{
    bridge_capability, BackendKind, HostType, HostTypeBuilder, Modifiers, Platform, PlatformOptions,
    ScriptTypeBuilder, StandardWrapper, TableResolver, Value, ValueType,
};

fn platform(backend: BackendKind) -> Platform {
    Platform::with_options(
        PlatformOptions::default().with_backend(backend),
        Arc::new(TableResolver::new()),
        Arc::new(StandardWrapper::new()),
    )
}

fn names(ops: &[Arc<graft_engine::Method>]) -> Vec<String> {
    ops.iter().map(|m| m.name.to_string()).collect()
}

fn render(builder: HostTypeBuilder, modifiers: Modifiers, text: &'static str) -> HostTypeBuilder {
    builder.native_method("render", vec![], ValueType::string(), modifiers, move |_, _| {
        Ok(Value::from(text))
    })
}

/// `Leaf` extends `Sealed`, which finalizes `render()` declared by `View`
/// and by the `Renderable` interface
fn hierarchy() -> (Arc<HostType>, Arc<HostType>) {
    let renderable = HostTypeBuilder::interface("demo.Renderable")
        .abstract_method("render", vec![], ValueType::string())
        .build();
    let view = render(HostTypeBuilder::class("demo.View"), Modifiers::PUBLIC, "view")
        .implements(&renderable)
        .native_method("layout", vec![], ValueType::Void, Modifiers::PUBLIC, |_, _| Ok(Value::Void))
        .build();
    let sealed = render(
        HostTypeBuilder::class("demo.SealedView").extends(&view),
        Modifiers::PUBLIC | Modifiers::FINAL,
        "sealed",
    )
    .build();
    let leaf = HostTypeBuilder::class("demo.LeafView").extends(&sealed).build();
    (leaf, renderable)
}

// ===== Final shadowing =====

#[test]
fn test_final_shadows_ancestor_and_interface() {
    let (leaf, _) = hierarchy();
    let ops = harvest(&leaf, &[]).into_operations();
    assert_eq!(names(&ops), vec!["layout"]);
}

#[test]
fn test_final_shadow_with_requested_interface() {
    let (leaf, renderable) = hierarchy();
    let set = compute_intercept_set(&class_chain(&leaf), &interface_list(&leaf, &[renderable]));
    assert!(!names(set.operations()).contains(&"render".to_string()));
}

#[test]
fn test_final_operation_never_dispatched() {
    for backend in [BackendKind::Assembly, BackendKind::Weave] {
        let platform = platform(backend);
        let (leaf, _) = hierarchy();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let script = ScriptTypeBuilder::extending("Custom", &leaf)
            .function("render", Some(0), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from("script"))
            })
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        assert_eq!(instance.call("render", &[]).unwrap(), Value::from("sealed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ops = names(instance.bridge().class().proxy_info().unwrap().operations.as_slice());
        assert!(!ops.contains(&"render".to_string()));
    }
}

// ===== Eligibility =====

#[test]
fn test_skips_static_private_and_finalizer() {
    let base = HostTypeBuilder::class("demo.Mixed")
        .native_method("create", vec![], ValueType::Void, Modifiers::PUBLIC | Modifiers::STATIC, |_, _| {
            Ok(Value::Void)
        })
        .native_method("secret", vec![], ValueType::Void, Modifiers::PRIVATE, |_, _| Ok(Value::Void))
        .native_method("internal", vec![], ValueType::Void, Modifiers::NONE, |_, _| Ok(Value::Void))
        .native_method("finalize", vec![], ValueType::Void, Modifiers::PROTECTED, |_, _| Ok(Value::Void))
        .native_method("finalize", vec![ValueType::int()], ValueType::Void, Modifiers::PUBLIC, |_, _| {
            Ok(Value::Void)
        })
        .native_method("hook", vec![], ValueType::Void, Modifiers::PROTECTED, |_, _| Ok(Value::Void))
        .build();

    let ops = harvest(&base, &[]).into_operations();
    let found: Vec<_> = ops.iter().map(|m| (m.name.to_string(), m.params.len())).collect();
    assert_eq!(found, vec![("finalize".to_string(), 1), ("hook".to_string(), 0)]);
}

#[test]
fn test_overloads_are_separate_operations() {
    let base = HostTypeBuilder::class("demo.Printer")
        .native_method("print", vec![ValueType::int()], ValueType::Void, Modifiers::PUBLIC, |_, _| {
            Ok(Value::Void)
        })
        .native_method("print", vec![ValueType::string()], ValueType::Void, Modifiers::PUBLIC, |_, _| {
            Ok(Value::Void)
        })
        .build();

    let ops = harvest(&base, &[bridge_capability()]).into_operations();
    assert_eq!(names(&ops), vec!["instance", "print", "print"]);
}

#[test]
fn test_most_derived_override_represents_slot() {
    let base = HostTypeBuilder::class("demo.Panel")
        .native_method("layout", vec![], ValueType::Void, Modifiers::PUBLIC, |_, _| Ok(Value::Void))
        .build();
    let derived = HostTypeBuilder::class("demo.Dialog")
        .extends(&base)
        .native_method("layout", vec![], ValueType::Void, Modifiers::PROTECTED, |_, _| Ok(Value::Void))
        .build();

    let ops = harvest(&derived, &[]).into_operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(&*ops[0].declaring, "demo.Dialog");
    assert!(ops[0].modifiers.is_protected());
}
