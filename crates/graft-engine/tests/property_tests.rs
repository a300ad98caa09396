//! Property Bridge Tests
//!
//! Tests for property interfaces:
//! - Accessor pairs are backed by a generated field
//! - Accessors work without any interpreter involvement
//! - Accessors are final and never dispatched
//! - Malformed accessor pairs fail generation
//!
//! # Running Tests
//! ```bash
//! cargo test --test property_tests
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use graft_engine::{
    BackendKind, GenerationCause, HarvestError, HostObject, HostType, HostTypeBuilder, Platform,
    PlatformError, PlatformOptions, ScriptTypeBuilder, StandardWrapper, TableResolver, Value, ValueType,
};

fn platform(backend: BackendKind) -> Platform {
    Platform::with_options(
        PlatformOptions::default().with_backend(backend),
        Arc::new(TableResolver::new()),
        Arc::new(StandardWrapper::new()),
    )
}

fn backends() -> [BackendKind; 2] {
    [BackendKind::Assembly, BackendKind::Weave]
}

fn named() -> Arc<HostType> {
    HostTypeBuilder::interface("demo.Named")
        .abstract_method("getName", vec![], ValueType::string())
        .abstract_method("setName", vec![ValueType::string()], ValueType::Void)
        .build()
}

fn toggled() -> Arc<HostType> {
    HostTypeBuilder::interface("demo.Toggled")
        .abstract_method("isEnabled", vec![], ValueType::boolean())
        .abstract_method("setEnabled", vec![ValueType::boolean()], ValueType::Void)
        .build()
}

fn node() -> Arc<HostType> {
    HostTypeBuilder::class("demo.Node").build()
}

#[test]
fn test_set_then_get_without_interpreter() {
    for backend in backends() {
        let platform = platform(backend);
        let subtype = platform.create_extension_type(&node(), &[], &[named()]).unwrap();

        // No script instance is bound, so nothing can reach the interpreter
        let obj = HostObject::construct(subtype.host_type(), &[], &[]).unwrap();
        obj.call("setName", &[Value::from("x")]).unwrap();
        assert_eq!(obj.call("getName", &[]).unwrap(), Value::from("x"));
        assert_eq!(obj.get_field("$__name").unwrap(), Value::from("x"));
    }
}

#[test]
fn test_accessors_on_bound_instance() {
    for backend in backends() {
        let platform = platform(backend);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let script = ScriptTypeBuilder::extending("Item", &node())
            .property_interface(&named())
            .property_interface(&toggled())
            .function("unrelated", Some(0), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Void)
            })
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        assert_eq!(instance.call("getName", &[]).unwrap(), Value::Null);
        instance.call("setName", &[Value::from("x")]).unwrap();
        assert_eq!(instance.call("getName", &[]).unwrap(), Value::from("x"));

        assert_eq!(instance.call("isEnabled", &[]).unwrap(), Value::boolean(false));
        instance.call("setEnabled", &[Value::boolean(true)]).unwrap();
        assert_eq!(instance.call("isEnabled", &[]).unwrap(), Value::boolean(true));

        assert_eq!(instance.bridge().get_field("$__enabled").unwrap(), Value::boolean(true));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_accessors_are_not_intercepted() {
    let platform = platform(BackendKind::Weave);
    let subtype = platform.create_extension_type(&node(), &[], &[named()]).unwrap();

    let names: Vec<_> = subtype.operations().iter().map(|m| m.name.to_string()).collect();
    assert!(!names.contains(&"getName".to_string()));
    assert!(!names.contains(&"setName".to_string()));
    assert!(subtype.host_type().is_subtype_of("demo.Named"));
}

#[test]
fn test_unpaired_accessor_fails_generation() {
    let platform = platform(BackendKind::Assembly);
    let half = HostTypeBuilder::interface("demo.ReadOnly")
        .abstract_method("getTitle", vec![], ValueType::string())
        .build();

    let err = platform.create_extension_type(&node(), &[], &[half]).unwrap_err();
    match err {
        PlatformError::Generation(e) => {
            assert_eq!(e.type_name, "demo.Node");
            assert!(matches!(
                e.cause,
                GenerationCause::Property(HarvestError::MissingCounterpart { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_non_accessor_fails_generation() {
    let platform = platform(BackendKind::Weave);
    let odd = HostTypeBuilder::interface("demo.Odd")
        .abstract_method("compute", vec![ValueType::int()], ValueType::int())
        .build();

    let err = platform.create_extension_type(&node(), &[], &[odd]).unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Generation(ref e) if matches!(e.cause, GenerationCause::Property(HarvestError::NotAProperty { .. }))
    ));
}
