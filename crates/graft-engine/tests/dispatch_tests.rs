//! Dispatch Tests
//!
//! Tests for routing intercepted calls:
//! - Script overrides win; the invoke-original accessor still reaches the host
//! - Same-arity overloads are chosen by argument type
//! - Abstract operations without an override raise a dispatch error
//! - Primitive arguments and results survive the boxed dispatch boundary
//! - Script errors reach the host caller unchanged
//!
//! # Running Tests
//! ```bash
//! cargo test --test dispatch_tests
//! ```

use std::sync::Arc;

use graft_engine::{
    BackendKind, HostError, HostType, HostTypeBuilder, Modifiers, Platform, PlatformOptions, Primitive,
    PrimitiveKind, ScriptError, ScriptTypeBuilder, StandardWrapper, TableResolver, Value, ValueType,
};

fn platform(backend: BackendKind) -> Platform {
    Platform::with_options(
        PlatformOptions::default().with_backend(backend).with_trace_dispatch(true),
        Arc::new(TableResolver::new()),
        Arc::new(StandardWrapper::new()),
    )
}

fn backends() -> [BackendKind; 2] {
    [BackendKind::Assembly, BackendKind::Weave]
}

fn greeter() -> Arc<HostType> {
    HostTypeBuilder::class("demo.Greeter")
        .native_method("greet", vec![], ValueType::string(), Modifiers::PUBLIC, |_, _| {
            Ok(Value::from("hello from host"))
        })
        .native_method("greetTwice", vec![], ValueType::string(), Modifiers::PUBLIC, |this, _| {
            let once = this.call("greet", &[])?;
            let once = once.as_str().unwrap_or_default().to_string();
            Ok(Value::string(format!("{once} {once}")))
        })
        .build()
}

// ===== Overrides and originals =====

#[test]
fn test_override_and_original() {
    for backend in backends() {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Friendly", &greeter())
            .function("greet", Some(0), |_, _| Ok(Value::from("hi")))
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        assert_eq!(instance.call("greet", &[]).unwrap(), Value::from("hi"));
        assert_eq!(
            instance.call_original("greet", vec![]).unwrap(),
            Value::from("hello from host")
        );

        let greet = script.base.find_method("greet", 0).unwrap();
        assert_eq!(
            platform.call_original(&instance, &greet, vec![]).unwrap(),
            Value::from("hello from host")
        );
    }
}

#[test]
fn test_host_code_sees_override() {
    for backend in backends() {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Friendly", &greeter())
            .function("greet", Some(0), |_, _| Ok(Value::from("hi")))
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        // greetTwice is not overridden; its internal virtual call is
        assert_eq!(instance.call("greetTwice", &[]).unwrap(), Value::from("hi hi"));
    }
}

#[test]
fn test_script_can_call_super() {
    let platform = platform(BackendKind::Weave);
    let script = ScriptTypeBuilder::extending("Loud", &greeter())
        .function("greet", Some(0), |this, _| {
            let original = this.call_original("greet", vec![])?;
            let text = original.as_str().unwrap_or_default().to_uppercase();
            Ok(Value::string(text))
        })
        .build();
    let instance = platform.extend(&script, &[], &[]).unwrap();

    assert_eq!(instance.call("greet", &[]).unwrap(), Value::from("HELLO FROM HOST"));
}

fn overloaded() -> Arc<HostType> {
    HostTypeBuilder::class("demo.Overloaded")
        .native_method("greet", vec![ValueType::int()], ValueType::string(), Modifiers::PUBLIC, |_, _| {
            Ok(Value::from("number"))
        })
        .native_method("greet", vec![ValueType::string()], ValueType::string(), Modifiers::PUBLIC, |_, args| {
            Ok(args[0].clone())
        })
        .build()
}

#[test]
fn test_same_arity_overloads_follow_argument_types() {
    for backend in backends() {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Plain", &overloaded()).build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        assert_eq!(instance.call("greet", &[Value::from("x")]).unwrap(), Value::from("x"));
        assert_eq!(instance.call("greet", &[Value::int(3)]).unwrap(), Value::from("number"));
        assert_eq!(
            instance.call_original("greet", vec![Value::from("x")]).unwrap(),
            Value::from("x")
        );
        assert_eq!(
            instance.call_original("greet", vec![Value::int(3)]).unwrap(),
            Value::from("number")
        );
    }
}

// ===== Abstract operations =====

#[test]
fn test_unimplemented_abstract_raises() {
    for backend in backends() {
        let platform = platform(backend);
        let describable = HostTypeBuilder::class("demo.Describable")
            .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
            .abstract_method("describe", vec![], ValueType::string())
            .build();
        let script = ScriptTypeBuilder::extending("Mute", &describable).build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        match instance.call("describe", &[]).unwrap_err() {
            HostError::UnimplementedAbstract { operation, type_name } => {
                assert!(operation.contains("describe"));
                assert_eq!(type_name, "Mute");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The original of an abstract operation has nothing to run
        assert!(matches!(
            instance.call_original("describe", vec![]),
            Err(HostError::Unsupported { .. })
        ));
    }
}

#[test]
fn test_implemented_abstract_interface_operation() {
    let platform = platform(BackendKind::Assembly);
    let comparable = HostTypeBuilder::interface("demo.Ranked")
        .abstract_method("rank", vec![ValueType::int()], ValueType::long())
        .build();
    let base = HostTypeBuilder::class("demo.Player").build();
    let script = ScriptTypeBuilder::extending("Scored", &base)
        .implementing(&comparable)
        .function("rank", Some(1), |_, args| {
            let n = args[0].as_int().unwrap_or_default();
            Ok(Value::int(n * 10))
        })
        .build();
    let instance = platform.extend(&script, &[], &[]).unwrap();

    // The script returned an int; the wrapper widens it to the declared long
    assert_eq!(instance.call("rank", &[Value::int(4)]).unwrap(), Value::long(40));
    assert!(instance.bridge().class().is_subtype_of("demo.Ranked"));
}

// ===== Primitive boundaries =====

fn boundaries(kind: PrimitiveKind) -> Vec<Primitive> {
    match kind {
        PrimitiveKind::Boolean => vec![Primitive::Boolean(false), Primitive::Boolean(true)],
        PrimitiveKind::Byte => [0, -1, 1, i8::MIN, i8::MAX].map(Primitive::Byte).to_vec(),
        PrimitiveKind::Char => [0, 1, 0x7f, 0xd800, u16::MAX].map(Primitive::Char).to_vec(),
        PrimitiveKind::Short => [0, -1, 1, i16::MIN, i16::MAX].map(Primitive::Short).to_vec(),
        PrimitiveKind::Int => [0, -1, 1, i32::MIN, i32::MAX].map(Primitive::Int).to_vec(),
        PrimitiveKind::Long => [0, -1, 1, i64::MIN, i64::MAX].map(Primitive::Long).to_vec(),
        PrimitiveKind::Float => [
            0.0,
            -0.0,
            -1.0,
            f32::MIN,
            f32::MAX,
            f32::MIN_POSITIVE,
            f32::EPSILON,
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::NAN,
        ]
        .map(Primitive::Float)
        .to_vec(),
        PrimitiveKind::Double => [
            0.0,
            -0.0,
            -1.0,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
        ]
        .map(Primitive::Double)
        .to_vec(),
    }
}

fn echo_type() -> Arc<HostType> {
    let mut builder = HostTypeBuilder::class("demo.Echo");
    for kind in PrimitiveKind::ALL {
        let ty = ValueType::Primitive(kind);
        builder = builder.native_method(
            &format!("echo_{}", kind.keyword()),
            vec![ty.clone()],
            ty,
            Modifiers::PUBLIC,
            |_, args| Ok(args[0].clone()),
        );
    }
    builder.build()
}

#[test]
fn test_primitive_round_trip_through_script() {
    for backend in backends() {
        let platform = platform(backend);
        let mut builder = ScriptTypeBuilder::extending("Mirror", &echo_type());
        for kind in PrimitiveKind::ALL {
            builder = builder.function(&format!("echo_{}", kind.keyword()), Some(1), |_, args| {
                Ok(args[0].clone())
            });
        }
        let instance = platform.extend(&builder.build(), &[], &[]).unwrap();

        for kind in PrimitiveKind::ALL {
            let name = format!("echo_{}", kind.keyword());
            for value in boundaries(kind) {
                let result = instance.call(&name, &[Value::Prim(value)]).unwrap();
                assert_eq!(result, Value::Prim(value), "{name}({value}) on {backend}");
            }
        }
    }
}

#[test]
fn test_primitive_round_trip_through_host_default() {
    for backend in backends() {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Passive", &echo_type()).build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        for kind in PrimitiveKind::ALL {
            let name = format!("echo_{}", kind.keyword());
            for value in boundaries(kind) {
                let result = instance.call(&name, &[Value::Prim(value)]).unwrap();
                assert_eq!(result, Value::Prim(value), "{name}({value}) on {backend}");
            }
        }
    }
}

#[test]
fn test_null_for_primitive_result() {
    let platform = platform(BackendKind::Weave);
    let script = ScriptTypeBuilder::extending("Broken", &echo_type())
        .function("echo_int", Some(1), |_, _| Ok(Value::Null))
        .build();
    let instance = platform.extend(&script, &[], &[]).unwrap();

    let err = instance.call("echo_int", &[Value::int(1)]).unwrap_err();
    assert!(matches!(err, HostError::NullPointer(_)));
}

// ===== Errors =====

#[test]
fn test_script_error_propagates_unchanged() {
    for backend in backends() {
        let platform = platform(backend);
        let script = ScriptTypeBuilder::extending("Grumpy", &greeter())
            .function("greet", Some(0), |_, _| Err(ScriptError::new("not today")))
            .build();
        let instance = platform.extend(&script, &[], &[]).unwrap();

        match instance.call("greetTwice", &[]).unwrap_err() {
            HostError::Script(e) => assert_eq!(e, ScriptError::new("not today")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
