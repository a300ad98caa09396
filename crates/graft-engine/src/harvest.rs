//! Method-set harvester
//!
//! Computes which operations of a host hierarchy receive a thunk. The walk is
//! split into gathering (the class chain and interface list) and a pure
//! [`compute_intercept_set`] over those inputs.
//!
//! Exclusion rules, applied per declared operation:
//! - `final` operations are dropped and their slot is recorded, which also
//!   drops the same slot when met again further up the chain
//! - `static` operations (overriding has no effect)
//! - private and package-scope operations
//! - the zero-argument `finalize` teardown operation

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::dispatch::OperationId;
use crate::host::{HostType, HostTypeId, Method, PrimitiveKind, SlotKey, ValueType};

/// Name of the teardown operation that is never intercepted
const FINALIZE: &str = "finalize";

/// Deterministically ordered, duplicate-free operations to intercept
#[derive(Debug, Clone, Default)]
pub struct InterceptSet {
    operations: Vec<Arc<Method>>,
}

impl InterceptSet {
    /// Operations in table order
    pub fn operations(&self) -> &[Arc<Method>] {
        &self.operations
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check for an empty set
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Table index of the operation occupying `slot`
    pub fn index_of(&self, slot: &SlotKey) -> Option<OperationId> {
        self.operations
            .iter()
            .position(|m| m.occupies(slot))
            .map(|i| OperationId(i as u32))
    }

    /// Keep only abstract operations
    pub fn abstract_only(self) -> InterceptSet {
        InterceptSet {
            operations: self.operations.into_iter().filter(|m| m.is_abstract()).collect(),
        }
    }

    /// Consume into the operation list
    pub fn into_operations(self) -> Vec<Arc<Method>> {
        self.operations
    }
}

/// Compute the intercept set from a class chain (most-derived first) and an
/// interface list
///
/// The first representative met for a slot wins, so a concrete override in a
/// subclass shadows an abstract declaration above it or in an interface.
pub fn compute_intercept_set(chain: &[Arc<HostType>], interfaces: &[Arc<HostType>]) -> InterceptSet {
    let mut sink: BTreeMap<SlotKey, Arc<Method>> = BTreeMap::new();
    let mut seen_final: FxHashSet<SlotKey> = FxHashSet::default();

    for ty in chain.iter().chain(interfaces.iter()) {
        for method in &ty.methods {
            let slot = method.slot();
            if method.modifiers.is_final() {
                sink.remove(&slot);
                seen_final.insert(slot);
                continue;
            }
            if !is_interceptable(method) || seen_final.contains(&slot) {
                continue;
            }
            sink.entry(slot).or_insert_with(|| method.clone());
        }
    }

    InterceptSet {
        operations: sink.into_values().collect(),
    }
}

fn is_interceptable(method: &Method) -> bool {
    let m = method.modifiers;
    if m.is_static() || !(m.is_public() || m.is_protected()) {
        return false;
    }
    !(&*method.name == FINALIZE && method.params.is_empty())
}

/// `base` followed by its superclasses
pub fn class_chain(base: &Arc<HostType>) -> Vec<Arc<HostType>> {
    std::iter::successors(Some(base.clone()), |t| t.superclass.clone()).collect()
}

/// Interfaces of the class chain, then the extra interfaces, each with its
/// super-interfaces, without duplicates
pub fn interface_list(base: &HostType, extra: &[Arc<HostType>]) -> Vec<Arc<HostType>> {
    let mut out = base.all_interfaces();
    let mut seen: FxHashSet<HostTypeId> = out.iter().map(|i| i.id).collect();
    let mut stack: Vec<Arc<HostType>> = extra.iter().rev().cloned().collect();
    while let Some(iface) = stack.pop() {
        if !seen.insert(iface.id) {
            continue;
        }
        stack.extend(iface.interfaces.iter().rev().cloned());
        out.push(iface);
    }
    out
}

/// Operations of `base` and `extra` that receive a thunk
pub fn harvest(base: &Arc<HostType>, extra: &[Arc<HostType>]) -> InterceptSet {
    compute_intercept_set(&class_chain(base), &interface_list(base, extra))
}

/// Abstract operations of `base` and `extra` that need a placeholder body
pub fn harvest_abstract(base: &Arc<HostType>, extra: &[Arc<HostType>]) -> Vec<Arc<Method>> {
    harvest(base, extra).abstract_only().into_operations()
}

// ============================================================================
// Properties
// ============================================================================

/// Errors raised while pairing property accessors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarvestError {
    /// An operation of a property interface is not an accessor
    #[error("{method} does not represent a property: {reason}")]
    NotAProperty {
        /// Offending operation
        method: String,
        /// What is wrong with it
        reason: String,
    },

    /// A getter without setter or the reverse
    #[error("Property '{property}' has no {missing}")]
    MissingCounterpart {
        /// Property name
        property: String,
        /// `"getter"` or `"setter"`
        missing: &'static str,
    },

    /// Getter and setter disagree on the property type
    #[error("Property '{property}' is read as {getter} but written as {setter}")]
    TypeDisagreement {
        /// Property name
        property: String,
        /// Getter return type
        getter: String,
        /// Setter parameter type
        setter: String,
    },

    /// More than one getter or setter for the same property
    #[error("Property '{property}' has more than one {accessor}")]
    Ambiguous {
        /// Property name
        property: String,
        /// `"getter"` or `"setter"`
        accessor: &'static str,
    },
}

/// A getter/setter pair backed by a generated field
#[derive(Debug, Clone)]
pub struct PropertyPair {
    /// Property name (accessor name without prefix, first letter lowered)
    pub name: String,
    /// Property type
    pub ty: ValueType,
    /// `get`/`is` accessor
    pub getter: Arc<Method>,
    /// `set` accessor
    pub setter: Arc<Method>,
}

impl PropertyPair {
    /// Name of the backing field
    pub fn field_name(&self) -> String {
        format!("$__{}", self.name)
    }
}

enum Accessor {
    Getter(String),
    Setter(String),
}

fn property_name(accessor: &str, prefix: &str) -> Option<String> {
    let rest = accessor.strip_prefix(prefix)?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    Some(first.to_lowercase().chain(chars).collect())
}

fn is_boolean(ty: &ValueType) -> bool {
    match ty {
        ValueType::Primitive(PrimitiveKind::Boolean) => true,
        ValueType::Object(name) => &**name == crate::codec::boxed_type_name(PrimitiveKind::Boolean),
        _ => false,
    }
}

fn classify(method: &Method) -> Result<Accessor, HarvestError> {
    let fail = |reason: &str| HarvestError::NotAProperty {
        method: method.to_string(),
        reason: reason.to_string(),
    };
    let name = &*method.name;
    if let Some(prop) = property_name(name, "get") {
        if !method.params.is_empty() {
            return Err(fail("getter must take no arguments"));
        }
        if method.returns.is_void() {
            return Err(fail("getter must return a value"));
        }
        return Ok(Accessor::Getter(prop));
    }
    if let Some(prop) = property_name(name, "is") {
        if !method.params.is_empty() {
            return Err(fail("getter must take no arguments"));
        }
        if !is_boolean(&method.returns) {
            return Err(fail("is-getter must return boolean"));
        }
        return Ok(Accessor::Getter(prop));
    }
    if let Some(prop) = property_name(name, "set") {
        if method.params.len() != 1 {
            return Err(fail("setter must take exactly one argument"));
        }
        if !method.returns.is_void() {
            return Err(fail("setter must return void"));
        }
        return Ok(Accessor::Setter(prop));
    }
    Err(fail("name must start with get, is or set"))
}

/// Pair the accessors of property interfaces
///
/// Every non-static operation must be an accessor, and every property needs
/// exactly one getter and one setter of the same type. Pairs are ordered by
/// property name.
pub fn harvest_properties(interfaces: &[Arc<HostType>]) -> Result<Vec<PropertyPair>, HarvestError> {
    let mut getters: BTreeMap<String, Arc<Method>> = BTreeMap::new();
    let mut setters: BTreeMap<String, Arc<Method>> = BTreeMap::new();

    for iface in interfaces {
        for method in iface.methods.iter().filter(|m| !m.modifiers.is_static()) {
            match classify(method)? {
                Accessor::Getter(prop) => record(&mut getters, prop, method, "getter")?,
                Accessor::Setter(prop) => record(&mut setters, prop, method, "setter")?,
            }
        }
    }

    if let Some(prop) = setters.keys().find(|p| !getters.contains_key(*p)) {
        return Err(HarvestError::MissingCounterpart {
            property: prop.clone(),
            missing: "getter",
        });
    }

    let mut pairs = Vec::with_capacity(getters.len());
    for (name, getter) in getters {
        let setter = setters.remove(&name).ok_or_else(|| HarvestError::MissingCounterpart {
            property: name.clone(),
            missing: "setter",
        })?;
        if setter.params[0] != getter.returns {
            return Err(HarvestError::TypeDisagreement {
                property: name,
                getter: getter.returns.to_string(),
                setter: setter.params[0].to_string(),
            });
        }
        pairs.push(PropertyPair {
            name,
            ty: getter.returns.clone(),
            getter,
            setter,
        });
    }
    Ok(pairs)
}

fn record(
    table: &mut BTreeMap<String, Arc<Method>>,
    prop: String,
    method: &Arc<Method>,
    accessor: &'static str,
) -> Result<(), HarvestError> {
    match table.get(&prop) {
        // Redeclared by a sub-interface
        Some(existing) if existing.same_slot(method) => Ok(()),
        Some(_) => Err(HarvestError::Ambiguous { property: prop, accessor }),
        None => {
            table.insert(prop, method.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostTypeBuilder, Modifiers, Value};

    fn noop(
        builder: HostTypeBuilder,
        name: &str,
        returns: ValueType,
        modifiers: Modifiers,
    ) -> HostTypeBuilder {
        builder.native_method(name, vec![], returns, modifiers, |_, _| Ok(Value::Void))
    }

    fn names(set: &InterceptSet) -> Vec<String> {
        set.operations().iter().map(|m| m.name.to_string()).collect()
    }

    #[test]
    fn test_exclusions() {
        let mut b = HostTypeBuilder::class("demo.Mixed");
        b = noop(b, "visible", ValueType::Void, Modifiers::PUBLIC);
        b = noop(b, "inherited", ValueType::Void, Modifiers::PROTECTED);
        b = noop(b, "hidden", ValueType::Void, Modifiers::PRIVATE);
        b = noop(b, "local", ValueType::Void, Modifiers::NONE);
        b = noop(b, "shared", ValueType::Void, Modifiers::PUBLIC | Modifiers::STATIC);
        b = noop(b, "sealed", ValueType::Void, Modifiers::PUBLIC | Modifiers::FINAL);
        b = noop(b, "finalize", ValueType::Void, Modifiers::PROTECTED);
        let ty = b.build();

        assert_eq!(names(&harvest(&ty, &[])), vec!["inherited", "visible"]);
    }

    #[test]
    fn test_final_shadow_propagates_up_the_chain() {
        let base = noop(HostTypeBuilder::class("demo.Base"), "run", ValueType::Void, Modifiers::PUBLIC)
            .build();
        let mid = noop(
            HostTypeBuilder::class("demo.Mid").extends(&base),
            "run",
            ValueType::Void,
            Modifiers::PUBLIC | Modifiers::FINAL,
        )
        .build();
        let leaf = HostTypeBuilder::class("demo.Leaf").extends(&mid).build();

        assert!(harvest(&leaf, &[]).is_empty());
        // The ancestor alone still exposes it
        assert_eq!(names(&harvest(&base, &[])), vec!["run"]);
    }

    #[test]
    fn test_final_shadow_covers_interfaces() {
        let runnable = HostTypeBuilder::interface("demo.Runnable")
            .abstract_method("run", vec![], ValueType::Void)
            .build();
        let ty = noop(
            HostTypeBuilder::class("demo.Task").implements(&runnable),
            "run",
            ValueType::Void,
            Modifiers::PUBLIC | Modifiers::FINAL,
        )
        .build();
        assert!(harvest(&ty, &[]).is_empty());
    }

    #[test]
    fn test_dedup_keeps_most_derived() {
        let named = HostTypeBuilder::interface("demo.Named")
            .abstract_method("name", vec![], ValueType::string())
            .build();
        let base = HostTypeBuilder::class("demo.Base")
            .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
            .abstract_method("name", vec![], ValueType::string())
            .build();
        let leaf = noop(
            HostTypeBuilder::class("demo.Leaf").extends(&base).implements(&named),
            "name",
            ValueType::string(),
            Modifiers::PUBLIC,
        )
        .build();

        let set = harvest(&leaf, &[named.clone()]);
        assert_eq!(set.len(), 1);
        assert_eq!(&*set.operations()[0].declaring, "demo.Leaf");
        assert!(harvest_abstract(&leaf, &[]).is_empty());
        assert_eq!(harvest_abstract(&base, &[named]).len(), 1);
    }

    #[test]
    fn test_order_is_stable() {
        let mut b = HostTypeBuilder::class("demo.Ordered");
        b = noop(b, "zeta", ValueType::Void, Modifiers::PUBLIC);
        b = noop(b, "alpha", ValueType::string(), Modifiers::PUBLIC);
        b = noop(b, "alpha", ValueType::int(), Modifiers::PUBLIC);
        b = b.native_method("alpha", vec![ValueType::int()], ValueType::int(), Modifiers::PUBLIC, |_, _| {
            Ok(Value::Void)
        });
        let ty = b.build();

        let set = harvest(&ty, &[]);
        let slots: Vec<String> = set.operations().iter().map(|m| m.slot().to_string()).collect();
        assert_eq!(
            slots,
            vec![
                "int alpha()",
                "int alpha(int)",
                "host.lang.String alpha()",
                "void zeta()"
            ]
        );
        assert_eq!(set.index_of(&ty.methods[0].slot()), Some(OperationId(3)));
    }

    #[test]
    fn test_extra_interfaces_are_harvested() {
        let closeable = HostTypeBuilder::interface("demo.Closeable")
            .abstract_method("close", vec![], ValueType::Void)
            .build();
        let ty = HostTypeBuilder::class("demo.Plain").build();
        assert_eq!(names(&harvest(&ty, &[closeable])), vec!["close"]);
    }

    #[test]
    fn test_property_pairs() {
        let iface = HostTypeBuilder::interface("demo.Person")
            .abstract_method("getName", vec![], ValueType::string())
            .abstract_method("setName", vec![ValueType::string()], ValueType::Void)
            .abstract_method("isActive", vec![], ValueType::boolean())
            .abstract_method("setActive", vec![ValueType::boolean()], ValueType::Void)
            .build();
        let pairs = harvest_properties(&[iface]).unwrap();
        let names: Vec<_> = pairs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["active", "name"]);
        assert_eq!(pairs[1].field_name(), "$__name");
        assert_eq!(pairs[1].ty, ValueType::string());
    }

    #[test]
    fn test_property_violations_fail_fast() {
        let bad_arity = HostTypeBuilder::interface("demo.BadArity")
            .abstract_method("getName", vec![ValueType::int()], ValueType::string())
            .build();
        assert!(matches!(
            harvest_properties(&[bad_arity]),
            Err(HarvestError::NotAProperty { .. })
        ));

        let not_accessor = HostTypeBuilder::interface("demo.Action")
            .abstract_method("run", vec![], ValueType::Void)
            .build();
        assert!(matches!(
            harvest_properties(&[not_accessor]),
            Err(HarvestError::NotAProperty { .. })
        ));

        let read_only = HostTypeBuilder::interface("demo.ReadOnly")
            .abstract_method("getName", vec![], ValueType::string())
            .build();
        assert_eq!(
            harvest_properties(&[read_only]).unwrap_err(),
            HarvestError::MissingCounterpart {
                property: "name".to_string(),
                missing: "setter"
            }
        );

        let write_only = HostTypeBuilder::interface("demo.WriteOnly")
            .abstract_method("setName", vec![ValueType::string()], ValueType::Void)
            .build();
        assert!(matches!(
            harvest_properties(&[write_only]),
            Err(HarvestError::MissingCounterpart { missing: "getter", .. })
        ));

        let mismatched = HostTypeBuilder::interface("demo.Mismatched")
            .abstract_method("getAge", vec![], ValueType::int())
            .abstract_method("setAge", vec![ValueType::long()], ValueType::Void)
            .build();
        assert!(matches!(
            harvest_properties(&[mismatched]),
            Err(HarvestError::TypeDisagreement { .. })
        ));
    }
}
