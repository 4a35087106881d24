//! # Type Model: Thin Descriptors and Analyzed Types
//!
//! **Inputs** (`ThinType`, `ThinMethod`): the minimal facts an external parser extracts
//! from a type at load time. Consumed once per load event.
//!
//! **Outputs** (`AnalyzedType`, `AnalyzedMethod`): the resolved, immutable per-type
//! result. Stored in the hierarchy cache and read by every descendant's analysis.
//!
//! All rule and capability lists on outputs are kept sorted and de-duplicated, so two
//! analyses of identical input compare equal with `==` and serialize byte-identically.

use bitflags::bitflags;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::sync::Arc;

/// Method name reserved for constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Method name reserved for static initializers.
pub const STATIC_INITIALIZER_NAME: &str = "<clinit>";

bitflags! {
    /// Access and kind flags shared by types and methods.
    ///
    /// Serialized in human-readable formats as `"PUBLIC | STATIC"`.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerdeSerialize, SerdeDeserialize,
    )]
    #[serde(transparent)]
    pub struct Modifiers: u16 {
        const PUBLIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const PROTECTED = 1 << 2;
        const STATIC = 1 << 3;
        const FINAL = 1 << 4;
        const ABSTRACT = 1 << 5;
        /// Type-level only: the type is an interface.
        const INTERFACE = 1 << 6;
        const SYNTHETIC = 1 << 7;
        /// Method-level only: compiler-generated bridge that delegates to the real method.
        const BRIDGE = 1 << 8;
        const NATIVE = 1 << 9;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Modifiers::empty()
    }
}

/// Equivalence key for "the same method across an override chain".
///
/// Name plus ordered parameter types. Return type and modifiers are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerdeSerialize)]
pub struct MethodIdentity {
    pub name: String,
    pub parameter_types: Vec<String>,
}

impl MethodIdentity {
    pub fn new(name: impl Into<String>, parameter_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            parameter_types,
        }
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(", "))
    }
}

/// A rule binding as stored on analyzed methods.
///
/// Ordering is `(order, id)`: a deterministic total order that fixes the nesting of
/// timers and trace entries when several rules bind to one method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerdeSerialize)]
pub struct RuleKey {
    pub order: i32,
    pub id: Arc<str>,
}

impl RuleKey {
    pub fn new(order: i32, id: impl Into<Arc<str>>) -> Self {
        Self {
            order,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn default_return_type() -> String {
    "void".to_string()
}

/// Minimal parsed facts about one method.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct ThinMethod {
    pub name: String,
    #[serde(default)]
    pub parameter_types: Vec<String>,
    #[serde(default = "default_return_type")]
    pub return_type: String,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Method-level tags (annotations).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared exception types.
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl ThinMethod {
    /// Public, non-static, `void`, no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_types: Vec::new(),
            return_type: default_return_type(),
            modifiers: Modifiers::PUBLIC,
            tags: Vec::new(),
            exceptions: Vec::new(),
        }
    }

    pub fn params<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn identity(&self) -> MethodIdentity {
        MethodIdentity::new(self.name.clone(), self.parameter_types.clone())
    }

    pub fn is_bridge(&self) -> bool {
        self.modifiers.contains(Modifiers::BRIDGE)
    }
}

/// Minimal parsed facts about one type, before analysis.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct ThinType {
    pub name: String,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interface_names: Vec<String>,
    /// Class-level tags (annotations).
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub methods: Vec<ThinMethod>,
}

impl ThinType {
    /// A public concrete class with no super type.
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interface_names: Vec::new(),
            tags: Vec::new(),
            modifiers: Modifiers::PUBLIC,
            methods: Vec::new(),
        }
    }

    /// A public interface.
    pub fn interface(name: impl Into<String>) -> Self {
        let mut thin = Self::class(name);
        thin.modifiers |= Modifiers::INTERFACE | Modifiers::ABSTRACT;
        thin
    }

    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn implements<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interface_names
            .extend(interfaces.into_iter().map(Into::into));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn method(mut self, method: ThinMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(Modifiers::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT)
    }
}

/// A capability attached to every type its targets name exactly.
pub trait Capability {
    fn id(&self) -> &str;
    fn targets(&self) -> &[String];

    fn targets_type(&self, type_name: &str) -> bool {
        self.targets().iter().any(|t| t == type_name)
    }
}

/// Extra interface (accessor surface) grafted onto a target type.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ShimCapability {
    pub id: String,
    pub targets: Vec<String>,
    /// Interface the shim makes the target implement.
    pub interface: String,
}

impl Capability for ShimCapability {
    fn id(&self) -> &str {
        &self.id
    }

    fn targets(&self) -> &[String] {
        &self.targets
    }
}

/// Extra state and behavior (fields plus optional init hook) mixed into a target type.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct MixinCapability {
    pub id: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub init_method: Option<String>,
}

impl Capability for MixinCapability {
    fn id(&self) -> &str {
        &self.id
    }

    fn targets(&self) -> &[String] {
        &self.targets
    }
}

/// One method's resolved rule bindings.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize)]
pub struct AnalyzedMethod {
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
    pub modifiers: Modifiers,
    pub exceptions: Vec<String>,
    /// Rules woven at this type; they apply through any override.
    pub rules: Vec<RuleKey>,
    /// Rules matched but waiting for a subtype whose hierarchy satisfies their
    /// subtype restriction. Not woven at this type.
    pub declared_only_rules: Vec<RuleKey>,
    /// `true` when the method is inherited, not declared, and was bound here because
    /// no concrete ancestor had received these rules yet.
    pub surfaced: bool,
}

impl AnalyzedMethod {
    pub fn from_thin(
        method: &ThinMethod,
        rules: Vec<RuleKey>,
        declared_only_rules: Vec<RuleKey>,
    ) -> Self {
        Self {
            name: method.name.clone(),
            parameter_types: method.parameter_types.clone(),
            return_type: method.return_type.clone(),
            modifiers: method.modifiers,
            exceptions: method.exceptions.clone(),
            rules,
            declared_only_rules,
            surfaced: false,
        }
    }

    /// Copy for binding an inherited method on a concrete subtype.
    ///
    /// Declared-only list cleared; `ABSTRACT` dropped since the subtype implements it.
    pub fn surfaced_with(&self, rules: Vec<RuleKey>) -> Self {
        Self {
            name: self.name.clone(),
            parameter_types: self.parameter_types.clone(),
            return_type: self.return_type.clone(),
            modifiers: self.modifiers - Modifiers::ABSTRACT,
            exceptions: self.exceptions.clone(),
            rules,
            declared_only_rules: Vec::new(),
            surfaced: true,
        }
    }

    pub fn identity(&self) -> MethodIdentity {
        MethodIdentity::new(self.name.clone(), self.parameter_types.clone())
    }

    /// Allocation-free identity comparison.
    pub fn has_identity(&self, identity: &MethodIdentity) -> bool {
        self.name == identity.name && self.parameter_types == identity.parameter_types
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT)
    }

    /// Abstract and native methods have no body for the rewriter to patch.
    pub fn has_body(&self) -> bool {
        !self
            .modifiers
            .intersects(Modifiers::ABSTRACT | Modifiers::NATIVE)
    }

    /// Instance methods other than constructors are inherited by subtypes.
    pub fn is_inheritable(&self) -> bool {
        !self
            .modifiers
            .intersects(Modifiers::STATIC | Modifiers::PRIVATE)
            && self.name != CONSTRUCTOR_NAME
            && self.name != STATIC_INITIALIZER_NAME
    }
}

/// Fully resolved per-type result. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize)]
pub struct AnalyzedType {
    pub name: String,
    pub super_name: Option<String>,
    pub interface_names: Vec<String>,
    pub modifiers: Modifiers,
    pub methods: Vec<AnalyzedMethod>,
    pub shims: Vec<Arc<ShimCapability>>,
    pub mixins: Vec<Arc<MixinCapability>>,
    /// Sentinel for an ancestor the loading context could not supply.
    pub unresolved: bool,
}

impl AnalyzedType {
    /// Sentinel with empty method and capability sets.
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interface_names: Vec::new(),
            modifiers: Modifiers::empty(),
            methods: Vec::new(),
            shims: Vec::new(),
            mixins: Vec::new(),
            unresolved: true,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(Modifiers::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT)
    }

    pub fn method(&self, identity: &MethodIdentity) -> Option<&AnalyzedMethod> {
        self.methods.iter().find(|m| m.has_identity(identity))
    }

    /// Returns `true` if any method carries a binding (general or declared-only).
    pub fn has_bindings(&self) -> bool {
        !self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_return_and_modifiers() {
        let a = ThinMethod::new("bar").params(["int"]).returns("int");
        let b = ThinMethod::new("bar")
            .params(["int"])
            .modifiers(Modifiers::STATIC);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), ThinMethod::new("bar").identity());
    }

    #[test]
    fn test_rule_key_ordering() {
        let mut keys = vec![
            RuleKey::new(5, "b"),
            RuleKey::new(1, "z"),
            RuleKey::new(5, "a"),
        ];
        keys.sort();
        let ids: Vec<&str> = keys.iter().map(|k| k.id()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_surfaced_copy_clears_declared_only_and_abstract() {
        let thin = ThinMethod::new("run").modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT);
        let method = AnalyzedMethod::from_thin(
            &thin,
            vec![RuleKey::new(0, "r1")],
            vec![RuleKey::new(0, "r2")],
        );
        let copy = method.surfaced_with(vec![RuleKey::new(0, "r1")]);
        assert!(copy.declared_only_rules.is_empty());
        assert!(!copy.is_abstract());
        assert!(copy.surfaced);
        assert!(copy.has_identity(&thin.identity()));
    }

    #[test]
    fn test_has_body() {
        let native = ThinMethod::new("hash").modifiers(Modifiers::PUBLIC | Modifiers::NATIVE);
        let abstract_method = ThinMethod::new("run").modifiers(Modifiers::ABSTRACT);
        let concrete = ThinMethod::new("run");
        assert!(!AnalyzedMethod::from_thin(&native, vec![], vec![]).has_body());
        assert!(!AnalyzedMethod::from_thin(&abstract_method, vec![], vec![]).has_body());
        assert!(AnalyzedMethod::from_thin(&concrete, vec![], vec![]).has_body());
    }

    #[test]
    fn test_inheritable() {
        let ctor = AnalyzedMethod::from_thin(&ThinMethod::new(CONSTRUCTOR_NAME), vec![], vec![]);
        let stat = AnalyzedMethod::from_thin(
            &ThinMethod::new("helper").modifiers(Modifiers::STATIC),
            vec![],
            vec![],
        );
        let inst = AnalyzedMethod::from_thin(&ThinMethod::new("run"), vec![], vec![]);
        assert!(!ctor.is_inheritable());
        assert!(!stat.is_inheritable());
        assert!(inst.is_inheritable());
    }

    #[test]
    fn test_sentinel_is_empty() {
        let sentinel = AnalyzedType::unresolved("missing.Type");
        assert!(sentinel.unresolved);
        assert!(!sentinel.has_bindings());
        assert!(sentinel.shims.is_empty() && sentinel.mixins.is_empty());
        assert!(!sentinel.is_interface());
    }

    #[test]
    fn test_thin_type_json() {
        let json = r#"{
            "name": "com.acme.Foo",
            "super_name": "com.acme.Base",
            "interface_names": ["java.lang.Runnable"],
            "modifiers": "PUBLIC | FINAL",
            "methods": [{ "name": "run" }]
        }"#;
        let thin: ThinType = serde_json::from_str(json).unwrap();
        assert_eq!(thin.super_name.as_deref(), Some("com.acme.Base"));
        assert!(thin.modifiers.contains(Modifiers::FINAL));
        assert!(!thin.is_interface());
        assert_eq!(thin.methods[0].return_type, "void");
        assert!(thin.methods[0].modifiers.is_empty());
    }
}
