//! # Common: Shared Model for the Weaving Engine
//!
//! **Core Types**:
//! - [`model`]: thin descriptors in, analyzed types out, plus capabilities and identities.
//! - [`config`]: serde/rkyv rule documents (`RuleSet`, `RuleSpec`, `Behavior`).
//! - [`rule`]: compiled predicates (`Predicate`, `ParamMatcher`, `RuleDescriptor`).
//! - [`registry`]: the immutable compiled `RuleRegistry`.

pub mod config;
pub mod model;
pub mod registry;
pub mod rule;

pub use config::{Behavior, ConfigError, RuleSet, RuleSpec};
pub use model::{
    AnalyzedMethod, AnalyzedType, Capability, MethodIdentity, MixinCapability, Modifiers,
    RuleKey, ShimCapability, ThinMethod, ThinType,
};
pub use registry::{RegistryError, RuleRegistry};
pub use rule::{ModifierPredicate, ParamMatcher, Predicate, RuleDescriptor};
