//! # Rule Registry: Compiled, Immutable Rule Index
//!
//! Built once at startup from a [`RuleSet`] and published behind an `Arc`.
//! Read-only thereafter, so concurrent analyses share it without synchronization.

use crate::config::{ConfigError, RuleSet};
use crate::model::{MixinCapability, ShimCapability};
use crate::rule::{RuleCompileError, RuleDescriptor};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Errors from registry construction.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Rule `{id}` is invalid: {source}")]
    InvalidRule {
        id: String,
        #[source]
        source: RuleCompileError,
    },
    #[error("Duplicate rule id: {0}")]
    DuplicateRule(String),
    #[error("Duplicate capability id: {0}")]
    DuplicateCapability(String),
}

/// Immutable collection of compiled rules and capabilities.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    /// Sorted by `(order, id)`.
    rules: Vec<Arc<RuleDescriptor>>,
    by_id: HashMap<Arc<str>, Arc<RuleDescriptor>>,
    shims: Vec<Arc<ShimCapability>>,
    mixins: Vec<Arc<MixinCapability>>,
}

impl RuleRegistry {
    /// Creates an empty registry (nothing ever matches).
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles every rule and capability in `set`.
    ///
    /// # Errors
    /// Invalid patterns, unknown modifier tokens, and duplicate ids. A `..` outside the
    /// last parameter position is not an error here: it is reported and the rule then
    /// fails to match at analysis time.
    pub fn compile(mut set: RuleSet) -> Result<Self, RegistryError> {
        set.sort();

        let mut rules = Vec::with_capacity(set.rules.len());
        let mut by_id = HashMap::with_capacity(set.rules.len());
        for spec in &set.rules {
            let rule = RuleDescriptor::compile(spec).map_err(|source| RegistryError::InvalidRule {
                id: spec.id.clone(),
                source,
            })?;
            if rule.has_misplaced_rest() {
                tracing::warn!(
                    rule = %spec.id,
                    "`..` wildcard is only valid in the last parameter position; rule will never match"
                );
            }
            let rule = Arc::new(rule);
            if by_id.insert(rule.key.id.clone(), Arc::clone(&rule)).is_some() {
                return Err(RegistryError::DuplicateRule(spec.id.clone()));
            }
            rules.push(rule);
        }

        let mut capability_ids = HashSet::new();
        for id in set
            .shims
            .iter()
            .map(|s| &s.id)
            .chain(set.mixins.iter().map(|m| &m.id))
        {
            if !capability_ids.insert(id.as_str()) {
                return Err(RegistryError::DuplicateCapability(id.clone()));
            }
        }

        Ok(Self {
            rules,
            by_id,
            shims: set.shims.into_iter().map(Arc::new).collect(),
            mixins: set.mixins.into_iter().map(Arc::new).collect(),
        })
    }

    /// Loads a `.json` or `.rkyv` rule document and compiles it.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let set = RuleSet::load(path)?;
        Self::compile(set)
    }

    pub fn rules(&self) -> &[Arc<RuleDescriptor>] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&Arc<RuleDescriptor>> {
        self.by_id.get(id)
    }

    pub fn shims(&self) -> &[Arc<ShimCapability>] {
        &self.shims
    }

    pub fn mixins(&self) -> &[Arc<MixinCapability>] {
        &self.mixins
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the registry holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
