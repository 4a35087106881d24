//! # Type Analyzer
//!
//! One pass per type-load event. Stages:
//! - **Stage 1**: Class-level gate: candidate rules for this type. Ancestry arrives
//!   pre-resolved from the hierarchy cache (interfaces first, then superclass chain).
//! - **Stage 2**: Capability matching: shims and mixins, each evaluated independently.
//! - **Stage 3**: Short-circuit: skip method analysis when nothing can bind.
//! - **Stage 4**: Per-method analysis: match, inherit through overrides, supersede,
//!   order, split general from declared-only.
//! - **Stage 5**: Surfacing: bind inherited, non-overridden methods whose rules no
//!   concrete ancestor has received yet.
//!
//! The result depends only on the thin descriptor, the registry, and the ancestors'
//! analyzed types. Sets are ordered (`BTreeSet`/`BTreeMap`) so output never depends
//! on hash iteration order.

use common::model::{
    AnalyzedMethod, AnalyzedType, Capability, MethodIdentity, RuleKey, ThinMethod, ThinType,
};
use common::registry::RuleRegistry;
use common::rule::RuleDescriptor;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Ancestors of one type, resolved through the hierarchy cache.
///
/// Duplicates (an interface reachable along two paths) are kept; every later stage
/// is set-based.
#[derive(Debug, Default, Clone)]
pub struct Ancestry {
    /// Each declared interface followed by its super-interfaces, transitively.
    pub interface_hierarchy: Vec<Arc<AnalyzedType>>,
    /// The superclass followed by its own interfaces and superclasses.
    pub super_hierarchy: Vec<Arc<AnalyzedType>>,
}

impl Ancestry {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AnalyzedType>> {
        self.interface_hierarchy
            .iter()
            .chain(self.super_hierarchy.iter())
    }
}

/// Analyzes one thin descriptor against its resolved ancestry.
pub struct TypeAnalyzer<'a> {
    registry: &'a RuleRegistry,
    thin: &'a ThinType,
    candidates: Vec<Arc<RuleDescriptor>>,
    ancestry: Ancestry,
}

impl<'a> TypeAnalyzer<'a> {
    /// Stage 1: computes the candidate rule set.
    pub fn new(registry: &'a RuleRegistry, thin: &'a ThinType, ancestry: Ancestry) -> Self {
        let candidates = oracle::candidate_rules(registry, &thin.name, &thin.tags);
        Self {
            registry,
            thin,
            candidates,
            ancestry,
        }
    }

    /// Runs stages 2 through 5 and builds the immutable result.
    pub fn analyze(self) -> AnalyzedType {
        let thin = self.thin;

        // Stage 2: capabilities.
        let shims = match_capabilities(self.registry.shims(), &thin.name, &self.ancestry, |a| {
            a.shims.as_slice()
        });
        let mixins = match_capabilities(self.registry.mixins(), &thin.name, &self.ancestry, |a| {
            a.mixins.as_slice()
        });

        // Stage 3: short-circuit.
        let skip_methods = if thin.is_interface() {
            self.candidates.is_empty()
        } else {
            self.candidates.is_empty()
                && shims.is_empty()
                && mixins.is_empty()
                && !self.ancestry.iter().any(|a| a.has_bindings())
        };

        let mut methods = Vec::new();
        if !skip_methods {
            // Stage 4: declared methods.
            methods.extend(thin.methods.iter().filter_map(|m| self.analyze_method(m)));

            // Stage 5: inherited obligations, concrete types only.
            if !thin.is_interface() && !thin.is_abstract() {
                methods.extend(self.surface_inherited());
            }
        }

        tracing::debug!(
            type_name = %thin.name,
            candidates = self.candidates.len(),
            methods = methods.len(),
            shims = shims.len(),
            mixins = mixins.len(),
            short_circuit = skip_methods,
            "analyzed type"
        );

        AnalyzedType {
            name: thin.name.clone(),
            super_name: thin.super_name.clone(),
            interface_names: thin.interface_names.clone(),
            modifiers: thin.modifiers,
            methods,
            shims,
            mixins,
            unresolved: false,
        }
    }

    /// Stage 4 for one declared method. `None` when nothing binds.
    fn analyze_method(&self, method: &ThinMethod) -> Option<AnalyzedMethod> {
        if method.is_bridge() {
            return None;
        }

        let mut matched: BTreeSet<RuleKey> = self
            .candidates
            .iter()
            .filter(|r| oracle::method_level_matches(r, method))
            .map(|r| r.key().clone())
            .collect();

        // Rules inherited from every ancestor method with the same identity.
        let identity = method.identity();
        for ancestor in self.ancestry.iter() {
            for inherited in ancestor
                .methods
                .iter()
                .filter(|m| m.is_inheritable() && m.has_identity(&identity))
            {
                matched.extend(inherited.rules.iter().cloned());
                matched.extend(inherited.declared_only_rules.iter().cloned());
            }
        }

        if matched.is_empty() {
            return None;
        }

        let (rules, declared_only) = self.resolve_bindings(matched, &BTreeSet::new());
        if rules.is_empty() && declared_only.is_empty() {
            return None;
        }
        Some(AnalyzedMethod::from_thin(method, rules, declared_only))
    }

    /// Stage 5. Keyed by identity, so an interface method reachable along several
    /// paths surfaces once.
    fn surface_inherited(&self) -> Vec<AnalyzedMethod> {
        let declared: HashSet<MethodIdentity> =
            self.thin.methods.iter().map(ThinMethod::identity).collect();

        let mut obligations: BTreeMap<MethodIdentity, Obligation<'_>> = BTreeMap::new();
        for ancestor in self.ancestry.iter() {
            for method in ancestor.methods.iter().filter(|m| m.is_inheritable()) {
                let identity = method.identity();
                if declared.contains(&identity) {
                    continue;
                }
                let obligation = obligations
                    .entry(identity)
                    .or_insert_with(|| Obligation::new(method));
                if ancestor.is_interface() {
                    // Interfaces are never rewritten: their general rules are owed here.
                    obligation.owed.extend(method.rules.iter().cloned());
                }
                // Declared-only rules become owed once this type satisfies them.
                obligation.owed.extend(
                    method
                        .declared_only_rules
                        .iter()
                        .filter(|k| self.is_active(k))
                        .cloned(),
                );
            }
        }

        // What a non-interface ancestor already wove into a body is not owed again,
        // but still displaces what it supersedes.
        for ancestor in self.ancestry.iter().filter(|a| !a.is_interface()) {
            for method in ancestor.methods.iter().filter(|m| m.has_body()) {
                if let Some(obligation) = obligations.get_mut(&method.identity()) {
                    for woven in &method.rules {
                        obligation.owed.remove(woven);
                        obligation.woven.insert(woven.clone());
                    }
                }
            }
        }

        obligations
            .into_values()
            .filter(|o| !o.owed.is_empty())
            .filter_map(|o| {
                let (active, _) = self.resolve_bindings(o.owed, &o.woven);
                (!active.is_empty()).then(|| o.template.surfaced_with(active))
            })
            .collect()
    }

    /// Applies supersession and splits general from declared-only.
    ///
    /// Only rules active at this type can supersede; a pending declared-only rule
    /// displaces nothing until it is woven. `woven` are rules an ancestor already
    /// applies to the same body; they supersede without being bound again. Input
    /// order (`RuleKey` order) is kept.
    fn resolve_bindings(
        &self,
        matched: BTreeSet<RuleKey>,
        woven: &BTreeSet<RuleKey>,
    ) -> (Vec<RuleKey>, Vec<RuleKey>) {
        let (active, pending): (Vec<RuleKey>, Vec<RuleKey>) =
            matched.into_iter().partition(|k| self.is_active(k));

        let superseded: HashSet<&str> = active
            .iter()
            .chain(woven)
            .filter_map(|k| self.registry.rule(k.id()))
            .filter_map(|r| r.supersedes())
            .collect();

        let keep = |k: &RuleKey| !superseded.contains(k.id());
        (
            active.into_iter().filter(|k| keep(k)).collect(),
            pending.into_iter().filter(|k| keep(k)).collect(),
        )
    }

    /// A rule is active (woven here) when its subtype restriction, if any, matches
    /// this type or one of its ancestors.
    fn is_active(&self, key: &RuleKey) -> bool {
        match self.registry.rule(key.id()) {
            Some(rule) => oracle::subtype_restriction_matches(
                rule,
                std::iter::once(self.thin.name.as_str())
                    .chain(self.ancestry.iter().map(|a| a.name.as_str())),
            ),
            None => true,
        }
    }
}

/// Rules owed to one inherited, non-overridden method.
struct Obligation<'m> {
    /// Metadata source for the surfaced copy.
    template: &'m AnalyzedMethod,
    owed: BTreeSet<RuleKey>,
    woven: BTreeSet<RuleKey>,
}

impl<'m> Obligation<'m> {
    fn new(template: &'m AnalyzedMethod) -> Self {
        Self {
            template,
            owed: BTreeSet::new(),
            woven: BTreeSet::new(),
        }
    }
}

/// Stage 2 for one capability kind.
///
/// (registered capabilities naming this type) ∪ (capabilities on any interface in
/// this type's interface hierarchy) − (capabilities on any non-interface ancestor).
fn match_capabilities<C, F>(
    registered: &[Arc<C>],
    type_name: &str,
    ancestry: &Ancestry,
    attached: F,
) -> Vec<Arc<C>>
where
    C: Capability + Ord,
    F: Fn(&AnalyzedType) -> &[Arc<C>],
{
    let mut matched: BTreeSet<Arc<C>> = registered
        .iter()
        .filter(|c| c.targets_type(type_name))
        .cloned()
        .collect();
    for iface in &ancestry.interface_hierarchy {
        matched.extend(attached(iface).iter().cloned());
    }
    for ancestor in ancestry.iter().filter(|a| !a.is_interface()) {
        for capability in attached(ancestor) {
            matched.remove(capability);
        }
    }
    matched.into_iter().collect()
}
