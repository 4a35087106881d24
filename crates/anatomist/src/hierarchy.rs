//! # Hierarchy Cache
//!
//! Concurrent map `(type name, loading context) → AnalyzedType`, filled lazily as
//! type-load events arrive.
//!
//! **Concurrency**: each key owns a `OnceLock` slot. The map's shard lock is held
//! only long enough to fetch or insert the slot; analysis runs outside it. Threads
//! racing on one key block on the slot until the single analysis finishes, while
//! unrelated keys proceed in parallel.
//!
//! **Re-entrancy**: a thread that asks for a type it is already analyzing (a cyclic
//! hierarchy) gets an uncached sentinel instead of deadlocking on its own slot.

use crate::analyzer::{Ancestry, TypeAnalyzer};
use crate::context::{ContextId, LoadingContext};
use crate::decision::WeavingDecision;
use common::model::{AnalyzedType, ThinType};
use common::registry::RuleRegistry;
use dashmap::DashMap;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Cache key. The same name in two contexts may denote different types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    pub name: String,
    pub context: ContextId,
}

impl TypeKey {
    pub fn new(name: impl Into<String>, context: ContextId) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }
}

type Slot = Arc<OnceLock<Arc<AnalyzedType>>>;

thread_local! {
    static IN_FLIGHT: RefCell<HashSet<TypeKey>> = RefCell::new(HashSet::new());
}

/// Marks a key as being analyzed on this thread; unmarks on drop (including unwind).
struct InFlightGuard(TypeKey);

impl InFlightGuard {
    fn enter(key: TypeKey) -> Self {
        IN_FLIGHT.with(|f| f.borrow_mut().insert(key.clone()));
        Self(key)
    }

    fn is_active(key: &TypeKey) -> bool {
        IN_FLIGHT.with(|f| f.borrow().contains(key))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.with(|f| f.borrow_mut().remove(&self.0));
    }
}

/// Result of one type-load event.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub analyzed: Arc<AnalyzedType>,
    pub decision: WeavingDecision,
}

/// Counters since construction. `entries` is a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Analyses actually run.
    pub analyses: u64,
    /// Lookups answered from a completed slot.
    pub hits: u64,
    /// Unresolved sentinels produced, cached or not.
    pub sentinels: u64,
    pub entries: usize,
}

pub struct HierarchyCache {
    registry: Arc<RuleRegistry>,
    entries: DashMap<TypeKey, Slot>,
    analyses: AtomicU64,
    hits: AtomicU64,
    sentinels: AtomicU64,
}

impl HierarchyCache {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            entries: DashMap::new(),
            analyses: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            sentinels: AtomicU64::new(0),
        }
    }

    /// Analyzes a type being loaded and derives its weaving decision.
    ///
    /// If the type was already analyzed (say, as an ancestor of an earlier load) the
    /// cached result is reused. A cached unresolved sentinel is replaced by the
    /// analysis of the supplied descriptor.
    pub fn analyze(&self, thin: &ThinType, ctx: &dyn LoadingContext) -> AnalysisOutcome {
        let key = TypeKey::new(thin.name.as_str(), ctx.id());
        let mut analyzed = self.lookup_or_analyze(key.clone(), ctx, || Some(thin.clone()));
        if analyzed.unresolved && !InFlightGuard::is_active(&key) {
            analyzed = self.replace_sentinel(key, thin, ctx);
        }
        let decision = WeavingDecision::from_analyzed(&analyzed);
        AnalysisOutcome { analyzed, decision }
    }

    /// Returns the analyzed form of `name`, resolving and analyzing it (and,
    /// recursively, its ancestors) on a miss.
    ///
    /// Never fails: a name the context cannot supply yields a cached sentinel.
    pub fn get_analyzed(&self, name: &str, ctx: &dyn LoadingContext) -> Arc<AnalyzedType> {
        let key = TypeKey::new(name, ctx.id());
        self.lookup_or_analyze(key, ctx, || ctx.resolve(name))
    }

    /// `name`, then each interface's hierarchy, then the superclass's hierarchy.
    ///
    /// Each name appears once, at its first position.
    pub fn hierarchy(&self, name: &str, ctx: &dyn LoadingContext) -> Vec<Arc<AnalyzedType>> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_hierarchy(name, ctx, &mut visited, &mut out);
        out
    }

    /// Drops every entry of one context; returns how many were removed.
    pub fn evict_context(&self, context: ContextId) -> usize {
        let mut evicted = 0;
        self.entries.retain(|key, _| {
            let keep = key.context != context;
            if !keep {
                evicted += 1;
            }
            keep
        });
        tracing::debug!(%context, evicted, "evicted loading context");
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            analyses: self.analyses.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            sentinels: self.sentinels.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect_hierarchy(
        &self,
        name: &str,
        ctx: &dyn LoadingContext,
        visited: &mut HashSet<String>,
        out: &mut Vec<Arc<AnalyzedType>>,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let analyzed = self.get_analyzed(name, ctx);
        out.push(Arc::clone(&analyzed));
        for iface in &analyzed.interface_names {
            self.collect_hierarchy(iface, ctx, visited, out);
        }
        if let Some(super_name) = &analyzed.super_name {
            self.collect_hierarchy(super_name, ctx, visited, out);
        }
    }

    fn slot(&self, key: &TypeKey) -> Slot {
        if let Some(slot) = self.entries.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.entries.entry(key.clone()).or_default().value())
    }

    fn lookup_or_analyze<F>(
        &self,
        key: TypeKey,
        ctx: &dyn LoadingContext,
        load: F,
    ) -> Arc<AnalyzedType>
    where
        F: FnOnce() -> Option<ThinType>,
    {
        if InFlightGuard::is_active(&key) {
            tracing::warn!(
                type_name = %key.name,
                context = %key.context,
                "cyclic type hierarchy; substituting unresolved sentinel"
            );
            self.sentinels.fetch_add(1, Ordering::Relaxed);
            return Arc::new(AnalyzedType::unresolved(key.name));
        }

        let slot = self.slot(&key);
        if let Some(analyzed) = slot.get() {
            tracing::trace!(type_name = %key.name, context = %key.context, "cache hit");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(analyzed);
        }

        let analyzed = slot.get_or_init(|| {
            let _guard = InFlightGuard::enter(key.clone());
            match load() {
                Some(thin) => {
                    self.analyses.fetch_add(1, Ordering::Relaxed);
                    Arc::new(self.run_analysis(&thin, ctx))
                }
                None => {
                    tracing::warn!(
                        type_name = %key.name,
                        context = %key.context,
                        "type not resolvable; caching unresolved sentinel"
                    );
                    self.sentinels.fetch_add(1, Ordering::Relaxed);
                    Arc::new(AnalyzedType::unresolved(key.name.as_str()))
                }
            }
        });
        Arc::clone(analyzed)
    }

    /// Analyzes `thin` and installs it over a sentinel slot. Descendants analyzed
    /// against the sentinel keep their cached results.
    fn replace_sentinel(
        &self,
        key: TypeKey,
        thin: &ThinType,
        ctx: &dyn LoadingContext,
    ) -> Arc<AnalyzedType> {
        let analyzed = {
            let _guard = InFlightGuard::enter(key.clone());
            self.analyses.fetch_add(1, Ordering::Relaxed);
            Arc::new(self.run_analysis(thin, ctx))
        };

        let mut entry = self.entries.entry(key).or_default();
        match entry.value().get() {
            // Another loader of the same type got here first.
            Some(current) if !current.unresolved => Arc::clone(current),
            _ => {
                tracing::debug!(
                    type_name = %thin.name,
                    context = %ctx.id(),
                    "replacing unresolved sentinel with loaded descriptor"
                );
                *entry.value_mut() = Arc::new(OnceLock::from(Arc::clone(&analyzed)));
                analyzed
            }
        }
    }

    fn run_analysis(&self, thin: &ThinType, ctx: &dyn LoadingContext) -> AnalyzedType {
        let mut ancestry = Ancestry::default();
        for iface in &thin.interface_names {
            ancestry
                .interface_hierarchy
                .extend(self.hierarchy(iface, ctx));
        }
        if let Some(super_name) = &thin.super_name {
            ancestry.super_hierarchy = self.hierarchy(super_name, ctx);
        }
        tracing::trace!(
            type_name = %thin.name,
            ancestors = ancestry.iter().count(),
            "resolved ancestry"
        );
        TypeAnalyzer::new(&self.registry, thin, ancestry).analyze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DescriptorContext;
    use common::config::{RuleSet, RuleSpec};
    use common::model::{MethodIdentity, ThinMethod};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Counts resolve calls per name.
    struct CountingContext {
        inner: DescriptorContext,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CountingContext {
        fn new(inner: DescriptorContext) -> Self {
            Self {
                inner,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
        }
    }

    impl LoadingContext for CountingContext {
        fn id(&self) -> ContextId {
            self.inner.id()
        }

        fn resolve(&self, type_name: &str) -> Option<ThinType> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(type_name.to_string())
                .or_default() += 1;
            self.inner.resolve(type_name)
        }
    }

    fn cache_with_rule(class_name: &str, method_name: &str) -> HierarchyCache {
        let mut spec = RuleSpec::timer("R");
        spec.class_name = Some(class_name.into());
        spec.method_name = Some(method_name.into());
        let registry = RuleRegistry::compile(RuleSet {
            rules: vec![spec],
            ..Default::default()
        })
        .unwrap();
        HierarchyCache::new(Arc::new(registry))
    }

    fn sample_types(id: ContextId) -> DescriptorContext {
        DescriptorContext::from_types(
            id,
            [
                ThinType::interface("I").method(ThinMethod::new("run")),
                ThinType::class("Base").implements(["I"]),
                ThinType::class("Leaf").extends("Base"),
            ],
        )
    }

    #[test]
    fn test_hierarchy_order() {
        let cache = cache_with_rule("I", "run");
        let ctx = DescriptorContext::from_types(
            ContextId(1),
            [
                ThinType::interface("I1"),
                ThinType::interface("I2").implements(["I1"]),
                ThinType::class("S"),
                ThinType::class("T").implements(["I2"]).extends("S"),
            ],
        );
        let names: Vec<String> = cache
            .hierarchy("T", &ctx)
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["T", "I2", "I1", "S"]);
    }

    #[test]
    fn test_repeated_lookup_is_cached() {
        let cache = cache_with_rule("I", "run");
        let ctx = CountingContext::new(sample_types(ContextId(1)));

        let first = cache.get_analyzed("Leaf", &ctx);
        let second = cache.get_analyzed("Leaf", &ctx);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.calls("Leaf"), 1);
        assert_eq!(ctx.calls("I"), 1);

        let stats = cache.stats();
        assert_eq!(stats.analyses, 3);
        assert_eq!(stats.entries, 3);
        assert!(stats.hits >= 1);
    }

    #[test]
    fn test_concurrent_lookups_analyze_once() {
        let cache = cache_with_rule("I", "run");
        let ctx = CountingContext::new(sample_types(ContextId(1)));

        let results: Vec<Arc<AnalyzedType>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.get_analyzed("Leaf", &ctx)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for analyzed in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], analyzed));
        }
        for name in ["Leaf", "Base", "I"] {
            assert_eq!(ctx.calls(name), 1, "{name} resolved more than once");
        }
        assert_eq!(cache.stats().analyses, 3);
    }

    #[test]
    fn test_result_independent_of_load_order() {
        let ctx = sample_types(ContextId(1));

        let top_down = cache_with_rule("I", "run");
        top_down.get_analyzed("I", &ctx);
        top_down.get_analyzed("Base", &ctx);
        let a = top_down.get_analyzed("Leaf", &ctx);

        let bottom_up = cache_with_rule("I", "run");
        let b = bottom_up.get_analyzed("Leaf", &ctx);

        assert_eq!(*a, *b);
    }

    #[test]
    fn test_unresolvable_ancestor_is_sentinel() {
        let cache = cache_with_rule("I", "run");
        let ctx = CountingContext::new(DescriptorContext::from_types(
            ContextId(1),
            [ThinType::class("Orphan").extends("missing.Parent")],
        ));

        let orphan = cache.get_analyzed("Orphan", &ctx);
        assert!(!orphan.unresolved);
        assert!(orphan.methods.is_empty());

        let missing = cache.get_analyzed("missing.Parent", &ctx);
        assert!(missing.unresolved);
        // Sentinel is cached: the context is asked only once.
        assert_eq!(ctx.calls("missing.Parent"), 1);
        assert_eq!(cache.stats().sentinels, 1);
    }

    #[test]
    fn test_loaded_type_replaces_sentinel() {
        let cache = cache_with_rule("Dyn", "bar");
        let empty = DescriptorContext::new(ContextId(1));

        let child = cache.analyze(&ThinType::class("Child").extends("Dyn"), &empty);
        assert!(!child.decision.weave);
        assert!(cache.get_analyzed("Dyn", &empty).unresolved);

        let outcome = cache.analyze(&ThinType::class("Dyn").method(ThinMethod::new("bar")), &empty);
        assert!(!outcome.analyzed.unresolved);
        assert!(outcome.decision.weave);
        assert_eq!(outcome.decision.methods[0].rules[0].id(), "R");

        // Later lookups see the real analysis, not the sentinel.
        let cached = cache.get_analyzed("Dyn", &empty);
        assert!(Arc::ptr_eq(&cached, &outcome.analyzed));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cyclic_hierarchy_terminates() {
        let cache = cache_with_rule("I", "run");
        let ctx = DescriptorContext::from_types(
            ContextId(1),
            [
                ThinType::class("X").extends("Y"),
                ThinType::class("Y").extends("X"),
            ],
        );
        let x = cache.get_analyzed("X", &ctx);
        assert!(!x.unresolved);
        let names: Vec<String> = cache
            .hierarchy("Y", &ctx)
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["Y", "X"]);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let cache = cache_with_rule("I", "run");
        let with_method = sample_types(ContextId(1));
        let without_method = DescriptorContext::from_types(
            ContextId(2),
            [
                ThinType::interface("I"),
                ThinType::class("Base").implements(["I"]),
            ],
        );

        let run = MethodIdentity::new("run", vec![]);
        assert!(cache.get_analyzed("Base", &with_method).method(&run).is_some());
        assert!(cache.get_analyzed("Base", &without_method).method(&run).is_none());
    }

    #[test]
    fn test_evict_context() {
        let cache = cache_with_rule("I", "run");
        let one = sample_types(ContextId(1));
        let two = sample_types(ContextId(2));
        cache.get_analyzed("Leaf", &one);
        cache.get_analyzed("Leaf", &two);
        assert_eq!(cache.len(), 6);

        assert_eq!(cache.evict_context(ContextId(1)), 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.evict_context(ContextId(1)), 0);
    }

    #[test]
    fn test_reload_yields_same_decision() {
        let cache = cache_with_rule("I", "run");
        let ctx = sample_types(ContextId(1));
        let leaf = ThinType::class("Leaf").extends("Base");

        let first = cache.analyze(&leaf, &ctx);
        let second = cache.analyze(&leaf, &ctx);
        assert_eq!(first.decision, second.decision);
        assert!(Arc::ptr_eq(&first.analyzed, &second.analyzed));
        // Base already received the binding; Leaf has nothing to weave.
        assert!(!first.decision.weave);
    }

    #[test]
    fn test_analyze_reuses_ancestor_entry() {
        let cache = cache_with_rule("I", "run");
        let ctx = sample_types(ContextId(1));
        let base = cache.get_analyzed("Base", &ctx);
        let analyses = cache.stats().analyses;

        let outcome = cache.analyze(&ThinType::class("Base").implements(["I"]), &ctx);
        assert!(Arc::ptr_eq(&base, &outcome.analyzed));
        assert_eq!(cache.stats().analyses, analyses);
        assert!(outcome.decision.weave);
    }
}
