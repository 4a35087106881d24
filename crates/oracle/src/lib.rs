//! # The Oracle: Rule Matching
//!
//! Pure predicates testing one compiled rule against one type or one method.
//! No state, no allocation on the hot path beyond what `regex` does internally.
//!
//! Malformed predicates never abort an analysis: they fail that one rule's match
//! and are reported through `tracing`.

use common::model::{Modifiers, ThinMethod, CONSTRUCTOR_NAME, STATIC_INITIALIZER_NAME};
use common::registry::RuleRegistry;
use common::rule::{ModifierPredicate, ParamMatcher, Predicate, RuleDescriptor};
use std::sync::Arc;

/// Class-level gate.
///
/// Matches when the rule's class-tag predicate matches any tag on the type, or the
/// class-name predicate matches the type name. An empty class-name predicate only
/// counts when the rule declares no class-tag predicate; otherwise a tag-only rule
/// would match every type.
pub fn class_level_matches(rule: &RuleDescriptor, type_name: &str, type_tags: &[String]) -> bool {
    if !rule.class_tag.is_any() && type_tags.iter().any(|t| rule.class_tag.matches(t)) {
        return true;
    }
    match &rule.class_name {
        Predicate::Any => rule.class_tag.is_any(),
        name => name.matches(type_name),
    }
}

/// Method-level gate: conjunction of name, parameters, return type, modifiers, tags.
pub fn method_level_matches(rule: &RuleDescriptor, method: &ThinMethod) -> bool {
    if method.name == STATIC_INITIALIZER_NAME {
        return false;
    }
    if !method_name_matches(&rule.method_name, &method.name) {
        return false;
    }
    if let Some(matchers) = &rule.parameter_types {
        if !parameter_types_match(rule.id(), matchers, &method.parameter_types) {
            return false;
        }
    }
    if !rule.return_type.matches(&method.return_type) {
        return false;
    }
    if !rule
        .modifiers
        .iter()
        .all(|m| modifier_holds(*m, method.modifiers))
    {
        return false;
    }
    rule.method_tag.is_any() || method.tags.iter().any(|t| rule.method_tag.matches(t))
}

/// Positional parameter match.
///
/// `*` matches one parameter, a trailing `..` consumes the rest, anything else must
/// match exactly (or by pattern). Without a trailing `..` the lengths must agree.
/// A `..` in any other position is a configuration error: logged, never matches.
pub fn parameter_types_match(rule_id: &str, matchers: &[ParamMatcher], params: &[String]) -> bool {
    for (i, matcher) in matchers.iter().enumerate() {
        if let ParamMatcher::Rest = matcher {
            if i + 1 != matchers.len() {
                tracing::warn!(
                    rule = rule_id,
                    position = i,
                    "misplaced `..` wildcard; treating as non-match"
                );
                return false;
            }
            return true;
        }
        match params.get(i) {
            Some(param) if matcher.matches(param) => {}
            _ => return false,
        }
    }
    matchers.len() == params.len()
}

/// Returns `true` if the rule has no subtype restriction, or the restriction matches
/// one of `hierarchy_names` (the analyzed type followed by its ancestors).
pub fn subtype_restriction_matches<'a, I>(rule: &RuleDescriptor, hierarchy_names: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    rule.subtype_restriction.is_any()
        || hierarchy_names
            .into_iter()
            .any(|name| rule.subtype_restriction.matches(name))
}

/// Candidate rule set for a type: every rule passing the class-level gate, in
/// registry order.
pub fn candidate_rules(
    registry: &RuleRegistry,
    type_name: &str,
    type_tags: &[String],
) -> Vec<Arc<RuleDescriptor>> {
    registry
        .rules()
        .iter()
        .filter(|r| class_level_matches(r, type_name, type_tags))
        .cloned()
        .collect()
}

fn method_name_matches(predicate: &Predicate, name: &str) -> bool {
    match predicate {
        // Patterns never select constructors; they must be named exactly.
        Predicate::Pattern(_) if name == CONSTRUCTOR_NAME => false,
        p => p.matches(name),
    }
}

fn modifier_holds(predicate: ModifierPredicate, modifiers: Modifiers) -> bool {
    match predicate {
        ModifierPredicate::Public => modifiers.contains(Modifiers::PUBLIC),
        ModifierPredicate::Static => modifiers.contains(Modifiers::STATIC),
        ModifierPredicate::NotStatic => !modifiers.contains(Modifiers::STATIC),
    }
}
