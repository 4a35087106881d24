//! Compiled rule descriptors.
//!
//! `RuleSpec` strings are compiled once at registry construction into closed
//! predicate variants, so "empty means match-all" is a type, not a convention.

use crate::config::{Behavior, RuleSpec};
use crate::model::RuleKey;
use regex::Regex;
use std::sync::Arc;

/// Token consuming all remaining parameters. Only legal in the last position.
pub const REST_WILDCARD: &str = "..";

/// Token matching exactly one parameter of any type.
pub const SINGLE_WILDCARD: &str = "*";

/// Name predicate: match everything, one exact value, or an anchored pattern.
#[derive(Debug, Clone)]
pub enum Predicate {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl Predicate {
    /// `None` or empty string means `Any`.
    pub fn exact(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Predicate::Any,
            Some(v) => Predicate::Exact(v.to_string()),
        }
    }

    /// Compiles a `/regex/` or `*`-glob pattern. `None` or empty means `Any`.
    pub fn pattern(source: Option<&str>) -> Result<Self, regex::Error> {
        match source {
            None | Some("") => Ok(Predicate::Any),
            Some(src) => Ok(Predicate::Pattern(compile_pattern(src)?)),
        }
    }

    /// Exact/pattern field pair as authored. The pattern form wins when both are set.
    pub fn from_fields(exact: Option<&str>, pattern: Option<&str>) -> Result<Self, regex::Error> {
        match Self::pattern(pattern)? {
            Predicate::Any => Ok(Self::exact(exact)),
            compiled => Ok(compiled),
        }
    }

    /// Single value that may itself be a pattern: `/regex/` or containing `*`.
    pub fn value(source: Option<&str>) -> Result<Self, regex::Error> {
        match source {
            Some(src) if is_regex_literal(src) || src.contains('*') => Self::pattern(source),
            _ => Ok(Self::exact(source)),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Predicate::Any)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Predicate::Pattern(_))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Exact(expected) => expected == value,
            Predicate::Pattern(re) => re.is_match(value),
        }
    }
}

/// One element of a positional parameter predicate list.
#[derive(Debug, Clone)]
pub enum ParamMatcher {
    Exact(String),
    Pattern(Regex),
    /// `*`
    AnyOne,
    /// `..`
    Rest,
}

impl ParamMatcher {
    pub fn parse(token: &str) -> Result<Self, regex::Error> {
        Ok(match token {
            REST_WILDCARD => ParamMatcher::Rest,
            SINGLE_WILDCARD => ParamMatcher::AnyOne,
            t if is_regex_literal(t) => ParamMatcher::Pattern(compile_pattern(t)?),
            t => ParamMatcher::Exact(t.to_string()),
        })
    }

    /// Matches one parameter type. `Rest` is handled positionally by the matcher.
    pub fn matches(&self, parameter_type: &str) -> bool {
        match self {
            ParamMatcher::Exact(expected) => expected == parameter_type,
            ParamMatcher::Pattern(re) => re.is_match(parameter_type),
            ParamMatcher::AnyOne | ParamMatcher::Rest => true,
        }
    }
}

/// Modifier requirement on a matched method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierPredicate {
    Public,
    Static,
    NotStatic,
}

impl ModifierPredicate {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "public" => Some(ModifierPredicate::Public),
            "static" => Some(ModifierPredicate::Static),
            "not_static" | "!static" => Some(ModifierPredicate::NotStatic),
            _ => None,
        }
    }
}

/// Errors compiling a single rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleCompileError {
    #[error("invalid pattern in field `{field}`: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("unknown modifier predicate `{0}`")]
    UnknownModifier(String),
}

/// One compiled instrumentation rule. Immutable; shared as `Arc`.
#[derive(Debug, Clone)]
pub struct RuleDescriptor {
    pub key: RuleKey,
    pub class_name: Predicate,
    pub class_tag: Predicate,
    pub method_name: Predicate,
    pub method_tag: Predicate,
    /// `None`: any arity.
    pub parameter_types: Option<Vec<ParamMatcher>>,
    pub return_type: Predicate,
    pub modifiers: Vec<ModifierPredicate>,
    /// `Any`: the rule is woven wherever it matches.
    pub subtype_restriction: Predicate,
    pub supersedes: Option<Arc<str>>,
    pub behavior: Behavior,
}

impl RuleDescriptor {
    pub fn compile(spec: &RuleSpec) -> Result<Self, RuleCompileError> {
        let invalid = |field: &'static str| {
            move |source: regex::Error| RuleCompileError::InvalidPattern { field, source }
        };

        let parameter_types = match &spec.parameter_types {
            None => None,
            Some(tokens) => Some(
                tokens
                    .iter()
                    .map(|t| ParamMatcher::parse(t))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid("parameter_types"))?,
            ),
        };

        let modifiers = spec
            .modifiers
            .iter()
            .map(|m| {
                ModifierPredicate::parse(m)
                    .ok_or_else(|| RuleCompileError::UnknownModifier(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            key: RuleKey::new(spec.order, spec.id.as_str()),
            class_name: Predicate::from_fields(
                spec.class_name.as_deref(),
                spec.class_name_pattern.as_deref(),
            )
            .map_err(invalid("class_name_pattern"))?,
            class_tag: Predicate::from_fields(
                spec.class_tag.as_deref(),
                spec.class_tag_pattern.as_deref(),
            )
            .map_err(invalid("class_tag_pattern"))?,
            method_name: Predicate::from_fields(
                spec.method_name.as_deref(),
                spec.method_name_pattern.as_deref(),
            )
            .map_err(invalid("method_name_pattern"))?,
            method_tag: Predicate::value(spec.method_tag.as_deref())
                .map_err(invalid("method_tag"))?,
            parameter_types,
            return_type: Predicate::exact(spec.return_type.as_deref()),
            modifiers,
            subtype_restriction: Predicate::value(spec.subtype_restriction.as_deref())
                .map_err(invalid("subtype_restriction"))?,
            supersedes: spec.supersedes.as_deref().map(Arc::from),
            behavior: spec.behavior.clone(),
        })
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.supersedes.as_deref()
    }

    /// Returns `true` if a `..` appears anywhere but the last position.
    pub fn has_misplaced_rest(&self) -> bool {
        match &self.parameter_types {
            Some(matchers) if matchers.len() > 1 => matchers[..matchers.len() - 1]
                .iter()
                .any(|m| matches!(m, ParamMatcher::Rest)),
            _ => false,
        }
    }
}

fn is_regex_literal(src: &str) -> bool {
    src.len() >= 2 && src.starts_with('/') && src.ends_with('/')
}

/// `/regex/` compiles as-is; anything else is a glob where `*` matches any run.
/// Both are anchored at both ends.
fn compile_pattern(src: &str) -> Result<Regex, regex::Error> {
    if is_regex_literal(src) {
        return Regex::new(&format!("^(?:{})$", &src[1..src.len() - 1]));
    }
    let escaped: Vec<String> = src.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
}
