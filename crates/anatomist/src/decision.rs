//! Weaving decision: the record handed to the external rewriter.

use common::model::{AnalyzedType, Capability, RuleKey};
use serde::Serialize;

/// One method the rewriter must patch (or, when `surfaced`, generate as an override).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodWeave {
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
    /// Outermost first.
    pub rules: Vec<RuleKey>,
    pub surfaced: bool,
}

/// Whether a type must be rewritten, and with what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeavingDecision {
    pub type_name: String,
    pub weave: bool,
    pub methods: Vec<MethodWeave>,
    pub shims: Vec<String>,
    pub mixins: Vec<String>,
}

impl WeavingDecision {
    /// Derives the decision from an analyzed type alone, so a cached reload yields the
    /// same decision as the first load.
    ///
    /// Interfaces are never rewritten. Abstract and native methods have no body to patch.
    pub fn from_analyzed(analyzed: &AnalyzedType) -> Self {
        if analyzed.is_interface() || analyzed.unresolved {
            return Self::skip(&analyzed.name);
        }

        let methods: Vec<MethodWeave> = analyzed
            .methods
            .iter()
            .filter(|m| m.has_body() && !m.rules.is_empty())
            .map(|m| MethodWeave {
                name: m.name.clone(),
                parameter_types: m.parameter_types.clone(),
                return_type: m.return_type.clone(),
                rules: m.rules.clone(),
                surfaced: m.surfaced,
            })
            .collect();
        let shims: Vec<String> = analyzed.shims.iter().map(|s| s.id().to_string()).collect();
        let mixins: Vec<String> = analyzed.mixins.iter().map(|m| m.id().to_string()).collect();

        Self {
            type_name: analyzed.name.clone(),
            weave: !methods.is_empty() || !shims.is_empty() || !mixins.is_empty(),
            methods,
            shims,
            mixins,
        }
    }

    fn skip(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            weave: false,
            methods: Vec::new(),
            shims: Vec::new(),
            mixins: Vec::new(),
        }
    }
}
