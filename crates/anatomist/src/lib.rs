//! # The Anatomist: Hierarchy Analysis & Weaving Decisions
//!
//! **Role**: Turns each type-load event into an immutable `AnalyzedType` and a
//! `WeavingDecision`, reusing the analyzed forms of every ancestor.
//!
//! **Core Types**:
//! - `HierarchyCache`: concurrent compute-once cache keyed by `(name, context)`.
//! - `TypeAnalyzer`: one analysis pass (gate, capabilities, methods, surfacing).
//! - `LoadingContext`: host-supplied resolver for ancestor descriptors.
//! - `WeavingDecision`: what the external rewriter must do to a type.
//!
//! **Design**:
//! - Analyses are pure functions of the thin descriptor, the rule registry, and the
//!   ancestors' analyzed forms. Load order never changes a result.
//! - Nothing here fails: unresolvable ancestors become empty sentinels and malformed
//!   rule predicates simply never match. Errors are reserved for file I/O.

pub mod analyzer;
pub mod context;
pub mod decision;
pub mod hierarchy;

pub use analyzer::{Ancestry, TypeAnalyzer};
pub use context::{ContextId, DescriptorContext, LoadingContext};
pub use decision::{MethodWeave, WeavingDecision};
pub use hierarchy::{AnalysisOutcome, CacheStats, HierarchyCache, TypeKey};

/// Errors from the Anatomist's file-facing helpers.
#[derive(Debug, thiserror::Error)]
pub enum AnatomistError {
    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed type descriptor document.
    #[error("Descriptor error: {0}")]
    JsonError(#[from] serde_json::Error),
}
