//! Loading contexts: the host's scope for resolving ancestor descriptors by name.

use crate::AnatomistError;
use common::model::ThinType;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque identity of a loading context. Half of every hierarchy-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Host-supplied capability to fetch a type's thin descriptor by name.
///
/// Only consulted for types not already in the hierarchy cache.
pub trait LoadingContext: Send + Sync {
    fn id(&self) -> ContextId;

    /// Returns `None` when the context cannot supply the type.
    fn resolve(&self, type_name: &str) -> Option<ThinType>;
}

/// In-memory loading context with optional parent delegation.
///
/// Lookups try the parent first, then local descriptors (parent-first delegation).
pub struct DescriptorContext {
    id: ContextId,
    types: HashMap<String, ThinType>,
    parent: Option<Arc<dyn LoadingContext>>,
}

impl DescriptorContext {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            types: HashMap::new(),
            parent: None,
        }
    }

    pub fn with_parent(id: ContextId, parent: Arc<dyn LoadingContext>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(id)
        }
    }

    pub fn from_types(id: ContextId, types: impl IntoIterator<Item = ThinType>) -> Self {
        let mut ctx = Self::new(id);
        for thin in types {
            ctx.insert(thin);
        }
        ctx
    }

    /// Reads a JSON array of thin descriptors.
    pub fn load(id: ContextId, path: &Path) -> Result<Self, AnatomistError> {
        let content = std::fs::read_to_string(path)?;
        let types: Vec<ThinType> = serde_json::from_str(&content)?;
        Ok(Self::from_types(id, types))
    }

    /// Replaces any previous descriptor of the same name.
    pub fn insert(&mut self, thin: ThinType) {
        self.types.insert(thin.name.clone(), thin);
    }

    /// Local descriptor, without delegation.
    pub fn get(&self, type_name: &str) -> Option<&ThinType> {
        self.types.get(type_name)
    }

    /// Local type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl LoadingContext for DescriptorContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn resolve(&self, type_name: &str) -> Option<ThinType> {
        self.parent
            .as_ref()
            .and_then(|p| p.resolve(type_name))
            .or_else(|| self.types.get(type_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_local() {
        let ctx = DescriptorContext::from_types(ContextId(1), [ThinType::class("A")]);
        assert_eq!(ctx.resolve("A").map(|t| t.name), Some("A".to_string()));
        assert!(ctx.resolve("B").is_none());
    }

    #[test]
    fn test_parent_first_delegation() {
        let parent: Arc<dyn LoadingContext> = Arc::new(DescriptorContext::from_types(
            ContextId(0),
            [ThinType::class("Shared").tag("from-parent")],
        ));
        let mut child = DescriptorContext::with_parent(ContextId(1), parent);
        child.insert(ThinType::class("Shared").tag("from-child"));
        child.insert(ThinType::class("Local"));

        assert_eq!(child.resolve("Shared").unwrap().tags, vec!["from-parent"]);
        assert!(child.resolve("Local").is_some());
        assert_eq!(child.type_names(), vec!["Local", "Shared"]);
    }

    #[test]
    fn test_load_json() {
        let tmp_path = std::env::temp_dir().join("test_descriptor_context.json");
        std::fs::write(
            &tmp_path,
            r#"[
                { "name": "I", "modifiers": "PUBLIC | INTERFACE | ABSTRACT", "methods": [{ "name": "run" }] },
                { "name": "A", "interface_names": ["I"] }
            ]"#,
        )
        .unwrap();

        let ctx = DescriptorContext::load(ContextId(7), &tmp_path).unwrap();
        assert_eq!(ctx.len(), 2);
        assert!(ctx.get("I").unwrap().is_interface());
        assert_eq!(ctx.id(), ContextId(7));

        std::fs::remove_file(tmp_path).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let err = DescriptorContext::load(ContextId(1), Path::new("/nonexistent/types.json"));
        assert!(matches!(err, Err(AnatomistError::IoError(_))));
    }
}
