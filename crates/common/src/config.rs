//! # Rule Configuration
//!
//! Authoring format for instrumentation rules and capabilities. Rule files are JSON;
//! `rule-bake` merges a directory of them into a single sorted `rkyv` archive that
//! loads through a validated memory map.
//!
//! SSOT: the archive is the shipped form. JSON is for authoring and tests.

use crate::model::{MixinCapability, ShimCapability};
use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Errors from loading or saving rule documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    ArchiveError(String),
    #[error("Unsupported rule file extension: {0}")]
    UnsupportedFormat(String),
}

/// Behavior attached to every method a rule binds to.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    /// Time the invocation under a named timer.
    Timer { name: String },
    /// Record a trace entry with a message template.
    TraceEntry { message: String },
    /// Capture invocation context into a named slot.
    CaptureContext { key: String },
}

/// One authored rule. Empty/absent predicate fields match everything.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct RuleSpec {
    pub id: String,
    /// Nesting order; lower binds outermost. Ties break on `id`.
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub class_name: Option<String>,
    /// `/regex/` or glob with `*`.
    #[serde(default)]
    pub class_name_pattern: Option<String>,
    #[serde(default)]
    pub class_tag: Option<String>,
    #[serde(default)]
    pub class_tag_pattern: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
    #[serde(default)]
    pub method_name_pattern: Option<String>,
    #[serde(default)]
    pub method_tag: Option<String>,
    /// Absent: any arity. Tokens: `*` (one parameter), `..` (rest), `/regex/`.
    #[serde(default)]
    pub parameter_types: Option<Vec<String>>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Any of `public`, `static`, `not_static`.
    #[serde(default)]
    pub modifiers: Vec<String>,
    /// Type name or pattern that must appear in the hierarchy for the rule to be woven.
    #[serde(default)]
    pub subtype_restriction: Option<String>,
    /// Id of a rule this one displaces when both match a method.
    #[serde(default)]
    pub supersedes: Option<String>,
    pub behavior: Behavior,
}

impl RuleSpec {
    /// Rule with only an id and a timer behavior; all predicates empty.
    pub fn timer(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            behavior: Behavior::Timer { name: id.clone() },
            id,
            order: 0,
            class_name: None,
            class_name_pattern: None,
            class_tag: None,
            class_tag_pattern: None,
            method_name: None,
            method_name_pattern: None,
            method_tag: None,
            parameter_types: None,
            return_type: None,
            modifiers: Vec::new(),
            subtype_restriction: None,
            supersedes: None,
        }
    }
}

/// A complete rule document: rules plus capabilities.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub shims: Vec<ShimCapability>,
    #[serde(default)]
    pub mixins: Vec<MixinCapability>,
}

impl RuleSet {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn merge(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
        self.shims.extend(other.shims);
        self.mixins.extend(other.mixins);
    }

    /// Sorts rules by `(order, id)` and capabilities by id.
    pub fn sort(&mut self) {
        self.rules
            .sort_by(|a, b| (a.order, &a.id).cmp(&(b.order, &b.id)));
        self.shims.sort();
        self.mixins.sort();
    }

    /// Sorts, then serializes with `rkyv`.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, ConfigError> {
        self.sort();
        let aligned = rkyv::to_bytes::<rkyv::rancor::Error>(&*self)
            .map_err(|e| ConfigError::ArchiveError(e.to_string()))?;
        Ok(aligned.to_vec())
    }

    /// Writes the sorted archive to `path`, creating parent directories.
    pub fn save(&mut self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Loads a rule document by extension: `.json` or `.rkyv`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => {
                let content = std::fs::read_to_string(path)?;
                Self::from_json_str(&content)
            }
            Some("rkyv") => Self::load_archive(path),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn load_archive(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        // Validates the archive before deserializing out of the mapping.
        rkyv::from_bytes::<RuleSet, rkyv::rancor::Error>(&mmap[..])
            .map_err(|e| ConfigError::ArchiveError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "rules": [
            {
                "id": "jdbc-execute",
                "order": 10,
                "class_name": "java.sql.Statement",
                "method_name_pattern": "execute*",
                "parameter_types": ["java.lang.String", ".."],
                "behavior": { "kind": "timer", "name": "jdbc execute" }
            },
            {
                "id": "servlet",
                "class_tag": "WebServlet",
                "modifiers": ["public", "not_static"],
                "behavior": { "kind": "trace_entry", "message": "servlet {{0}}" }
            }
        ],
        "shims": [
            { "id": "request-shim", "targets": ["org.apache.Request"], "interface": "RequestShim" }
        ]
    }"#;

    #[test]
    fn test_parse_json() {
        let set = RuleSet::from_json_str(SAMPLE).unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].order, 10);
        assert_eq!(set.rules[1].order, 0);
        assert!(set.rules[1].parameter_types.is_none());
        assert_eq!(
            set.rules[1].behavior,
            Behavior::TraceEntry {
                message: "servlet {{0}}".into()
            }
        );
        assert_eq!(set.shims[0].interface, "RequestShim");
        assert!(set.mixins.is_empty());
    }

    #[test]
    fn test_sort_by_order_then_id() {
        let mut set = RuleSet::default();
        let mut late = RuleSpec::timer("a-late");
        late.order = 5;
        set.rules.push(late);
        set.rules.push(RuleSpec::timer("b"));
        set.rules.push(RuleSpec::timer("a"));
        set.sort();
        let ids: Vec<&str> = set.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "a-late"]);
    }

    #[test]
    fn test_archive_save_and_load() {
        let mut set = RuleSet::from_json_str(SAMPLE).unwrap();
        let tmp_path = std::env::temp_dir().join("test_rule_set_archive.rkyv");
        set.save(&tmp_path).unwrap();

        let loaded = RuleSet::load(&tmp_path).unwrap();
        assert_eq!(loaded, set);

        std::fs::remove_file(tmp_path).ok();
    }

    #[test]
    fn test_unsupported_extension() {
        let err = RuleSet::load(Path::new("rules.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "yaml"));
    }
}
