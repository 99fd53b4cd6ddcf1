//! Static method-category taxonomy shared by all extraction calls.
//!
//! The taxonomy is a read-only tree loaded once per run from TOML and
//! shared behind an `Arc`. Extraction responses must name one of its
//! nodes (by canonical name or alias, case-insensitively) or they fail
//! validation.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("failed to read taxonomy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse taxonomy TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("duplicate taxonomy node name: {0}")]
    DuplicateName(String),
    #[error("node {node} references unknown parent {parent}")]
    UnknownParent { node: String, parent: String },
}

/// One category node. `parent` is `None` for top-level stages.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyNode {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TaxonomyFile {
    #[serde(default, rename = "node")]
    nodes: Vec<TaxonomyNode>,
}

/// The loaded category tree with a case-insensitive lookup index.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    /// Lowercased name/alias -> index into `nodes`.
    index: HashMap<String, usize>,
}

impl Taxonomy {
    pub fn new(nodes: Vec<TaxonomyNode>) -> Result<Self, TaxonomyError> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let key = node.name.trim().to_lowercase();
            if index.insert(key, i).is_some() {
                return Err(TaxonomyError::DuplicateName(node.name.clone()));
            }
        }
        // Aliases must not shadow canonical names; first writer wins on
        // alias collisions between nodes.
        for (i, node) in nodes.iter().enumerate() {
            for alias in &node.aliases {
                index.entry(alias.trim().to_lowercase()).or_insert(i);
            }
        }
        for node in &nodes {
            if let Some(ref parent) = node.parent
                && !index.contains_key(&parent.trim().to_lowercase())
            {
                return Err(TaxonomyError::UnknownParent {
                    node: node.name.clone(),
                    parent: parent.clone(),
                });
            }
        }
        Ok(Self { nodes, index })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TaxonomyError> {
        let file: TaxonomyFile = toml::from_str(content)?;
        Self::new(file.nodes)
    }

    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve a free-form category reference to its canonical node name.
    ///
    /// Matches canonical names and aliases, ignoring case and surrounding
    /// whitespace. Returns `None` for unknown categories.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        self.index
            .get(&reference.trim().to_lowercase())
            .map(|&i| self.nodes[i].name.as_str())
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.resolve(reference).is_some()
    }

    /// Names of top-level stages, in declaration order. These are the
    /// classification options presented to the model.
    pub fn stage_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.parent.is_none())
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Direct children of the named node.
    pub fn children(&self, name: &str) -> Vec<&TaxonomyNode> {
        let Some(canonical) = self.resolve(name) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| {
                n.parent
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(canonical))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[node]]
name = "Data Augmentation"
aliases = ["augmentation"]

[[node]]
name = "Invariant Learning"

[[node]]
name = "Mixup"
parent = "Data Augmentation"
"#;

    #[test]
    fn resolves_canonical_name_case_insensitive() {
        let tax = Taxonomy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(tax.resolve("data augmentation"), Some("Data Augmentation"));
        assert_eq!(tax.resolve("  INVARIANT LEARNING "), Some("Invariant Learning"));
    }

    #[test]
    fn resolves_alias() {
        let tax = Taxonomy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(tax.resolve("Augmentation"), Some("Data Augmentation"));
    }

    #[test]
    fn unknown_category_is_none() {
        let tax = Taxonomy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(tax.resolve("Distillation"), None);
        assert!(!tax.contains("Distillation"));
    }

    #[test]
    fn stage_names_are_top_level_only() {
        let tax = Taxonomy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            tax.stage_names(),
            vec!["Data Augmentation", "Invariant Learning"]
        );
    }

    #[test]
    fn children_of_stage() {
        let tax = Taxonomy::from_toml_str(SAMPLE).unwrap();
        let kids = tax.children("data augmentation");
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].name, "Mixup");
    }

    #[test]
    fn duplicate_name_rejected() {
        let toml = r#"
[[node]]
name = "A"
[[node]]
name = "a"
"#;
        assert!(matches!(
            Taxonomy::from_toml_str(toml),
            Err(TaxonomyError::DuplicateName(_))
        ));
    }

    #[test]
    fn unknown_parent_rejected() {
        let toml = r#"
[[node]]
name = "Child"
parent = "Ghost"
"#;
        assert!(matches!(
            Taxonomy::from_toml_str(toml),
            Err(TaxonomyError::UnknownParent { .. })
        ));
    }
}
