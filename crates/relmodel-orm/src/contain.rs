//! Contain trees: which associations a query loads, and how.
//!
//! A tree maps association aliases to [`ContainNode`]s, each carrying its
//! own loading options and a nested tree. Trees are built from dotted paths
//! (`"Posts.Tags"`) or explicit nodes, and merging is idempotent: loading
//! the same path twice yields the same tree as loading it once.

use crate::query::Query;
use crate::strategy::Strategy;
use relmodel_query::{Expr, JoinType};
use std::fmt;
use std::sync::Arc;

/// A user hook that rewrites the query of one association.
pub type QueryCallback = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Loading options for one association in a contain tree.
#[derive(Clone, Default)]
pub struct ContainNode {
    /// Strategy override; the association's default when `None`
    pub strategy: Option<Strategy>,
    /// Columns to select; empty means the auto-fields rule applies
    pub fields: Vec<String>,
    /// Extra filter for the association rows
    pub conditions: Option<Expr>,
    /// Join type override for joined associations
    pub join_type: Option<JoinType>,
    /// Query rewrite hook, applied last
    pub callback: Option<QueryCallback>,
    /// Select every target column when no fields are given
    pub auto_fields: Option<bool>,
    /// Nested associations of the target
    pub contain: ContainTree,
}

impl ContainNode {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn conditions(mut self, conditions: Expr) -> Self {
        self.conditions = Some(conditions);
        self
    }

    #[must_use]
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = Some(join_type);
        self
    }

    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn auto_fields(mut self, enabled: bool) -> Self {
        self.auto_fields = Some(enabled);
        self
    }

    /// Nest associations of the target.
    #[must_use]
    pub fn contain(mut self, contain: impl Into<ContainTree>) -> Self {
        self.contain.merge(&contain.into());
        self
    }

    /// Merge `other` into this node.
    ///
    /// Fields are unioned in first-seen order. Scalar options set on `other`
    /// replace ours. Nested trees merge recursively.
    pub fn merge(&mut self, other: &ContainNode) {
        for field in &other.fields {
            if !self.fields.contains(field) {
                self.fields.push(field.clone());
            }
        }
        if other.strategy.is_some() {
            self.strategy = other.strategy;
        }
        if other.conditions.is_some() {
            self.conditions.clone_from(&other.conditions);
        }
        if other.join_type.is_some() {
            self.join_type = other.join_type;
        }
        if other.callback.is_some() {
            self.callback.clone_from(&other.callback);
        }
        if other.auto_fields.is_some() {
            self.auto_fields = other.auto_fields;
        }
        self.contain.merge(&other.contain);
    }
}

impl PartialEq for ContainNode {
    fn eq(&self, other: &Self) -> bool {
        let callbacks_match = match (&self.callback, &other.callback) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        callbacks_match
            && self.strategy == other.strategy
            && self.fields == other.fields
            && self.conditions == other.conditions
            && self.join_type == other.join_type
            && self.auto_fields == other.auto_fields
            && self.contain == other.contain
    }
}

impl fmt::Debug for ContainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainNode")
            .field("strategy", &self.strategy)
            .field("fields", &self.fields)
            .field("conditions", &self.conditions)
            .field("join_type", &self.join_type)
            .field("callback", &self.callback.is_some())
            .field("auto_fields", &self.auto_fields)
            .field("contain", &self.contain)
            .finish()
    }
}

/// An insertion-ordered map from association alias to [`ContainNode`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainTree {
    nodes: Vec<(String, ContainNode)>,
}

impl ContainTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one dotted path: `"Posts.Tags"` nests `Tags` under `Posts`.
    /// Empty segments are skipped.
    pub fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let mut tree = ContainTree::new();
        if let Some((last, parents)) = segments.split_last() {
            let mut node_tree = ContainTree::new();
            node_tree.insert(*last, ContainNode::new());
            for parent in parents.iter().rev() {
                let mut wrapper = ContainTree::new();
                wrapper.insert(*parent, ContainNode::new().contain(node_tree));
                node_tree = wrapper;
            }
            tree = node_tree;
        }
        tree
    }

    /// Builder form of [`ContainTree::insert`].
    #[must_use]
    pub fn with(mut self, alias: impl Into<String>, node: ContainNode) -> Self {
        self.insert(alias, node);
        self
    }

    /// Add a node, merging with an existing node of the same alias.
    pub fn insert(&mut self, alias: impl Into<String>, node: ContainNode) {
        let alias = alias.into();
        match self.nodes.iter_mut().find(|(a, _)| *a == alias) {
            Some((_, existing)) => existing.merge(&node),
            None => self.nodes.push((alias, node)),
        }
    }

    /// Merge every node of `other` into this tree.
    pub fn merge(&mut self, other: &ContainTree) {
        for (alias, node) in &other.nodes {
            self.insert(alias.clone(), node.clone());
        }
    }

    pub fn get(&self, alias: &str) -> Option<&ContainNode> {
        self.nodes.iter().find(|(a, _)| a == alias).map(|(_, n)| n)
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut ContainNode> {
        self.nodes
            .iter_mut()
            .find(|(a, _)| a == alias)
            .map(|(_, n)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContainNode)> {
        self.nodes.iter().map(|(a, n)| (a.as_str(), n))
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.nodes.iter().map(|(a, _)| a.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dotted paths of every node, depth first.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (alias, node) in &self.nodes {
            out.push(alias.clone());
            for nested in node.contain.paths() {
                out.push(format!("{alias}.{nested}"));
            }
        }
        out
    }
}

impl From<&str> for ContainTree {
    fn from(path: &str) -> Self {
        ContainTree::parse(path)
    }
}

impl From<String> for ContainTree {
    fn from(path: String) -> Self {
        ContainTree::parse(&path)
    }
}

impl From<&[&str]> for ContainTree {
    fn from(paths: &[&str]) -> Self {
        let mut tree = ContainTree::new();
        for path in paths {
            tree.merge(&ContainTree::parse(path));
        }
        tree
    }
}

impl From<Vec<&str>> for ContainTree {
    fn from(paths: Vec<&str>) -> Self {
        ContainTree::from(paths.as_slice())
    }
}

impl<const N: usize> From<[&str; N]> for ContainTree {
    fn from(paths: [&str; N]) -> Self {
        ContainTree::from(paths.as_slice())
    }
}

impl From<(&str, ContainNode)> for ContainTree {
    fn from((alias, node): (&str, ContainNode)) -> Self {
        ContainTree::new().with(alias, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_path() {
        let tree = ContainTree::parse("Posts.Tags");
        assert_eq!(tree.aliases(), vec!["Posts"]);
        let posts = tree.get("Posts").unwrap();
        assert_eq!(posts.contain.aliases(), vec!["Tags"]);
        assert_eq!(tree.paths(), vec!["Posts".to_string(), "Posts.Tags".to_string()]);
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        assert_eq!(ContainTree::parse("Posts..Tags."), ContainTree::parse("Posts.Tags"));
        assert!(ContainTree::parse("").is_empty());
        assert!(ContainTree::parse(" . ").is_empty());
    }

    #[test]
    fn test_sibling_paths_share_parent() {
        let tree = ContainTree::from(["Posts.Tags", "Posts.Comments", "Profiles"]);
        assert_eq!(tree.aliases(), vec!["Posts", "Profiles"]);
        assert_eq!(
            tree.get("Posts").unwrap().contain.aliases(),
            vec!["Tags", "Comments"]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut tree = ContainTree::from("Posts.Tags");
        let once = tree.clone();
        tree.merge(&ContainTree::from("Posts.Tags"));
        assert_eq!(tree, once);

        let mut with_options = ContainTree::new().with(
            "Posts",
            ContainNode::new()
                .fields(["id", "title"])
                .strategy(Strategy::Subquery)
                .contain("Tags"),
        );
        let snapshot = with_options.clone();
        with_options.merge(&snapshot);
        assert_eq!(with_options, snapshot);
    }

    #[test]
    fn test_merge_unions_fields_and_replaces_options() {
        let mut node = ContainNode::new()
            .fields(["id", "title"])
            .strategy(Strategy::Select)
            .conditions(Expr::col("published").eq(true));
        node.merge(
            &ContainNode::new()
                .fields(["title", "body"])
                .strategy(Strategy::Subquery),
        );
        assert_eq!(node.fields, vec!["id", "title", "body"]);
        assert_eq!(node.strategy, Some(Strategy::Subquery));
        assert!(node.conditions.is_some());
    }

    #[test]
    fn test_callbacks_compare_by_identity() {
        let a = ContainNode::new().callback(|q| q);
        let b = a.clone();
        let c = ContainNode::new().callback(|q| q);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ContainNode::new());
    }
}
