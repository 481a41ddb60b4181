//! Field graph
//!
//! Maps paths to field/virtual-field nodes and derives parent/child
//! relationships from path prefixes. Traversals visit nodes in pre-order
//! (shallow paths first) so state propagation reaches parents before their
//! descendants.

use crate::field::Field;
use crate::virtual_field::VirtualField;
use formant_path::FormPath;
use indexmap::IndexMap;
use std::sync::Arc;

/// A node in the field graph: data-bearing or structural.
#[derive(Clone)]
pub enum FormNode {
    Field(Arc<Field>),
    Virtual(Arc<VirtualField>),
}

impl FormNode {
    pub fn path(&self) -> &FormPath {
        match self {
            FormNode::Field(field) => field.path(),
            FormNode::Virtual(vfield) => vfield.path(),
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self, FormNode::Field(_))
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, FormNode::Virtual(_))
    }

    pub fn as_field(&self) -> Option<&Arc<Field>> {
        match self {
            FormNode::Field(field) => Some(field),
            FormNode::Virtual(_) => None,
        }
    }

    pub fn as_virtual(&self) -> Option<&Arc<VirtualField>> {
        match self {
            FormNode::Virtual(vfield) => Some(vfield),
            FormNode::Field(_) => None,
        }
    }
}

/// Path-keyed node table with prefix-derived adjacency.
pub struct FormGraph {
    nodes: IndexMap<FormPath, FormNode>,
}

impl FormGraph {
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn exist(&self, path: &FormPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn get(&self, path: &FormPath) -> Option<FormNode> {
        self.nodes.get(path).cloned()
    }

    /// Attach a node. Registration order is preserved for traversal ties.
    pub fn append_node(&mut self, path: FormPath, node: FormNode) {
        tracing::debug!(path = %path, field = node.is_field(), "append graph node");
        self.nodes.insert(path, node);
    }

    /// Swap the node at `path` for one of a different kind
    pub fn replace(&mut self, path: FormPath, node: FormNode) {
        self.nodes.insert(path, node);
    }

    pub fn remove(&mut self, path: &FormPath) -> Option<FormNode> {
        tracing::debug!(path = %path, "remove graph node");
        self.nodes.shift_remove(path)
    }

    /// Collect descendants of `parent` in pre-order. `deep` selects all
    /// transitive descendants; otherwise only direct children.
    pub fn children(&self, parent: &FormPath, deep: bool) -> Vec<FormNode> {
        let mut matched: Vec<&FormNode> = self
            .nodes
            .iter()
            .filter(|(path, _)| {
                path.len() > parent.len()
                    && path.starts_with(parent)
                    && (deep || path.len() == parent.len() + 1)
            })
            .map(|(_, node)| node)
            .collect();
        matched.sort_by_key(|node| node.path().len());
        matched.into_iter().cloned().collect()
    }

    /// Resolve a pattern to a single node: exact lookup for concrete paths,
    /// first match (registration order) for wildcard patterns.
    pub fn select_one(&self, pattern: &FormPath) -> Option<FormNode> {
        if !pattern.is_wildcard_pattern() {
            return self.get(pattern);
        }
        self.nodes
            .iter()
            .find(|(path, _)| pattern.matches(path))
            .map(|(_, node)| node.clone())
    }

    /// Resolve a pattern to all matching nodes
    pub fn select(&self, pattern: &FormPath) -> Vec<FormNode> {
        if !pattern.is_wildcard_pattern() {
            return self.get(pattern).into_iter().collect();
        }
        self.nodes
            .iter()
            .filter(|(path, _)| pattern.matches(path))
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// Nodes matching `pattern` plus their descendants, pre-order. The root
    /// pattern selects every node. Used by reset and error clearing, where a
    /// selector addresses whole subtrees.
    pub fn select_with_descendants(&self, pattern: &FormPath) -> Vec<FormNode> {
        if pattern.is_empty() {
            let mut all: Vec<FormNode> = self.nodes.values().cloned().collect();
            all.sort_by_key(|node| node.path().len());
            return all;
        }
        let matched: Vec<FormPath> = self
            .nodes
            .keys()
            .filter(|path| pattern.matches(path))
            .cloned()
            .collect();
        let mut selected: Vec<FormNode> = self
            .nodes
            .iter()
            .filter(|(path, _)| {
                matched
                    .iter()
                    .any(|root| path.starts_with(root))
            })
            .map(|(_, node)| node.clone())
            .collect();
        selected.sort_by_key(|node| node.path().len());
        selected
    }

    /// Visit every node in registration order
    pub fn each(&self, mut visitor: impl FnMut(&FormPath, &FormNode)) {
        for (path, node) in &self.nodes {
            visitor(path, node);
        }
    }
}

impl Default for FormGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ValueAccess;

    fn null_access() -> ValueAccess {
        ValueAccess {
            get_value: Arc::new(|_| None),
            set_value: Arc::new(|_, _| {}),
            remove_value: Arc::new(|_| {}),
            get_initial_value: Arc::new(|_| None),
            set_initial_value: Arc::new(|_, _| {}),
        }
    }

    fn field_node(path: &str) -> FormNode {
        let path = FormPath::parse(path);
        FormNode::Field(Field::new(path.clone(), path, null_access(), true))
    }

    fn graph_with(paths: &[&str]) -> FormGraph {
        let mut graph = FormGraph::new();
        for path in paths {
            graph.append_node(FormPath::parse(path), field_node(path));
        }
        graph
    }

    #[test]
    fn test_children_direct_and_deep() {
        let graph = graph_with(&["a", "a.b", "a.b.c", "a.d", "x"]);
        let parent = FormPath::parse("a");

        let direct = graph.children(&parent, false);
        let direct_paths: Vec<String> = direct.iter().map(|n| n.path().to_string()).collect();
        assert_eq!(direct_paths, vec!["a.b", "a.d"]);

        let deep = graph.children(&parent, true);
        assert_eq!(deep.len(), 3);
        // Pre-order: parents before descendants
        assert_eq!(deep[0].path().to_string(), "a.b");
        assert_eq!(deep.last().unwrap().path().to_string(), "a.b.c");
    }

    #[test]
    fn test_select_wildcard() {
        let graph = graph_with(&["list.0.name", "list.1.name", "list.0.age"]);
        let matches = graph.select(&FormPath::parse("list.*.name"));
        assert_eq!(matches.len(), 2);

        let one = graph.select_one(&FormPath::parse("list.*.age")).unwrap();
        assert_eq!(one.path().to_string(), "list.0.age");
        assert!(graph.select_one(&FormPath::parse("list.*.missing")).is_none());
    }

    #[test]
    fn test_select_with_descendants() {
        let graph = graph_with(&["a", "a.b", "c"]);
        let selected = graph.select_with_descendants(&FormPath::parse("a"));
        assert_eq!(selected.len(), 2);

        let all = graph.select_with_descendants(&FormPath::root());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_replace_changes_node_kind() {
        let mut graph = graph_with(&["a"]);
        let path = FormPath::parse("a");
        assert!(graph.get(&path).unwrap().is_field());
        graph.replace(path.clone(), FormNode::Virtual(VirtualField::new(path.clone(), true)));
        assert!(graph.get(&path).unwrap().is_virtual());
    }

    #[test]
    fn test_remove() {
        let mut graph = graph_with(&["a", "b"]);
        assert!(graph.remove(&FormPath::parse("a")).is_some());
        assert!(!graph.exist(&FormPath::parse("a")));
        assert_eq!(graph.size(), 1);
    }
}
