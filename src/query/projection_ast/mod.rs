//! Typed, walkable representation of a find/aggregate projection.
//!
//! The tree is built bottom-up by the projection parser: leaves first, then the composites
//! wrapping them. All nodes live in a [`ProjectionAst`] arena and are addressed by [`NodeId`].
//! A node's parent is a plain id set by the arena when the node is attached, never by callers,
//! so a node has at most one parent and the tree cannot contain cycles.
//!
//! Misusing the construction API (attaching a node twice, wrapping something else than a match
//! expression in a positional or `$elemMatch` node, mismatched path children and names) is a
//! bug in the caller and panics.

use std::fmt;
use crate::error::Result;

pub mod dependencies;
mod nodes;
pub mod visitor;

pub use nodes::{BooleanConstantNode, ExpressionNode, MatchExpressionNode, NodeKind, PathNode, SliceNode};

/// Index of a node within its [`ProjectionAst`].
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct AstNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena owning the nodes of one or more projection trees.
#[derive(Debug, Default)]
pub struct ProjectionAst {
    nodes: Vec<AstNode>,
}

impl ProjectionAst {

    pub fn new() -> Self {
        Self::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Number of nodes in the arena, attached or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn new_boolean_constant(&mut self, value: bool) -> NodeId {
        self.push(NodeKind::BooleanConstant(BooleanConstantNode::new(value)))
    }

    pub fn new_slice(&mut self, skip: Option<i32>, limit: i32) -> NodeId {
        self.push(NodeKind::Slice(SliceNode::new(skip, limit)))
    }

    pub fn new_match_expression(&mut self, node: MatchExpressionNode) -> NodeId {
        self.push(NodeKind::MatchExpression(node))
    }

    pub fn new_expression(&mut self, node: ExpressionNode) -> NodeId {
        self.push(NodeKind::Expression(node))
    }

    /// Creates a positional node owning `child`, which must be a detached match expression.
    pub fn new_positional(&mut self, child: NodeId) -> NodeId {
        self.check_match_expression_child(child, "positional");
        let id = self.push(NodeKind::Positional);
        self.insert_child(id, child);
        id
    }

    /// Creates an `$elemMatch` node owning `child`, which must be a detached match expression.
    pub fn new_elem_match(&mut self, child: NodeId) -> NodeId {
        self.check_match_expression_child(child, "elemMatch");
        let id = self.push(NodeKind::ElemMatch);
        self.insert_child(id, child);
        id
    }

    /// Creates an empty path node. Children are added with [`ProjectionAst::add_child`].
    pub fn new_path(&mut self) -> NodeId {
        self.push(NodeKind::Path(PathNode::default()))
    }

    /// Creates a path node from pre-built children and their field names.
    pub fn new_path_with_children(&mut self, children: Vec<NodeId>, field_names: Vec<String>) -> NodeId {
        assert_eq!(
            children.len(),
            field_names.len(),
            "a path node needs exactly one field name per child"
        );
        for (i, &child) in children.iter().enumerate() {
            self.check_detached(child);
            assert!(!children[..i].contains(&child), "node {} is listed twice", child);
        }

        let id = self.push(NodeKind::Path(PathNode::with_field_names(field_names)));
        for child in children {
            self.insert_child(id, child);
        }
        id
    }

    /// Appends `child` under `field_name` as the last child of the path node `path`.
    pub fn add_child(&mut self, path: NodeId, field_name: impl Into<String>, child: NodeId) {
        let kind = &self.node_at(path).kind;
        if !matches!(kind, NodeKind::Path(_)) {
            panic!("cannot add a named child to {} node {}", kind.name(), path);
        }
        self.insert_child(path, child);
        if let NodeKind::Path(node) = &mut self.nodes[path.index()].kind {
            node.push_field_name(field_name.into());
        }
    }

    /// The only place where nodes are attached: sets the back-reference and appends the child.
    fn insert_child(&mut self, parent: NodeId, child: NodeId) {
        self.check_detached(child);
        assert_ne!(parent, child, "node {} cannot be its own child", child);
        assert!(
            !self.is_ancestor(child, parent),
            "attaching {} under {} would create a cycle",
            child,
            parent
        );
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    fn is_ancestor(&self, candidate: NodeId, node: NodeId) -> bool {
        let mut current = self.node_at(node).parent;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.nodes[id.index()].parent;
        }
        false
    }

    fn check_detached(&self, child: NodeId) {
        if let Some(parent) = self.node_at(child).parent {
            panic!("node {} is already owned by {}", child, parent);
        }
    }

    fn check_match_expression_child(&self, child: NodeId, owner: &str) {
        let node = self.nodes.get(child.index()).unwrap_or_else(|| {
            panic!("a {} node requires a match expression child, got unknown node {}", owner, child)
        });
        if !matches!(node.kind, NodeKind::MatchExpression(_)) {
            panic!(
                "a {} node requires a match expression child, got {} node {}",
                owner,
                node.kind.name(),
                child
            );
        }
        self.check_detached(child);
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        assert!(self.nodes.len() < u32::MAX as usize, "projection arena is full");
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node_at(&self, id: NodeId) -> &AstNode {
        self.nodes
            .get(id.index())
            .unwrap_or_else(|| panic!("unknown node {} (arena holds {} nodes)", id, self.nodes.len()))
    }

    /// Read access to the node `id`. Panics if the id does not belong to this arena.
    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        self.node_at(id);
        NodeRef { ast: self, id }
    }

    pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
        if id.index() < self.nodes.len() {
            Some(NodeRef { ast: self, id })
        } else {
            None
        }
    }

    /// Nodes without a parent, in creation order.
    pub fn roots(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(move |(index, _)| NodeRef { ast: self, id: NodeId(index as u32) })
    }

    /// The root of the arena if it holds a single tree.
    pub fn root(&self) -> Option<NodeRef<'_>> {
        let mut roots = self.roots();
        match (roots.next(), roots.next()) {
            (Some(root), None) => Some(root),
            _ => None,
        }
    }

    /// Copies the subtree rooted at `id` into a new arena, where it is the only tree.
    ///
    /// Every node is copied through its own kind: predicates are shallow-copied alongside their
    /// buffer and expressions are re-parsed from their serialized form. Fails only if such a
    /// re-parse fails.
    pub fn clone_subtree(&self, id: NodeId) -> Result<ProjectionAst> {
        let mut copy = ProjectionAst::with_capacity(self.subtree_size(id));
        self.copy_into(id, &mut copy)?;
        tracing::debug!(source = %id, nodes = copy.len(), "cloned projection subtree");
        Ok(copy)
    }

    /// Copies the whole arena. Node ids are preserved.
    pub fn try_clone(&self) -> Result<ProjectionAst> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                Ok(AstNode {
                    kind: node.kind.try_clone()?,
                    parent: node.parent,
                    children: node.children.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(nodes = nodes.len(), "cloned projection arena");
        Ok(ProjectionAst { nodes })
    }

    fn copy_into(&self, id: NodeId, target: &mut ProjectionAst) -> Result<NodeId> {
        let source = self.node_at(id);
        let copy = target.push(source.kind.try_clone()?);
        for &child in &source.children {
            let child_copy = self.copy_into(child, target)?;
            target.insert_child(copy, child_copy);
        }
        Ok(copy)
    }

    fn subtree_size(&self, id: NodeId) -> usize {
        1 + self
            .node_at(id)
            .children
            .iter()
            .map(|&child| self.subtree_size(child))
            .sum::<usize>()
    }
}

/// A read-only view of one node of a [`ProjectionAst`].
#[derive(Copy, Clone)]
pub struct NodeRef<'a> {
    ast: &'a ProjectionAst,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn inner(&self) -> &'a AstNode {
        &self.ast.nodes[self.id.index()]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn ast(&self) -> &'a ProjectionAst {
        self.ast
    }

    pub fn kind(&self) -> &'a NodeKind {
        &self.inner().kind
    }

    pub fn child_ids(&self) -> &'a [NodeId] {
        &self.inner().children
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let ast = self.ast;
        self.child_ids().iter().map(move |&id| NodeRef { ast, id })
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.inner().parent.map(|id| NodeRef { ast: self.ast, id })
    }

    pub fn is_root(&self) -> bool {
        self.inner().parent.is_none()
    }

    /// The first child registered under `name`. Only path nodes have named children.
    pub fn get_child(&self, name: &str) -> Option<NodeRef<'a>> {
        match self.kind() {
            NodeKind::Path(path) => path
                .position(name)
                .map(|index| NodeRef { ast: self.ast, id: self.child_ids()[index] }),
            _ => None,
        }
    }

    /// Field names of a path node, empty for other kinds.
    pub fn field_names(&self) -> &'a [String] {
        match self.kind() {
            NodeKind::Path(path) => path.field_names(),
            _ => &[],
        }
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id)
            .field("kind", &self.kind().name())
            .field("parent", &self.inner().parent)
            .field("children", &self.child_ids())
            .finish()
    }
}
