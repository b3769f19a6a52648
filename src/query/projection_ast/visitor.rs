//! Double dispatch over projection nodes.
//!
//! [`ProjectionAstVisitor`] has one method per node kind and no default bodies: adding a kind
//! breaks every visitor until it handles the new kind, while adding a pass only takes a new
//! visitor. Visitors drive their own recursion through [`NodeRef::children`] and
//! [`NodeRef::accept_visitor`].

use super::{BooleanConstantNode, ExpressionNode, MatchExpressionNode, NodeKind, NodeRef, PathNode, SliceNode};

pub trait ProjectionAstVisitor {
    fn visit_match_expression(&mut self, node: NodeRef<'_>, match_expression: &MatchExpressionNode);

    fn visit_path(&mut self, node: NodeRef<'_>, path: &PathNode);

    /// The wrapped match expression is the node's only child.
    fn visit_positional(&mut self, node: NodeRef<'_>);

    fn visit_slice(&mut self, node: NodeRef<'_>, slice: &SliceNode);

    /// The wrapped match expression is the node's only child.
    fn visit_elem_match(&mut self, node: NodeRef<'_>);

    fn visit_expression(&mut self, node: NodeRef<'_>, expression: &ExpressionNode);

    fn visit_boolean_constant(&mut self, node: NodeRef<'_>, constant: &BooleanConstantNode);
}

impl<'a> NodeRef<'a> {
    /// Calls the visitor method matching this node's kind, and only that one.
    pub fn accept_visitor<V: ProjectionAstVisitor + ?Sized>(&self, visitor: &mut V) {
        let node = *self;
        match self.kind() {
            NodeKind::MatchExpression(payload) => visitor.visit_match_expression(node, payload),
            NodeKind::Path(payload) => visitor.visit_path(node, payload),
            NodeKind::Positional => visitor.visit_positional(node),
            NodeKind::Slice(payload) => visitor.visit_slice(node, payload),
            NodeKind::ElemMatch => visitor.visit_elem_match(node),
            NodeKind::Expression(payload) => visitor.visit_expression(node, payload),
            NodeKind::BooleanConstant(payload) => visitor.visit_boolean_constant(node, payload),
        }
    }

    /// The match expression wrapped by a positional or `$elemMatch` node.
    pub fn match_expression_child(&self) -> Option<&'a MatchExpressionNode> {
        match self.kind() {
            NodeKind::Positional | NodeKind::ElemMatch => {
                self.children().next().and_then(|child| match child.kind() {
                    NodeKind::MatchExpression(payload) => Some(payload),
                    _ => None,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr_fn::sample_tree;
    use crate::query::projection_ast::NodeId;

    /// Records one line per visited node, in pre-order.
    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
        depth: usize,
    }

    impl Recorder {
        fn record(&mut self, line: String) {
            self.lines.push(format!("{}{}", "  ".repeat(self.depth), line));
        }

        fn descend(&mut self, node: NodeRef<'_>) {
            self.depth += 1;
            for child in node.children() {
                child.accept_visitor(self);
            }
            self.depth -= 1;
        }
    }

    impl ProjectionAstVisitor for Recorder {
        fn visit_match_expression(&mut self, _node: NodeRef<'_>, match_expression: &MatchExpressionNode) {
            self.record(format!("match {}", match_expression.match_expression().root()));
        }

        fn visit_path(&mut self, node: NodeRef<'_>, path: &PathNode) {
            self.record(format!("path {:?}", path.field_names()));
            self.descend(node);
        }

        fn visit_positional(&mut self, node: NodeRef<'_>) {
            self.record("positional".to_string());
            self.descend(node);
        }

        fn visit_slice(&mut self, _node: NodeRef<'_>, slice: &SliceNode) {
            self.record(format!("slice {:?} {}", slice.skip(), slice.limit()));
        }

        fn visit_elem_match(&mut self, node: NodeRef<'_>) {
            self.record("elemMatch".to_string());
            self.descend(node);
        }

        fn visit_expression(&mut self, _node: NodeRef<'_>, expression: &ExpressionNode) {
            self.record(format!("expression {}", expression.expression().serialize()));
        }

        fn visit_boolean_constant(&mut self, _node: NodeRef<'_>, constant: &BooleanConstantNode) {
            self.record(format!("constant {}", constant.value()));
        }
    }

    #[test]
    fn test_dispatch_reaches_every_kind_once() {
        let (ast, root) = sample_tree();
        let mut recorder = Recorder::default();
        ast.node(root).accept_visitor(&mut recorder);

        assert_eq!(recorder.lines.len(), ast.len());
        assert_eq!(recorder.lines[0], r#"path ["name", "items", "tags", "total", "nested"]"#);
        assert_eq!(recorder.lines[1], "  constant true");
        assert_eq!(recorder.lines[2], "  positional");
        assert!(recorder.lines[3].starts_with("    match items: "));
        assert_eq!(recorder.lines[4], "  slice None 3");
        assert!(recorder.lines[5].starts_with("  expression "));
        assert_eq!(recorder.lines[6], r#"  path ["a", "b"]"#);
        assert_eq!(recorder.lines[8], "    elemMatch");
    }

    #[test]
    fn test_dispatch_through_trait_object() {
        let (ast, root) = sample_tree();
        let mut recorder = Recorder::default();
        let visitor: &mut dyn ProjectionAstVisitor = &mut recorder;
        ast.node(root).get_child("tags").unwrap().accept_visitor(visitor);
        assert_eq!(recorder.lines, vec!["slice None 3".to_string()]);
    }

    #[test]
    fn test_match_expression_child() {
        let (ast, root) = sample_tree();
        let items = ast.node(root).get_child("items").unwrap();
        assert!(items.match_expression_child().is_some());
        assert!(ast.node(root).match_expression_child().is_none());
        assert!(ast.node(NodeId(0)).match_expression_child().is_none());
    }
}
