use std::collections::BTreeSet;
use crate::query::projection_ast::visitor::ProjectionAstVisitor;
use crate::query::projection_ast::{
    BooleanConstantNode, ExpressionNode, MatchExpressionNode, NodeRef, PathNode, SliceNode,
};
use crate::query::DepsTracker;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProjectionType {
    Inclusion,
    Exclusion,
}

/// What a projection needs from the documents it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionDependencies {
    required_fields: BTreeSet<String>,
    needs_whole_document: bool,
    requires_match_details: bool,
    has_elem_match: bool,
    has_slice: bool,
    has_expressions: bool,
    projection_type: ProjectionType,
}

impl ProjectionDependencies {
    /// Dotted paths of the fields read by the projection.
    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required_fields
    }

    pub fn needs_whole_document(&self) -> bool {
        self.needs_whole_document
    }

    /// Whether the projection needs to know which array element matched the query (`"a.$"`).
    pub fn requires_match_details(&self) -> bool {
        self.requires_match_details
    }

    pub fn has_elem_match(&self) -> bool {
        self.has_elem_match
    }

    pub fn has_slice(&self) -> bool {
        self.has_slice
    }

    pub fn has_expressions(&self) -> bool {
        self.has_expressions
    }

    pub fn projection_type(&self) -> ProjectionType {
        self.projection_type
    }
}

/// Collects the dependencies of the projection rooted at `node`.
pub fn analyze(node: NodeRef<'_>) -> ProjectionDependencies {
    let mut analyzer = DependencyAnalyzer::default();
    node.accept_visitor(&mut analyzer);
    analyzer.finish()
}

#[derive(Default)]
struct DependencyAnalyzer {
    path: Vec<String>,
    deps: DepsTracker,
    has_inclusion: bool,
    has_exclusion: bool,
    requires_match_details: bool,
    has_elem_match: bool,
    has_slice: bool,
    has_expressions: bool,
}

impl DependencyAnalyzer {
    fn require_current_path(&mut self) {
        if !self.path.is_empty() {
            self.deps.add_field(self.path.join("."));
        }
    }

    fn finish(self) -> ProjectionDependencies {
        // Only `true`, positional, `$elemMatch` and computed fields restrict the output to the
        // listed fields. Without any of them, `false` and `$slice` leave the rest untouched.
        let projection_type = if !self.has_inclusion && (self.has_exclusion || self.has_slice) {
            ProjectionType::Exclusion
        } else {
            ProjectionType::Inclusion
        };
        ProjectionDependencies {
            required_fields: self.deps.fields().clone(),
            needs_whole_document: self.deps.needs_whole_document()
                || projection_type == ProjectionType::Exclusion,
            requires_match_details: self.requires_match_details,
            has_elem_match: self.has_elem_match,
            has_slice: self.has_slice,
            has_expressions: self.has_expressions,
            projection_type,
        }
    }
}

impl ProjectionAstVisitor for DependencyAnalyzer {
    fn visit_match_expression(&mut self, _node: NodeRef<'_>, _match_expression: &MatchExpressionNode) {}

    fn visit_path(&mut self, node: NodeRef<'_>, path: &PathNode) {
        for (field_name, child) in path.field_names().iter().zip(node.children()) {
            self.path.push(field_name.clone());
            child.accept_visitor(self);
            self.path.pop();
        }
    }

    fn visit_positional(&mut self, _node: NodeRef<'_>) {
        self.has_inclusion = true;
        self.requires_match_details = true;
        self.require_current_path();
    }

    fn visit_slice(&mut self, _node: NodeRef<'_>, _slice: &SliceNode) {
        self.has_slice = true;
        self.require_current_path();
    }

    fn visit_elem_match(&mut self, _node: NodeRef<'_>) {
        self.has_inclusion = true;
        self.has_elem_match = true;
        self.require_current_path();
    }

    fn visit_expression(&mut self, _node: NodeRef<'_>, expression: &ExpressionNode) {
        self.has_inclusion = true;
        self.has_expressions = true;
        expression.expression().add_dependencies(&mut self.deps);
    }

    fn visit_boolean_constant(&mut self, _node: NodeRef<'_>, constant: &BooleanConstantNode) {
        if constant.value() {
            self.has_inclusion = true;
            self.require_current_path();
        } else {
            self.has_exclusion = true;
        }
    }
}
