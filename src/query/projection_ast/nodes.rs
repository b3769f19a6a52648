use std::sync::Arc;
use bson::raw::RawDocumentBuf;
use crate::error::Result;
use crate::query::expression::{reparse_clone, Expression};
use crate::query::expression_context::ExpressionContext;
use crate::query::matcher::{parse_predicate, Predicate};

/// The payload of a projection node. The set of kinds is closed: every visitor handles each
/// of them.
#[derive(Debug)]
pub enum NodeKind {
    MatchExpression(MatchExpressionNode),
    Path(PathNode),
    /// `"a.$"`. Wraps the match expression whose first matching array element is projected.
    Positional,
    Slice(SliceNode),
    /// `{ a: { $elemMatch: ... } }`. Wraps the match expression selecting the array elements.
    ElemMatch,
    Expression(ExpressionNode),
    BooleanConstant(BooleanConstantNode),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::MatchExpression(_) => "match expression",
            NodeKind::Path(_) => "path",
            NodeKind::Positional => "positional",
            NodeKind::Slice(_) => "slice",
            NodeKind::ElemMatch => "elemMatch",
            NodeKind::Expression(_) => "expression",
            NodeKind::BooleanConstant(_) => "boolean constant",
        }
    }

    /// Copies the payload. Children are not part of the payload and must be copied by the caller.
    pub(super) fn try_clone(&self) -> Result<NodeKind> {
        Ok(match self {
            NodeKind::MatchExpression(node) => NodeKind::MatchExpression(node.clone_node()),
            NodeKind::Path(node) => NodeKind::Path(node.clone()),
            NodeKind::Positional => NodeKind::Positional,
            NodeKind::Slice(node) => NodeKind::Slice(*node),
            NodeKind::ElemMatch => NodeKind::ElemMatch,
            NodeKind::Expression(node) => NodeKind::Expression(node.try_clone()?),
            NodeKind::BooleanConstant(node) => NodeKind::BooleanConstant(*node),
        })
    }
}

/// A predicate together with the document buffer its operands point into.
///
/// The buffer is immutable and reference counted: it lives as long as the node or any of its
/// clones, so the predicate never outlives the elements it references.
#[derive(Debug)]
pub struct MatchExpressionNode {
    bson: Arc<RawDocumentBuf>,
    match_expr: Predicate,
}

impl MatchExpressionNode {
    fn new(bson: Arc<RawDocumentBuf>, match_expr: Predicate) -> Self {
        debug_assert!(
            match_expr.is_backed_by(&bson),
            "predicate operands must point into the node's buffer"
        );
        Self { bson, match_expr }
    }

    /// Parses `bson` as a filter and keeps the buffer alongside the result.
    pub fn parse(ctx: &ExpressionContext, bson: Arc<RawDocumentBuf>) -> Result<Self> {
        let match_expr = parse_predicate(ctx, &bson)?;
        Ok(Self::new(bson, match_expr))
    }

    pub fn bson(&self) -> &Arc<RawDocumentBuf> {
        &self.bson
    }

    pub fn match_expression(&self) -> &Predicate {
        &self.match_expr
    }

    /// A shallow copy of the predicate paired with this node's own handle on the buffer.
    fn clone_node(&self) -> Self {
        Self::new(self.bson.clone(), self.match_expr.shallow_clone())
    }
}

/// A path node payload: the field names of its children, index-aligned with the children
/// stored in the arena. Names are not required to be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNode {
    field_names: Vec<String>,
}

impl PathNode {
    pub(super) fn with_field_names(field_names: Vec<String>) -> Self {
        Self { field_names }
    }

    pub(super) fn push_field_name(&mut self, field_name: String) {
        self.field_names.push(field_name);
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Index of the first child named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.field_names.iter().position(|field_name| field_name == name)
    }
}

/// `$slice` arguments, stored verbatim. A missing skip is not the same as a skip of zero and
/// the sign of the limit is left to the executor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceNode {
    skip: Option<i32>,
    limit: i32,
}

impl SliceNode {
    pub fn new(skip: Option<i32>, limit: i32) -> Self {
        Self { skip, limit }
    }

    pub fn skip(&self) -> Option<i32> {
        self.skip
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }
}

#[derive(Debug)]
pub struct ExpressionNode {
    expr: Arc<Expression>,
}

impl ExpressionNode {
    pub fn new(expr: Arc<Expression>) -> Self {
        Self { expr }
    }

    pub fn expression(&self) -> &Arc<Expression> {
        &self.expr
    }

    /// Copies the expression by serializing and re-parsing it.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::new(reparse_clone(self.expr.as_ref())?))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BooleanConstantNode {
    value: bool,
}

impl BooleanConstantNode {
    pub fn new(value: bool) -> Self {
        Self { value }
    }

    pub fn value(&self) -> bool {
        self.value
    }
}
