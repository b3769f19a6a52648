pub mod error;
pub mod obs;
pub mod options;
pub mod query;
mod util;

pub use crate::error::{Error, Result};
pub use crate::query::expression::{Expression, ExpressionKind};
pub use crate::query::expression_context::{ExpressionContext, VariablesParseState};
pub use crate::query::matcher::{parse_predicate, Predicate};
pub use crate::query::projection_ast::dependencies::{analyze, ProjectionDependencies, ProjectionType};
pub use crate::query::projection_ast::visitor::ProjectionAstVisitor;
pub use crate::query::projection_ast::{
    BooleanConstantNode, ExpressionNode, MatchExpressionNode, NodeId, NodeKind, NodeRef, PathNode,
    ProjectionAst, SliceNode,
};
