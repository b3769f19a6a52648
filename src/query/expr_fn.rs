use std::sync::Arc;
use bson::raw::RawDocumentBuf;
use bson::{bson, doc, Bson, Document};
use crate::obs::logger::test_instance;
use crate::options::options::Options;
use crate::query::expression::Expression;
use crate::query::expression_context::ExpressionContext;
use crate::query::matcher::{parse_predicate, Predicate};
use crate::query::projection_ast::{ExpressionNode, MatchExpressionNode, NodeId, ProjectionAst};

pub fn ctx() -> Arc<ExpressionContext> {
    Arc::new(ExpressionContext::new(Arc::new(Options::default()), test_instance()))
}

pub fn ctx_with_variables<'a, I>(names: I) -> Arc<ExpressionContext>
where
    I: IntoIterator<Item = &'a str>,
{
    let ctx = ExpressionContext::new(Arc::new(Options::default()), test_instance());
    Arc::new(ctx.with_variables(names).unwrap())
}

pub fn raw(doc: Document) -> Arc<RawDocumentBuf> {
    Arc::new(RawDocumentBuf::from_document(&doc).unwrap())
}

pub fn predicate(filter: Document) -> Predicate {
    parse_predicate(&ctx(), &raw(filter)).unwrap()
}

pub fn expression(operand: Bson) -> Arc<Expression> {
    let ctx = ctx();
    Expression::parse_operand(&ctx, &operand, ctx.variables_parse_state()).unwrap()
}

pub fn match_expression_node(filter: Document) -> MatchExpressionNode {
    MatchExpressionNode::parse(&ctx(), raw(filter)).unwrap()
}

pub fn expression_node(operand: Bson) -> ExpressionNode {
    ExpressionNode::new(expression(operand))
}

/// An expression parsed in a scope its context does not know about, so that it cannot be
/// re-parsed from its serialized form.
pub fn unparseable_expression_node() -> ExpressionNode {
    let ctx = ctx();
    let mut scope = ctx.variables_parse_state().clone();
    scope.define_variable("local").unwrap();
    let expr = Expression::parse_operand(&ctx, &bson!({ "$toUpper": "$$local" }), &scope).unwrap();
    ExpressionNode::new(expr)
}

/// Builds the tree of
/// `{ name: 1, "items.$": 1, tags: { $slice: 3 }, total: { $add: ["$price", "$tax"] },
///    nested: { a: 1, b: { $elemMatch: { c: 1 } } } }`
/// with `{ items: { $gt: 1 } }` as the query driving the positional projection.
pub fn sample_tree() -> (ProjectionAst, NodeId) {
    let mut ast = ProjectionAst::new();

    let name = ast.new_boolean_constant(true);
    let query = ast.new_match_expression(match_expression_node(doc! { "items": { "$gt": 1 } }));
    let items = ast.new_positional(query);
    let tags = ast.new_slice(None, 3);
    let total = ast.new_expression(expression_node(bson!({ "$add": ["$price", "$tax"] })));

    let a = ast.new_boolean_constant(true);
    let filter = ast.new_match_expression(match_expression_node(doc! { "c": 1 }));
    let b = ast.new_elem_match(filter);
    let nested = ast.new_path_with_children(vec![a, b], vec!["a".to_string(), "b".to_string()]);

    let root = ast.new_path();
    ast.add_child(root, "name", name);
    ast.add_child(root, "items", items);
    ast.add_child(root, "tags", tags);
    ast.add_child(root, "total", total);
    ast.add_child(root, "nested", nested);

    (ast, root)
}
