use bson::raw::RawDocumentBuf;
use bson::{bson, doc, Bson, Document};
use quokkadb_projection::obs::logger::{LogLevel, StdoutLogger};
use quokkadb_projection::options::options::{Options, ParseOptions};
use quokkadb_projection::{
    analyze, Expression, ExpressionContext, ExpressionNode, MatchExpressionNode, NodeId, NodeKind,
    NodeRef, ProjectionAst, ProjectionType,
};
use std::sync::Arc;

fn context() -> Arc<ExpressionContext> {
    let options = Options::default().with_parse_options(ParseOptions::default().with_max_expression_depth(20));
    Arc::new(ExpressionContext::new(Arc::new(options), StdoutLogger::new(LogLevel::Debug, true)))
}

fn match_expression(ctx: &ExpressionContext, filter: Document) -> MatchExpressionNode {
    let buffer = Arc::new(RawDocumentBuf::from_document(&filter).unwrap());
    MatchExpressionNode::parse(ctx, buffer).unwrap()
}

fn expression(ctx: &Arc<ExpressionContext>, operand: Bson) -> ExpressionNode {
    ExpressionNode::new(Expression::parse_operand(ctx, &operand, ctx.variables_parse_state()).unwrap())
}

/// Builds a tree the way the projection parser does: children first, then their parent.
fn build(ast: &mut ProjectionAst, ctx: &Arc<ExpressionContext>, projection: &Document, query: &Document) -> NodeId {
    let path = ast.new_path();
    for (field, value) in projection {
        if let Some(field) = field.strip_suffix(".$") {
            let predicate = ast.new_match_expression(match_expression(ctx, query.clone()));
            let positional = ast.new_positional(predicate);
            ast.add_child(path, field, positional);
            continue;
        }
        let child = match value {
            Bson::Boolean(b) => ast.new_boolean_constant(*b),
            Bson::Int32(i) => ast.new_boolean_constant(*i != 0),
            Bson::Document(spec) => match spec.iter().next() {
                Some((op, Bson::Int32(limit))) if op == "$slice" => ast.new_slice(None, *limit),
                Some((op, Bson::Array(args))) if op == "$slice" => {
                    let skip = args[0].as_i32().unwrap();
                    let limit = args[1].as_i32().unwrap();
                    ast.new_slice(Some(skip), limit)
                }
                Some((op, Bson::Document(filter))) if op == "$elemMatch" => {
                    let predicate = ast.new_match_expression(match_expression(ctx, filter.clone()));
                    ast.new_elem_match(predicate)
                }
                Some((op, _)) if op.starts_with('$') => ast.new_expression(expression(ctx, value.clone())),
                _ => build(ast, ctx, spec, query),
            },
            other => ast.new_expression(expression(ctx, other.clone())),
        };
        ast.add_child(path, field.as_str(), child);
    }
    path
}

fn all_nodes(ast: &ProjectionAst) -> Vec<NodeRef<'_>> {
    fn collect<'a>(node: NodeRef<'a>, out: &mut Vec<NodeRef<'a>>) {
        out.push(node);
        for child in node.children() {
            collect(child, out);
        }
    }
    let mut nodes = Vec::new();
    for root in ast.roots() {
        collect(root, &mut nodes);
    }
    nodes
}

/// A structural description of a tree: kinds, names and leaf values, in pre-order.
fn describe(node: NodeRef<'_>) -> Vec<String> {
    let mut lines = vec![match node.kind() {
        NodeKind::MatchExpression(m) => format!("match {}", m.match_expression().root()),
        NodeKind::Path(p) => format!("path {:?}", p.field_names()),
        NodeKind::Positional => "positional".to_string(),
        NodeKind::Slice(s) => format!("slice {:?} {}", s.skip(), s.limit()),
        NodeKind::ElemMatch => "elemMatch".to_string(),
        NodeKind::Expression(e) => format!("expression {}", e.expression().serialize()),
        NodeKind::BooleanConstant(b) => format!("constant {}", b.value()),
    }];
    for child in node.children() {
        lines.extend(describe(child));
    }
    lines
}

fn assert_parent_invariant(ast: &ProjectionAst) {
    for node in all_nodes(ast) {
        for child in node.children() {
            assert_eq!(child.parent().map(|p| p.id()), Some(node.id()));
            assert!(!child.is_root());
        }
    }
}

fn sample(ast: &mut ProjectionAst, ctx: &Arc<ExpressionContext>) -> NodeId {
    build(
        ast,
        ctx,
        &doc! {
            "item": 1,
            "ratings.$": 1,
            "tags": { "$slice": [1, 2] },
            "size": { "h": true, "uom": { "$toUpper": "$size.uom" } },
            "surveys": { "$elemMatch": { "name": "s1" } },
            "area": { "$multiply": ["$size.h", "$size.w"] },
        },
        &doc! { "ratings": { "$elemMatch": { "score": { "$gt": 8 } } } },
    )
}

#[test]
fn test_path_lookup() {
    let mut ast = ProjectionAst::new();
    let a = ast.new_boolean_constant(true);
    let b = ast.new_slice(None, 5);
    let path = ast.new_path();
    ast.add_child(path, "a", a);
    ast.add_child(path, "b", b);

    let node = ast.node(path);
    assert_eq!(node.field_names(), &["a".to_string(), "b".to_string()]);
    let found = node.get_child("a").unwrap();
    assert_eq!(found.id(), a);
    assert!(matches!(found.kind(), NodeKind::BooleanConstant(c) if c.value()));
    assert!(node.get_child("c").is_none());
}

#[test]
fn test_positional_clone() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let predicate = ast.new_match_expression(match_expression(&ctx, doc! { "x": 1 }));
    let positional = ast.new_positional(predicate);

    let copy = ast.clone_subtree(positional).unwrap();

    let predicate_of = |ast: &ProjectionAst| {
        let root = ast.root().unwrap();
        assert!(matches!(root.kind(), NodeKind::Positional));
        match root.children().next().unwrap().kind() {
            NodeKind::MatchExpression(m) => (m.bson().clone(), m.match_expression().root().clone()),
            other => panic!("unexpected kind {}", other.name()),
        }
    };
    let (_, original_root) = predicate_of(&ast);
    let (copy_buffer, copy_root) = predicate_of(&copy);
    assert!(!Arc::ptr_eq(&original_root, &copy_root));

    for ast in [&ast, &copy] {
        let node = ast.root().unwrap().match_expression_child().unwrap();
        assert!(node.match_expression().matches(&doc! { "x": 1 }).unwrap());
        assert!(!node.match_expression().matches(&doc! { "x": 2 }).unwrap());
    }

    // Discarding the original must not invalidate the copy.
    drop(ast);
    let node = copy.root().unwrap().match_expression_child().unwrap();
    assert!(node.match_expression().matches(&doc! { "x": 1 }).unwrap());
    assert_eq!(copy_buffer.to_document().unwrap(), doc! { "x": 1 });
}

#[test]
fn test_expression_clone() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let sum = ast.new_expression(expression(&ctx, bson!({ "$add": [1, 2] })));

    let copy = ast.clone_subtree(sum).unwrap();
    let expr_of = |ast: &ProjectionAst, id: NodeId| match ast.node(id).kind() {
        NodeKind::Expression(e) => e.expression().clone(),
        other => panic!("unexpected kind {}", other.name()),
    };
    let original = expr_of(&ast, sum);
    let cloned = expr_of(&copy, copy.root().unwrap().id());

    assert_eq!(cloned.serialize(), original.serialize());
    assert_eq!(cloned.serialize(), bson!({ "$add": [{ "$const": 1 }, { "$const": 2 }] }));
    assert!(!Arc::ptr_eq(&original, &cloned));
}

#[test]
#[should_panic(expected = "requires a match expression child")]
fn test_positional_without_match_expression() {
    let mut ast = ProjectionAst::new();
    let missing = {
        let mut elsewhere = ProjectionAst::new();
        elsewhere.new_path();
        elsewhere.new_boolean_constant(true)
    };
    ast.new_positional(missing);
}

#[test]
fn test_parent_invariant_after_construction_and_clone() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let root = sample(&mut ast, &ctx);
    assert_parent_invariant(&ast);

    let copy = ast.clone_subtree(root).unwrap();
    assert_parent_invariant(&copy);
    assert_parent_invariant(&ast.try_clone().unwrap());
}

#[test]
fn test_clone_independence() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let root = sample(&mut ast, &ctx);
    let before = describe(ast.node(root));

    let mut copy = ast.clone_subtree(root).unwrap();
    let copy_root = copy.root().unwrap().id();
    let size = copy.node(copy_root).get_child("size").unwrap().id();
    let w = copy.new_boolean_constant(true);
    copy.add_child(size, "w", w);

    assert_eq!(describe(ast.node(root)), before);
    assert_ne!(describe(copy.node(copy_root)), before);

    // And the other way around.
    let extra = ast.new_boolean_constant(false);
    ast.add_child(root, "extra", extra);
    assert!(copy.node(copy_root).get_child("extra").is_none());
}

#[test]
fn test_clone_value_equality() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let root = sample(&mut ast, &ctx);
    let copy = ast.clone_subtree(root).unwrap();
    let copy_root = copy.root().unwrap();

    assert_eq!(describe(copy_root), describe(ast.node(root)));

    let original_nodes = all_nodes(&ast);
    let copied_nodes = all_nodes(&copy);
    assert_eq!(original_nodes.len(), copied_nodes.len());
    for (original, copied) in original_nodes.iter().zip(&copied_nodes) {
        match (original.kind(), copied.kind()) {
            (NodeKind::MatchExpression(a), NodeKind::MatchExpression(b)) => {
                assert!(!Arc::ptr_eq(a.match_expression().root(), b.match_expression().root()));
            }
            (NodeKind::Expression(a), NodeKind::Expression(b)) => {
                assert!(!Arc::ptr_eq(a.expression(), b.expression()));
            }
            (a, b) => assert_eq!(a.name(), b.name()),
        }
    }
}

#[test]
fn test_path_parity() {
    let mut ast = ProjectionAst::new();
    let path = ast.new_path();
    let mut expected = Vec::new();
    for (i, name) in ["a", "b", "a", "c", "b"].iter().enumerate() {
        let child = ast.new_slice(Some(i as i32), 1);
        ast.add_child(path, *name, child);
        expected.push((name.to_string(), child));

        let node = ast.node(path);
        assert_eq!(node.field_names().len(), node.child_ids().len());
    }

    let node = ast.node(path);
    for name in ["a", "b", "c"] {
        let first = expected.iter().find(|(n, _)| n == name).map(|(_, id)| *id);
        assert_eq!(node.get_child(name).map(|c| c.id()), first);
    }
    assert!(node.get_child("d").is_none());
}

#[test]
fn test_root_invariant() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let nodes = [
        ast.new_boolean_constant(true),
        ast.new_slice(Some(0), -1),
        ast.new_expression(expression(&ctx, bson!("$a"))),
        ast.new_path(),
    ];
    for &id in &nodes {
        assert!(ast.node(id).is_root());
        assert!(ast.node(id).parent().is_none());
    }

    let root = ast.new_path();
    for (i, &id) in nodes.iter().enumerate() {
        ast.add_child(root, format!("f{}", i), id);
        assert!(!ast.node(id).is_root());
        assert_eq!(ast.node(id).parent().map(|p| p.id()), Some(root));
    }
    assert_eq!(ast.root().map(|r| r.id()), Some(root));
}

#[test]
fn test_dependency_analysis() {
    let ctx = context();
    let mut ast = ProjectionAst::new();
    let root = sample(&mut ast, &ctx);
    let deps = analyze(ast.node(root));

    assert_eq!(deps.projection_type(), ProjectionType::Inclusion);
    assert_eq!(
        deps.required_fields().iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["item", "ratings", "size.h", "size.uom", "size.w", "surveys", "tags"]
    );
    assert!(deps.requires_match_details());
    assert!(deps.has_elem_match());
    assert!(deps.has_slice());
    assert!(deps.has_expressions());
    assert!(!deps.needs_whole_document());
}

#[test]
fn test_trees_are_shareable_between_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ProjectionAst>();

    let ctx = context();
    let mut ast = ProjectionAst::new();
    let root = sample(&mut ast, &ctx);
    let ast = Arc::new(ast);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ast = ast.clone();
            std::thread::spawn(move || describe(ast.node(root)))
        })
        .collect();
    let expected = describe(ast.node(root));
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
