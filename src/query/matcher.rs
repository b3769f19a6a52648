use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};
use bson::raw::{RawBsonRef, RawDocument, RawDocumentBuf};
use bson::{Bson, Document};
use crate::error::{Error, Result};
use crate::query::expression_context::ExpressionContext;
use crate::query::tree_node::TreeNode;
use crate::query::{format_path, get_path_value, parse_field_path, PathComponent};
use crate::util::bson_utils::{bson_eq, cmp_bson, raw_to_bson, type_rank};

/// Operators which, when they are the only keys of an `$elemMatch` argument, make it apply to
/// the array elements themselves rather than to sub-documents.
static SCALAR_OPERATIONS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
        HashSet::from([
            "$eq", "$ne", "$gt", "$gte", "$lt", "$lte",
            "$in", "$nin", "$exists", "$size", "$all",
            "$elemMatch", "$not"])
    });

#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl ComparisonOperator {
    fn from_name(name: &str) -> Option<ComparisonOperator> {
        let operator = match name {
            "$eq" => ComparisonOperator::Eq,
            "$ne" => ComparisonOperator::Ne,
            "$gt" => ComparisonOperator::Gt,
            "$gte" => ComparisonOperator::Gte,
            "$lt" => ComparisonOperator::Lt,
            "$lte" => ComparisonOperator::Lte,
            "$in" => ComparisonOperator::In,
            "$nin" => ComparisonOperator::Nin,
            _ => return None,
        };
        Some(operator)
    }
}

/// One step from a document to one of its elements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// A reference to an element of a raw BSON buffer: the buffer plus the steps leading to the
/// element. Predicate operands are never copied out of the document they were parsed from.
#[derive(Clone)]
pub struct ElementRef {
    buffer: Arc<RawDocumentBuf>,
    location: Arc<[Step]>,
}

impl ElementRef {
    fn new(buffer: Arc<RawDocumentBuf>, location: &[Step]) -> Self {
        Self {
            buffer,
            location: location.into(),
        }
    }

    /// Resolves the element inside the buffer.
    pub fn get(&self) -> Result<RawBsonRef<'_>> {
        let root: &RawDocument = &self.buffer;
        let mut current = RawBsonRef::Document(root);
        for step in self.location.iter() {
            let next = match (step, current) {
                (Step::Key(key), RawBsonRef::Document(doc)) => doc.get(key)?,
                (Step::Index(index), RawBsonRef::Array(array)) => array.get(*index)?,
                _ => None,
            };
            current = next.ok_or_else(|| {
                Error::InvalidRequest(format!("No element at {:?} in the predicate buffer", self.location))
            })?;
        }
        Ok(current)
    }

    pub fn to_bson(&self) -> Result<Bson> {
        Ok(raw_to_bson(self.get()?)?)
    }

    /// The buffer holding the element.
    pub fn buffer(&self) -> &Arc<RawDocumentBuf> {
        &self.buffer
    }

    pub fn location(&self) -> &[Step] {
        &self.location
    }
}

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bson() {
            Ok(value) => write!(f, "ElementRef({})", value),
            Err(_) => write!(f, "ElementRef({:?})", self.location),
        }
    }
}

/// A parsed filter. Document-level variants (`And`, `Or`, `Nor`, `FieldFilters`, `AlwaysTrue`,
/// `AlwaysFalse`) apply to a document, the others to the value found at a field path.
#[derive(Debug, Clone)]
pub enum MatchExpr {
    FieldFilters {
        field: Vec<PathComponent>,
        filters: Vec<Arc<MatchExpr>>,
    },
    Comparison {
        operator: ComparisonOperator,
        value: ElementRef,
    },
    Exists(bool),
    Size(usize),
    All(ElementRef),
    /// `$elemMatch` over an array of documents.
    ElemMatchObject(Arc<MatchExpr>),
    /// `$elemMatch` over an array of scalars. Every filter must match the same element.
    ElemMatchValue(Vec<Arc<MatchExpr>>),
    /// Negation of the conjunction of its filters.
    Not(Vec<Arc<MatchExpr>>),
    And(Vec<Arc<MatchExpr>>),
    Or(Vec<Arc<MatchExpr>>),
    Nor(Vec<Arc<MatchExpr>>),
    AlwaysTrue,
    AlwaysFalse,
}

impl TreeNode for MatchExpr {
    fn children(&self) -> Vec<Arc<Self>> {
        match self {
            MatchExpr::FieldFilters { filters, .. } => filters.clone(),
            MatchExpr::ElemMatchObject(child) => vec![child.clone()],
            MatchExpr::ElemMatchValue(children)
            | MatchExpr::Not(children)
            | MatchExpr::And(children)
            | MatchExpr::Or(children)
            | MatchExpr::Nor(children) => children.clone(),
            _ => vec![],
        }
    }

    fn with_new_children(self: Arc<Self>, children: Vec<Arc<Self>>) -> Arc<Self> {
        match self.as_ref() {
            MatchExpr::FieldFilters { field, .. } => Arc::new(MatchExpr::FieldFilters {
                field: field.clone(),
                filters: children,
            }),
            MatchExpr::ElemMatchObject(_) => {
                assert_eq!(children.len(), 1, "$elemMatch expects a single child");
                Arc::new(MatchExpr::ElemMatchObject(children[0].clone()))
            }
            MatchExpr::ElemMatchValue(_) => Arc::new(MatchExpr::ElemMatchValue(children)),
            MatchExpr::Not(_) => Arc::new(MatchExpr::Not(children)),
            MatchExpr::And(_) => Arc::new(MatchExpr::And(children)),
            MatchExpr::Or(_) => Arc::new(MatchExpr::Or(children)),
            MatchExpr::Nor(_) => Arc::new(MatchExpr::Nor(children)),
            _ => self,
        }
    }
}

impl MatchExpr {

    fn is_backed_by(&self, buffer: &Arc<RawDocumentBuf>) -> bool {
        match self {
            MatchExpr::Comparison { value, .. } | MatchExpr::All(value) => Arc::ptr_eq(value.buffer(), buffer),
            _ => self.children().iter().all(|child| child.is_backed_by(buffer)),
        }
    }

    fn matches_document(&self, doc: &Document) -> Result<bool> {
        match self {
            MatchExpr::And(children) => all(children, |c| c.matches_document(doc)),
            MatchExpr::Or(children) => any(children, |c| c.matches_document(doc)),
            MatchExpr::Nor(children) => Ok(!any(children, |c| c.matches_document(doc))?),
            MatchExpr::AlwaysTrue => Ok(true),
            MatchExpr::AlwaysFalse => Ok(false),
            MatchExpr::FieldFilters { field, filters } => {
                let field_value = get_path_value(doc, field);
                all(filters, |f| f.matches_value(field_value))
            }
            _ => panic!("Unsupported top-level filter: {:?}", self),
        }
    }

    fn matches_value(&self, field_value: Option<&Bson>) -> Result<bool> {
        match self {
            MatchExpr::Comparison { operator, value } => {
                Ok(compare_value(*operator, &value.to_bson()?, field_value))
            }
            // `$exists: true` matches documents where the field is present,
            // `$exists: false` documents where it is missing.
            MatchExpr::Exists(exists) => Ok(field_value.is_some() == *exists),
            MatchExpr::Size(size) => Ok(matches!(field_value, Some(Bson::Array(array)) if array.len() == *size)),
            // Every listed value must be equal to the field or contained in it. `$all: []`
            // matches nothing.
            MatchExpr::All(values) => match values.to_bson()? {
                Bson::Array(values) if !values.is_empty() => Ok(values
                    .iter()
                    .all(|v| compare_value(ComparisonOperator::Eq, v, field_value))),
                _ => Ok(false),
            },
            MatchExpr::ElemMatchObject(filter) => elem_match_array(field_value, |elem| match elem {
                Bson::Document(sub_doc) => filter.matches_document(sub_doc),
                _ => Ok(false),
            }),
            MatchExpr::ElemMatchValue(filters) => {
                elem_match_array(field_value, |elem| all(filters, |f| f.matches_value(Some(elem))))
            }
            MatchExpr::Not(filters) => Ok(!all(filters, |f| f.matches_value(field_value))?),
            _ => panic!("Unsupported value filter: {:?}", self),
        }
    }
}

fn all<F>(filters: &[Arc<MatchExpr>], mut f: F) -> Result<bool>
where
    F: FnMut(&Arc<MatchExpr>) -> Result<bool>,
{
    for filter in filters {
        if !f(filter)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any<F>(filters: &[Arc<MatchExpr>], mut f: F) -> Result<bool>
where
    F: FnMut(&Arc<MatchExpr>) -> Result<bool>,
{
    for filter in filters {
        if f(filter)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn elem_match_array<F>(field_value: Option<&Bson>, mut matcher: F) -> Result<bool>
where
    F: FnMut(&Bson) -> Result<bool>,
{
    if let Some(Bson::Array(array)) = field_value {
        for elem in array {
            if matcher(elem)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Compares a document value against an operand using the specified comparison operator.
fn compare_value(operator: ComparisonOperator, operand: &Bson, document_value: Option<&Bson>) -> bool {
    match operator {
        ComparisonOperator::Ne => return !compare_value(ComparisonOperator::Eq, operand, document_value),
        ComparisonOperator::Nin => return !compare_value(ComparisonOperator::In, operand, document_value),
        ComparisonOperator::In => {
            return match operand {
                Bson::Array(candidates) => candidates
                    .iter()
                    .any(|candidate| compare_value(ComparisonOperator::Eq, candidate, document_value)),
                _ => false,
            }
        }
        _ => {}
    }

    let document_value = match document_value {
        Some(v) => v,
        // A missing field only equals null.
        None => return operator == ComparisonOperator::Eq && matches!(operand, Bson::Null),
    };

    // Arrays match if the array itself or any of its elements does.
    if let Bson::Array(array) = document_value {
        if compare_scalar(operator, operand, document_value) {
            return true;
        }
        return array.iter().any(|elem| compare_scalar(operator, operand, elem));
    }

    compare_scalar(operator, operand, document_value)
}

fn compare_scalar(operator: ComparisonOperator, operand: &Bson, value: &Bson) -> bool {
    if operator == ComparisonOperator::Eq {
        return bson_eq(value, operand);
    }

    // Range comparisons never match null and only apply within a type bracket.
    if matches!(value, Bson::Null) {
        return false;
    }
    match (type_rank(value), type_rank(operand)) {
        (Some(a), Some(b)) if a == b => {}
        _ => return false,
    }

    let ordering = match cmp_bson(value, operand) {
        Some(ordering) => ordering,
        None => return false,
    };
    match operator {
        ComparisonOperator::Gt => ordering.is_gt(),
        ComparisonOperator::Gte => ordering.is_ge(),
        ComparisonOperator::Lt => ordering.is_lt(),
        ComparisonOperator::Lte => ordering.is_le(),
        _ => unreachable!("{:?} is handled by compare_value", operator),
    }
}

/// A parsed match expression together with the buffer its operands point into.
///
/// There is deliberately no `Clone`: copies are made with [`Predicate::shallow_clone`].
#[derive(Debug)]
pub struct Predicate {
    root: Arc<MatchExpr>,
}

impl Predicate {
    pub fn root(&self) -> &Arc<MatchExpr> {
        &self.root
    }

    /// Copies the expression tree node by node. Operands keep pointing into the same buffer,
    /// which must therefore be kept alive by the copy's owner.
    pub fn shallow_clone(&self) -> Predicate {
        Predicate {
            root: copy_tree(&self.root),
        }
    }

    /// Whether every operand of the predicate points into `buffer`.
    pub fn is_backed_by(&self, buffer: &Arc<RawDocumentBuf>) -> bool {
        self.root.is_backed_by(buffer)
    }

    pub fn matches(&self, doc: &Document) -> Result<bool> {
        self.root.matches_document(doc)
    }
}

fn copy_tree(node: &Arc<MatchExpr>) -> Arc<MatchExpr> {
    let children = node.children();
    if children.is_empty() {
        return Arc::new(node.as_ref().clone());
    }
    node.clone().with_new_children(children.iter().map(copy_tree).collect())
}

/// Parses the filter held by `buffer`. Operands are recorded as references into `buffer`.
pub fn parse_predicate(ctx: &ExpressionContext, buffer: &Arc<RawDocumentBuf>) -> Result<Predicate> {
    let parser = PredicateParser {
        buffer,
        max_depth: ctx.parse_options().max_predicate_depth(),
    };
    let root = parser.parse_conditions(buffer, &mut Vec::new(), 0)?;
    Ok(Predicate { root })
}

struct PredicateParser<'a> {
    buffer: &'a Arc<RawDocumentBuf>,
    max_depth: usize,
}

impl<'a> PredicateParser<'a> {
    fn element(&self, location: &[Step]) -> ElementRef {
        ElementRef::new(self.buffer.clone(), location)
    }

    /// Parses a document of conditions. `location` is the path of `doc` within the buffer.
    fn parse_conditions(&self, doc: &RawDocument, location: &mut Vec<Step>, depth: usize) -> Result<Arc<MatchExpr>> {
        if depth > self.max_depth {
            return Err(Error::NestingTooDeep { kind: "predicate", limit: self.max_depth });
        }

        let mut conditions = Vec::new();

        for entry in doc.iter() {
            let (key, value) = entry?;
            location.push(Step::Key(key.to_string()));
            let condition = match key {
                "$and" | "$or" | "$nor" => self.parse_logical_operator(key, value, location, depth),
                _ if key.starts_with('$') => Err(Error::InvalidRequest(format!(
                    "unknown top level operator: {}",
                    key
                ))),
                _ => parse_field_path(key).and_then(|field| {
                    Ok(Arc::new(MatchExpr::FieldFilters {
                        field,
                        filters: self.parse_predicates(value, location, depth)?,
                    }))
                }),
            };
            location.pop();
            conditions.push(condition?);
        }

        match conditions.len() {
            0 => Ok(Arc::new(MatchExpr::AlwaysTrue)),
            1 => Ok(conditions.remove(0)),
            _ => Ok(Arc::new(MatchExpr::And(conditions))),
        }
    }

    fn parse_logical_operator(
        &self,
        operator: &str,
        value: RawBsonRef<'_>,
        location: &mut Vec<Step>,
        depth: usize,
    ) -> Result<Arc<MatchExpr>> {
        let array = match value {
            RawBsonRef::Array(array) => array,
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "{} must be an array",
                    operator
                )))
            }
        };

        let mut children = Vec::new();
        for (index, entry) in array.into_iter().enumerate() {
            let sub_doc = match entry? {
                RawBsonRef::Document(sub_doc) => sub_doc,
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "{} argument's entries must be objects",
                        operator
                    )))
                }
            };
            location.push(Step::Index(index));
            let child = self.parse_conditions(sub_doc, location, depth + 1);
            location.pop();
            children.push(child?);
        }

        if children.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "{} argument must be a non-empty array",
                operator
            )));
        }

        Ok(Arc::new(match operator {
            "$and" => MatchExpr::And(children),
            "$or" => MatchExpr::Or(children),
            _ => MatchExpr::Nor(children),
        }))
    }

    /// Parses the conditions applying to one field. `location` points at `value`.
    fn parse_predicates(
        &self,
        value: RawBsonRef<'_>,
        location: &mut Vec<Step>,
        depth: usize,
    ) -> Result<Vec<Arc<MatchExpr>>> {
        let doc = match value {
            RawBsonRef::Document(doc) if is_operator_document(doc)? => doc,
            // Implicit equality for direct field values
            _ => {
                return Ok(vec![Arc::new(MatchExpr::Comparison {
                    operator: ComparisonOperator::Eq,
                    value: self.element(location),
                })])
            }
        };

        let mut predicates = Vec::new();
        for entry in doc.iter() {
            let (key, value) = entry?;
            location.push(Step::Key(key.to_string()));
            let predicate = self.parse_predicate(key, value, location, depth);
            location.pop();
            predicates.push(predicate?);
        }
        Ok(predicates)
    }

    fn parse_predicate(
        &self,
        operator: &str,
        value: RawBsonRef<'_>,
        location: &mut Vec<Step>,
        depth: usize,
    ) -> Result<Arc<MatchExpr>> {
        if let Some(comparison) = ComparisonOperator::from_name(operator) {
            let is_set_operator = matches!(comparison, ComparisonOperator::In | ComparisonOperator::Nin);
            if is_set_operator && !matches!(value, RawBsonRef::Array(_)) {
                return Err(Error::InvalidRequest(format!("{} needs an array", operator)));
            }
            return Ok(Arc::new(MatchExpr::Comparison {
                operator: comparison,
                value: self.element(location),
            }));
        }

        let predicate = match operator {
            "$exists" => match value {
                RawBsonRef::Boolean(exists) => MatchExpr::Exists(exists),
                _ => return Err(Error::InvalidRequest("$exists must be a boolean".to_string())),
            },
            "$size" => {
                let size = match value {
                    RawBsonRef::Int32(size) => usize::try_from(size).ok(),
                    RawBsonRef::Int64(size) => usize::try_from(size).ok(),
                    _ => None,
                };
                match size {
                    Some(size) => MatchExpr::Size(size),
                    None => {
                        return Err(Error::InvalidRequest(
                            "$size must be a non-negative integer".to_string(),
                        ))
                    }
                }
            }
            "$all" => match value {
                RawBsonRef::Array(_) => MatchExpr::All(self.element(location)),
                _ => return Err(Error::InvalidRequest("$all needs an array".to_string())),
            },
            "$elemMatch" => {
                let doc = match value {
                    RawBsonRef::Document(doc) => doc,
                    _ => return Err(Error::InvalidRequest("$elemMatch needs an Object".to_string())),
                };
                if depth + 1 > self.max_depth {
                    return Err(Error::NestingTooDeep { kind: "predicate", limit: self.max_depth });
                }
                if is_scalar_operations_only(doc)? {
                    MatchExpr::ElemMatchValue(self.parse_predicates(value, location, depth + 1)?)
                } else {
                    MatchExpr::ElemMatchObject(self.parse_conditions(doc, location, depth + 1)?)
                }
            }
            "$not" => match value {
                RawBsonRef::Document(doc) if is_operator_document(doc)? => {
                    if depth + 1 > self.max_depth {
                        return Err(Error::NestingTooDeep { kind: "predicate", limit: self.max_depth });
                    }
                    MatchExpr::Not(self.parse_predicates(value, location, depth + 1)?)
                }
                _ => return Err(Error::InvalidRequest("$not needs a document of operators".to_string())),
            },
            _ => return Err(Error::InvalidRequest(format!("unknown operator: {}", operator))),
        };
        Ok(Arc::new(predicate))
    }
}

/// A document is an operator document when its first key starts with `$`.
fn is_operator_document(doc: &RawDocument) -> Result<bool> {
    match doc.iter().next() {
        Some(entry) => Ok(entry?.0.starts_with('$')),
        None => Ok(false),
    }
}

fn is_scalar_operations_only(doc: &RawDocument) -> Result<bool> {
    let mut empty = true;
    for entry in doc.iter() {
        let (key, _) = entry?;
        if !SCALAR_OPERATIONS.contains(key) {
            return Ok(false);
        }
        empty = false;
    }
    Ok(!empty)
}

impl fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |children: &[Arc<MatchExpr>]| {
            children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
        };
        match self {
            MatchExpr::FieldFilters { field, filters } => {
                write!(f, "{}: {{{}}}", format_path(field), join(filters))
            }
            MatchExpr::Comparison { operator, value } => write!(f, "{:?} {:?}", operator, value),
            MatchExpr::Exists(exists) => write!(f, "$exists {}", exists),
            MatchExpr::Size(size) => write!(f, "$size {}", size),
            MatchExpr::All(values) => write!(f, "$all {:?}", values),
            MatchExpr::ElemMatchObject(child) => write!(f, "$elemMatch {{{}}}", child),
            MatchExpr::ElemMatchValue(children) => write!(f, "$elemMatch {{{}}}", join(children)),
            MatchExpr::Not(children) => write!(f, "$not {{{}}}", join(children)),
            MatchExpr::And(children) => write!(f, "$and [{}]", join(children)),
            MatchExpr::Or(children) => write!(f, "$or [{}]", join(children)),
            MatchExpr::Nor(children) => write!(f, "$nor [{}]", join(children)),
            MatchExpr::AlwaysTrue => write!(f, "$alwaysTrue"),
            MatchExpr::AlwaysFalse => write!(f, "$alwaysFalse"),
        }
    }
}
