use std::fmt;
use std::sync::Arc;
use bson::{Bson, Document};
use crate::error::{Error, Result};
use crate::obs::logger::LogLevel;
use crate::query::expression_context::{ExpressionContext, VariableId, VariablesParseState, CURRENT_ID, ROOT_ID};
use crate::query::DepsTracker;
use crate::{debug, event};

/// Operators accepted in `{ $op: <args> }` form.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    ToUpper,
    ToLower,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
    Cond,
    IfNull,
    Size,
}

impl Operator {
    fn from_name(name: &str) -> Option<Operator> {
        let operator = match name {
            "$add" => Operator::Add,
            "$subtract" => Operator::Subtract,
            "$multiply" => Operator::Multiply,
            "$divide" => Operator::Divide,
            "$concat" => Operator::Concat,
            "$toUpper" => Operator::ToUpper,
            "$toLower" => Operator::ToLower,
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$and" => Operator::And,
            "$or" => Operator::Or,
            "$not" => Operator::Not,
            "$cond" => Operator::Cond,
            "$ifNull" => Operator::IfNull,
            "$size" => Operator::Size,
            _ => return None,
        };
        Some(operator)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Add => "$add",
            Operator::Subtract => "$subtract",
            Operator::Multiply => "$multiply",
            Operator::Divide => "$divide",
            Operator::Concat => "$concat",
            Operator::ToUpper => "$toUpper",
            Operator::ToLower => "$toLower",
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
            Operator::Cond => "$cond",
            Operator::IfNull => "$ifNull",
            Operator::Size => "$size",
        }
    }

    /// Accepted operand count as `(min, max)`, `None` meaning unbounded.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Operator::Add | Operator::Multiply | Operator::Concat => (0, None),
            Operator::And | Operator::Or => (0, None),
            Operator::IfNull => (2, None),
            Operator::Subtract | Operator::Divide => (2, Some(2)),
            Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => (2, Some(2)),
            Operator::Cond => (3, Some(3)),
            Operator::ToUpper | Operator::ToLower | Operator::Not | Operator::Size => (1, Some(1)),
        }
    }

    fn check_arity(&self, count: usize) -> Result<()> {
        let (min, max) = self.arity();
        let valid = count >= min && max.map_or(true, |max| count <= max);
        if valid {
            return Ok(());
        }
        let expected = match max {
            Some(max) if max == min => format!("exactly {}", min),
            Some(max) => format!("between {} and {}", min, max),
            None => format!("at least {}", min),
        };
        Err(Error::InvalidRequest(format!(
            "Expression {} takes {} arguments. {} were passed in.",
            self.name(),
            expected,
            count
        )))
    }
}

#[derive(Debug)]
pub struct LetVariable {
    pub name: String,
    pub id: VariableId,
    pub value: Arc<Expression>,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Constant(Bson),
    /// Path from the root document, without the leading `$`.
    FieldPath(Vec<String>),
    Variable {
        name: String,
        id: VariableId,
        path: Vec<String>,
    },
    Object(Vec<(String, Arc<Expression>)>),
    Array(Vec<Arc<Expression>>),
    Operator {
        operator: Operator,
        operands: Vec<Arc<Expression>>,
    },
    Let {
        variables: Vec<LetVariable>,
        body: Arc<Expression>,
    },
}

/// A computed-value expression.
///
/// Expressions are immutable and shared through `Arc`. There is no `Clone`: an independent
/// copy is obtained by re-parsing the canonical form (see [`reparse_clone`]).
pub struct Expression {
    ctx: Arc<ExpressionContext>,
    kind: ExpressionKind,
}

impl Expression {

    /// Parses an operand: a field path, a variable reference, an operator or object expression,
    /// an array of operands or a constant.
    pub fn parse_operand(
        ctx: &Arc<ExpressionContext>,
        operand: &Bson,
        vps: &VariablesParseState,
    ) -> Result<Arc<Expression>> {
        let parser = ExpressionParser {
            ctx,
            max_depth: ctx.parse_options().max_expression_depth(),
        };
        parser.parse_operand(operand, vps, 0)
    }

    /// Parses a document as an object expression or, if its single key is an operator,
    /// as an operator expression.
    pub fn parse_object(
        ctx: &Arc<ExpressionContext>,
        doc: &Document,
        vps: &VariablesParseState,
    ) -> Result<Arc<Expression>> {
        let parser = ExpressionParser {
            ctx,
            max_depth: ctx.parse_options().max_expression_depth(),
        };
        parser.parse_document(doc, vps, 0)
    }

    pub fn kind(&self) -> &ExpressionKind {
        &self.kind
    }

    pub fn expression_context(&self) -> &Arc<ExpressionContext> {
        &self.ctx
    }

    pub fn variables_parse_state(&self) -> &VariablesParseState {
        self.ctx.variables_parse_state()
    }

    /// Serializes to the canonical form accepted back by [`Expression::parse_operand`].
    pub fn serialize(&self) -> Bson {
        match &self.kind {
            ExpressionKind::Constant(value) => {
                let mut doc = Document::new();
                doc.insert("$const", value.clone());
                Bson::Document(doc)
            }
            ExpressionKind::FieldPath(path) => Bson::String(format!("${}", path.join("."))),
            ExpressionKind::Variable { name, path, .. } => {
                if path.is_empty() {
                    Bson::String(format!("$${}", name))
                } else {
                    Bson::String(format!("$${}.{}", name, path.join(".")))
                }
            }
            ExpressionKind::Object(fields) => {
                let mut doc = Document::new();
                for (name, value) in fields {
                    doc.insert(name.clone(), value.serialize());
                }
                Bson::Document(doc)
            }
            ExpressionKind::Array(items) => {
                Bson::Array(items.iter().map(|item| item.serialize()).collect())
            }
            ExpressionKind::Operator { operator, operands } => {
                let mut doc = Document::new();
                doc.insert(
                    operator.name(),
                    Bson::Array(operands.iter().map(|operand| operand.serialize()).collect()),
                );
                Bson::Document(doc)
            }
            ExpressionKind::Let { variables, body } => {
                let mut vars = Document::new();
                for variable in variables {
                    vars.insert(variable.name.clone(), variable.value.serialize());
                }
                let mut spec = Document::new();
                spec.insert("vars", vars);
                spec.insert("in", body.serialize());
                let mut doc = Document::new();
                doc.insert("$let", spec);
                Bson::Document(doc)
            }
        }
    }

    /// Records the document fields this expression reads. Paths are absolute.
    pub fn add_dependencies(&self, deps: &mut DepsTracker) {
        match &self.kind {
            ExpressionKind::Constant(_) => {}
            ExpressionKind::FieldPath(path) => deps.add_field(path.join(".")),
            ExpressionKind::Variable { id, path, .. } => {
                if *id == ROOT_ID || *id == CURRENT_ID {
                    if path.is_empty() {
                        deps.set_needs_whole_document();
                    } else {
                        deps.add_field(path.join("."));
                    }
                }
            }
            ExpressionKind::Object(fields) => {
                fields.iter().for_each(|(_, value)| value.add_dependencies(deps))
            }
            ExpressionKind::Array(items) => items.iter().for_each(|item| item.add_dependencies(deps)),
            ExpressionKind::Operator { operands, .. } => {
                operands.iter().for_each(|operand| operand.add_dependencies(deps))
            }
            ExpressionKind::Let { variables, body } => {
                variables.iter().for_each(|variable| variable.value.add_dependencies(deps));
                body.add_dependencies(deps);
            }
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.kind).finish()
    }
}

struct ExpressionParser<'a> {
    ctx: &'a Arc<ExpressionContext>,
    max_depth: usize,
}

impl<'a> ExpressionParser<'a> {
    fn make(&self, kind: ExpressionKind) -> Arc<Expression> {
        Arc::new(Expression {
            ctx: self.ctx.clone(),
            kind,
        })
    }

    fn parse_operand(&self, operand: &Bson, vps: &VariablesParseState, depth: usize) -> Result<Arc<Expression>> {
        if depth > self.max_depth {
            return Err(Error::NestingTooDeep { kind: "expression", limit: self.max_depth });
        }
        match operand {
            Bson::String(s) if s.starts_with("$$") => self.parse_variable(&s[2..], vps),
            Bson::String(s) if s.starts_with('$') => self.parse_field_path(&s[1..]),
            Bson::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.parse_operand(item, vps, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.make(ExpressionKind::Array(items)))
            }
            Bson::Document(doc) => self.parse_document(doc, vps, depth),
            other => Ok(self.make(ExpressionKind::Constant(other.clone()))),
        }
    }

    fn parse_document(&self, doc: &Document, vps: &VariablesParseState, depth: usize) -> Result<Arc<Expression>> {
        if depth > self.max_depth {
            return Err(Error::NestingTooDeep { kind: "expression", limit: self.max_depth });
        }
        let is_operator = doc.keys().next().map_or(false, |key| key.starts_with('$'));
        if is_operator {
            return self.parse_operator_expression(doc, vps, depth);
        }

        let mut fields = Vec::with_capacity(doc.len());
        for (name, value) in doc {
            validate_field_name(name)?;
            fields.push((name.clone(), self.parse_operand(value, vps, depth + 1)?));
        }
        Ok(self.make(ExpressionKind::Object(fields)))
    }

    fn parse_operator_expression(&self, doc: &Document, vps: &VariablesParseState, depth: usize) -> Result<Arc<Expression>> {
        if doc.len() != 1 {
            return Err(Error::InvalidRequest(format!(
                "An object representing an expression must have exactly one field: {}",
                doc
            )));
        }
        let (name, value) = match doc.iter().next() {
            Some(entry) => entry,
            None => return Err(Error::InvalidRequest("Empty operator expression".to_string())),
        };

        match name.as_str() {
            "$literal" | "$const" => Ok(self.make(ExpressionKind::Constant(value.clone()))),
            "$let" => self.parse_let(value, vps, depth),
            _ => {
                let operator = Operator::from_name(name).ok_or_else(|| {
                    Error::InvalidRequest(format!("Unrecognized expression '{}'", name))
                })?;
                let operands = match value {
                    Bson::Array(args) => args
                        .iter()
                        .map(|arg| self.parse_operand(arg, vps, depth + 1))
                        .collect::<Result<Vec<_>>>()?,
                    single => vec![self.parse_operand(single, vps, depth + 1)?],
                };
                operator.check_arity(operands.len())?;
                Ok(self.make(ExpressionKind::Operator { operator, operands }))
            }
        }
    }

    /// `{ $let: { vars: { <name>: <expr>, ... }, in: <expr> } }`. Variable values are parsed in
    /// the enclosing scope, the body in a scope extended with the new names.
    fn parse_let(&self, value: &Bson, vps: &VariablesParseState, depth: usize) -> Result<Arc<Expression>> {
        let spec = match value {
            Bson::Document(spec) => spec,
            _ => return Err(Error::InvalidRequest("$let only supports an object as its argument".to_string())),
        };

        let mut vars = None;
        let mut body = None;
        for (key, value) in spec {
            match key.as_str() {
                "vars" => vars = Some(value),
                "in" => body = Some(value),
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "Unrecognized parameter to $let: {}",
                        key
                    )))
                }
            }
        }

        let vars = match vars {
            Some(Bson::Document(vars)) => vars,
            Some(_) => return Err(Error::InvalidRequest("invalid parameter: expected an object (vars)".to_string())),
            None => return Err(Error::InvalidRequest("Missing 'vars' parameter to $let".to_string())),
        };
        let body = body.ok_or_else(|| Error::InvalidRequest("Missing 'in' parameter to $let".to_string()))?;

        let mut scope = vps.clone();
        let mut variables = Vec::with_capacity(vars.len());
        for (name, value) in vars {
            let value = self.parse_operand(value, vps, depth + 1)?;
            let id = scope.define_variable(name)?;
            variables.push(LetVariable { name: name.clone(), id, value });
        }
        let body = self.parse_operand(body, &scope, depth + 1)?;

        Ok(self.make(ExpressionKind::Let { variables, body }))
    }

    fn parse_variable(&self, spec: &str, vps: &VariablesParseState) -> Result<Arc<Expression>> {
        let mut components = spec.split('.');
        let name = components.next().unwrap_or_default();
        if name.is_empty() {
            return Err(Error::InvalidRequest("empty variable names are not allowed".to_string()));
        }
        let id = vps.get_variable(name)?;
        let path = components
            .map(|component| validate_path_component(component).map(|_| component.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.make(ExpressionKind::Variable { name: name.to_string(), id, path }))
    }

    fn parse_field_path(&self, spec: &str) -> Result<Arc<Expression>> {
        if spec.is_empty() {
            return Err(Error::InvalidRequest("'$' by itself is not a valid FieldPath".to_string()));
        }
        let path = spec
            .split('.')
            .map(|component| validate_path_component(component).map(|_| component.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.make(ExpressionKind::FieldPath(path)))
    }
}

fn validate_path_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::InvalidRequest("FieldPath field names may not be empty strings.".to_string()));
    }
    if component.starts_with('$') {
        return Err(Error::InvalidRequest(format!(
            "FieldPath field names may not start with '$': {}",
            component
        )));
    }
    Ok(())
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest("field names may not be empty".to_string()));
    }
    if name.starts_with('$') {
        return Err(Error::InvalidRequest(format!("field names may not start with '$': {}", name)));
    }
    if name.contains('.') {
        return Err(Error::InvalidRequest(format!("field names may not contain '.': {}", name)));
    }
    Ok(())
}

/// What the expression subsystem must provide for an expression to be copied without a
/// native deep-copy: a canonical form and a parser accepting it back.
pub trait CanonicalForm: Sized {
    fn serialize(&self) -> Bson;

    fn expression_context(&self) -> &Arc<ExpressionContext>;

    fn variables_parse_state(&self) -> &VariablesParseState;

    fn parse_canonical(
        ctx: &Arc<ExpressionContext>,
        serialized: &Bson,
        vps: &VariablesParseState,
    ) -> Result<Arc<Self>>;
}

impl CanonicalForm for Expression {
    fn serialize(&self) -> Bson {
        Expression::serialize(self)
    }

    fn expression_context(&self) -> &Arc<ExpressionContext> {
        Expression::expression_context(self)
    }

    fn variables_parse_state(&self) -> &VariablesParseState {
        Expression::variables_parse_state(self)
    }

    fn parse_canonical(
        ctx: &Arc<ExpressionContext>,
        serialized: &Bson,
        vps: &VariablesParseState,
    ) -> Result<Arc<Self>> {
        Expression::parse_operand(ctx, serialized, vps)
    }
}

/// Produces an independent copy of `expr` by serializing it and parsing the result with the
/// expression's own context and variable scope.
///
/// Only as faithful as the serialization: every expression kind must round-trip through its
/// canonical form. A failure to re-parse is returned to the caller unchanged.
pub fn reparse_clone<E: CanonicalForm>(expr: &E) -> Result<Arc<E>> {
    let ctx = expr.expression_context();
    let serialized = expr.serialize();
    let logger = ctx.logger();
    if logger.is_tracing_enabled() {
        event!(logger, "event: reparse clone, serialized={}", serialized);
    }
    E::parse_canonical(ctx, &serialized, expr.variables_parse_state()).map_err(|e| {
        debug!(logger, "Failed to re-parse serialized expression {}: {}", serialized, e);
        e
    })
}
