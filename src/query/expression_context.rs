use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use crate::error::{Error, Result};
use crate::obs::logger::{LoggerAndTracer, NoOpLogger};
use crate::options::options::{Options, ParseOptions};

pub type VariableId = u32;

pub const ROOT_ID: VariableId = 0;
pub const CURRENT_ID: VariableId = 1;

const FIRST_USER_ID: VariableId = 2;

/// Names visible to the expression parser and the ids they resolve to.
///
/// Scopes are values: a `$let` body is parsed with a copy extended by the `$let` variables,
/// leaving the enclosing scope untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablesParseState {
    variables: BTreeMap<String, VariableId>,
    next_id: VariableId,
}

impl Default for VariablesParseState {
    fn default() -> Self {
        Self {
            variables: BTreeMap::new(),
            next_id: FIRST_USER_ID,
        }
    }
}

impl VariablesParseState {
    /// Defines `name` in this scope, shadowing any previous definition.
    pub fn define_variable(&mut self, name: &str) -> Result<VariableId> {
        validate_variable_name(name)?;
        let id = self.next_id;
        self.next_id += 1;
        self.variables.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get_variable(&self, name: &str) -> Result<VariableId> {
        match name {
            "ROOT" => Ok(ROOT_ID),
            "CURRENT" => Ok(CURRENT_ID),
            _ => self
                .variables
                .get(name)
                .copied()
                .ok_or_else(|| Error::UndefinedVariable(name.to_string())),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get_variable(name).is_ok()
    }
}

/// User variables start with a lowercase ASCII letter and contain only ASCII letters,
/// digits and underscores.
fn validate_variable_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => {
            return Err(Error::InvalidRequest(format!(
                "'{}' starts with an invalid character for a user variable name",
                name
            )))
        }
    }
    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
        return Err(Error::InvalidRequest(format!(
            "'{}' contains an invalid character for a variable name",
            name
        )));
    }
    Ok(())
}

/// State shared by every expression parsed for one request: options, logger and the
/// top-level variable scope.
pub struct ExpressionContext {
    options: Arc<Options>,
    logger: Arc<dyn LoggerAndTracer>,
    variables_parse_state: VariablesParseState,
}

impl ExpressionContext {
    pub fn new(options: Arc<Options>, logger: Arc<dyn LoggerAndTracer>) -> Self {
        Self {
            options,
            logger,
            variables_parse_state: VariablesParseState::default(),
        }
    }

    /// Defines request-level variables (e.g. the `let` parameters of a find command).
    pub fn with_variables<'a, I>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            self.variables_parse_state.define_variable(name)?;
        }
        Ok(self)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn parse_options(&self) -> &ParseOptions {
        self.options.parse_options()
    }

    pub fn logger(&self) -> &Arc<dyn LoggerAndTracer> {
        &self.logger
    }

    pub fn variables_parse_state(&self) -> &VariablesParseState {
        &self.variables_parse_state
    }
}

impl Default for ExpressionContext {
    fn default() -> Self {
        Self::new(Arc::new(Options::default()), Arc::new(NoOpLogger))
    }
}

impl fmt::Debug for ExpressionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionContext")
            .field("variables_parse_state", &self.variables_parse_state)
            .finish_non_exhaustive()
    }
}
