#[derive(Default)]
pub struct Options {
    parse_options: Option<ParseOptions>,
}

impl Options {
    pub fn with_parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = Some(parse_options);
        self
    }

    pub fn parse_options(&self) -> &ParseOptions {
        static DEFAULT_PARSE_OPTIONS: ParseOptions = ParseOptions {
            max_predicate_depth: None,
            max_expression_depth: None,
        };
        self.parse_options.as_ref().unwrap_or(&DEFAULT_PARSE_OPTIONS)
    }
}

#[derive(Default)]
pub struct ParseOptions {

    /// Maximum nesting of logical and array operators accepted in a predicate.
    max_predicate_depth: Option<usize>,

    /// Maximum nesting of operators, objects and arrays accepted in a computed expression.
    max_expression_depth: Option<usize>,
}

impl ParseOptions {
    pub fn with_max_predicate_depth(mut self, depth: usize) -> Self {
        self.max_predicate_depth = Some(depth);
        self
    }

    pub fn with_max_expression_depth(mut self, depth: usize) -> Self {
        self.max_expression_depth = Some(depth);
        self
    }

    pub fn max_predicate_depth(&self) -> usize {
        self.max_predicate_depth.unwrap_or(100)
    }

    pub fn max_expression_depth(&self) -> usize {
        self.max_expression_depth.unwrap_or(100)
    }
}
