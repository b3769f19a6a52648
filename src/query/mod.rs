use std::collections::BTreeSet;
use std::fmt;
use bson::{Bson, Document};
use crate::error::{Error, Result};

pub mod expression;
pub mod expression_context;
pub mod matcher;
pub mod projection_ast;
mod tree_node;

#[cfg(test)]
pub(crate) mod expr_fn;

/// Represents a component in a field path
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum PathComponent {
    FieldName(String),   // A named field (e.g., "field" in "document.field")
    ArrayElement(usize), // An array index (e.g., "0" in "array.0")
}

impl From<&str> for PathComponent {
    fn from(value: &str) -> Self {
        PathComponent::FieldName(value.to_string())
    }
}

impl From<usize> for PathComponent {
    fn from(index: usize) -> Self {
        PathComponent::ArrayElement(index)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathComponent::FieldName(name) => write!(f, "{}", name),
            PathComponent::ArrayElement(index) => write!(f, "{}", index),
        }
    }
}

/// Parses a dotted path (`a.b.0.c`) into its components. Numeric components address array
/// elements.
pub fn parse_field_path(path: &str) -> Result<Vec<PathComponent>> {
    path.split('.').map(parse_path_component).collect()
}

fn parse_path_component(component: &str) -> Result<PathComponent> {
    if let Ok(index) = component.parse::<usize>() {
        return Ok(PathComponent::ArrayElement(index));
    }
    if component.is_empty() {
        return Err(Error::InvalidRequest(
            "FieldPath field names may not be empty strings.".to_string(),
        ));
    }
    if component.starts_with('$') {
        return Err(Error::InvalidRequest(format!(
            "FieldPath field names may not start with '$': {}",
            component
        )));
    }
    Ok(PathComponent::FieldName(component.to_string()))
}

/// Extracts a BSON value from a document given a path.
pub fn get_path_value<'a>(doc: &'a Document, path: &[PathComponent]) -> Option<&'a Bson> {
    let mut current = match path.first()? {
        PathComponent::FieldName(name) => doc.get(name)?,
        _ => return None,
    };

    for component in path.iter().skip(1) {
        current = match (component, current) {
            (PathComponent::FieldName(name), Bson::Document(d)) => d.get(name)?,
            (PathComponent::ArrayElement(index), Bson::Array(a)) => a.get(*index)?,
            _ => return None,
        };
    }

    Some(current)
}

pub fn format_path(path: &[PathComponent]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Accumulates the document fields a query component reads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DepsTracker {
    fields: BTreeSet<String>,
    needs_whole_document: bool,
}

impl DepsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, path: impl Into<String>) {
        self.fields.insert(path.into());
    }

    pub fn set_needs_whole_document(&mut self) {
        self.needs_whole_document = true;
    }

    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    pub fn needs_whole_document(&self) -> bool {
        self.needs_whole_document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_get_path_value() {
        let doc = doc! {
            "a": 1,
            "b": { "c": "hello" },
            "d": [10, 20, { "e": 30 }],
        };

        assert_eq!(get_path_value(&doc, &["a".into()]), Some(&Bson::Int32(1)));
        assert_eq!(
            get_path_value(&doc, &["b".into(), "c".into()]),
            Some(&Bson::String("hello".to_string()))
        );
        assert_eq!(get_path_value(&doc, &["d".into(), 1.into()]), Some(&Bson::Int32(20)));
        assert_eq!(
            get_path_value(&doc, &["d".into(), 2.into(), "e".into()]),
            Some(&Bson::Int32(30))
        );
        assert_eq!(get_path_value(&doc, &["x".into()]), None);
        assert_eq!(get_path_value(&doc, &["a".into(), "b".into()]), None);
        assert_eq!(get_path_value(&doc, &[]), None);
    }

    #[test]
    fn test_parse_field_path() {
        assert_eq!(
            parse_field_path("a.0.b").unwrap(),
            vec![PathComponent::from("a"), PathComponent::from(0), PathComponent::from("b")]
        );
        assert_eq!(
            parse_field_path("a..b").unwrap_err().to_string(),
            "FieldPath field names may not be empty strings."
        );
        assert!(parse_field_path("a.$b").is_err());
        assert_eq!(format_path(&parse_field_path("x.1.y").unwrap()), "x.1.y");
    }

    #[test]
    fn test_deps_tracker() {
        let mut deps = DepsTracker::new();
        deps.add_field("b");
        deps.add_field("a");
        deps.add_field("b");
        assert_eq!(deps.fields().iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!deps.needs_whole_document());
        deps.set_needs_whole_document();
        assert!(deps.needs_whole_document());
    }
}
