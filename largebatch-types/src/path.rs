use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing document or field paths.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("document path '{0}' must have an even number of segments")]
    NotADocument(String),
}

/// Reference to a single document, e.g. `users/alice` or
/// `users/alice/orders/42`.
///
/// Segments alternate between collection ids and document ids, so a valid
/// document path always has an even number of non-empty segments.
///
/// # Examples
///
/// ```
/// use largebatch_types::path::DocumentPath;
///
/// let doc = DocumentPath::new("users/alice/orders/42").unwrap();
/// assert_eq!(doc.collection(), "orders");
/// assert_eq!(doc.id(), "42");
/// assert!(DocumentPath::new("users").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        if trimmed.split('/').any(str::is_empty) {
            return Err(PathError::EmptySegment(path.clone()));
        }
        if trimmed.split('/').count() % 2 != 0 {
            return Err(PathError::NotADocument(path.clone()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Build a path from a collection id and a document id.
    pub fn from_parts(collection: &str, id: &str) -> Result<Self, PathError> {
        Self::new(format!("{collection}/{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the collection that directly contains this document.
    pub fn collection(&self) -> &str {
        self.segments().rev().nth(1).unwrap_or_default()
    }

    /// Id of the document within its collection.
    pub fn id(&self) -> &str {
        self.segments().next_back().unwrap_or_default()
    }

    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DocumentPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentPath> for String {
    fn from(value: DocumentPath) -> Self {
        value.0
    }
}

/// Dotted path to a (possibly nested) field inside a document, e.g.
/// `profile.address.city`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        Ok(Self(segments))
    }

    /// Build a path from already separated segments. Segments may contain
    /// dots, which is how field names with literal dots are addressed.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(segments.join(".")));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.to_string()
    }
}
