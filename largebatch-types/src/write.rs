use crate::path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::SystemTime;
use thiserror::Error;

/// Field data of a single document.
pub type DocumentData = serde_json::Map<String, Value>;

/// Condition the stored document must satisfy for a write to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// The document must (or must not) exist.
    Exists(bool),
    /// The document must exist and have been last written at exactly this time.
    UpdateTime(SystemTime),
}

/// How a `set` write combines with an existing document.
///
/// Without options a `set` replaces the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOptions {
    /// Merge the provided data into the existing document.
    Merge,
    /// Only write the listed fields, taking their values from the provided data.
    MergeFields(Vec<FieldPath>),
}

impl SetOptions {
    pub fn merge() -> Self {
        Self::Merge
    }

    pub fn merge_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = FieldPath>,
    {
        Self::MergeFields(fields.into_iter().collect())
    }
}

/// Errors raised while validating the raw argument form of a field update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("expected a field path at argument {position}")]
    ExpectedField { position: usize },
    #[error("field '{field}' at argument {position} has no value")]
    MissingValue { field: String, position: usize },
    #[error("precondition at argument {position} must be the final argument")]
    PreconditionNotLast { position: usize },
    #[error("a field update needs at least one field")]
    NoFields,
}

/// One argument of the alternating `field, value, field, value, ..., [precondition]`
/// update form.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateArg {
    Field(FieldPath),
    Value(Value),
    Precondition(Precondition),
}

impl From<FieldPath> for UpdateArg {
    fn from(value: FieldPath) -> Self {
        Self::Field(value)
    }
}

impl From<Value> for UpdateArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Precondition> for UpdateArg {
    fn from(value: Precondition) -> Self {
        Self::Precondition(value)
    }
}

/// A field-path update: one or more `(field, value)` pairs, optionally guarded
/// by a precondition.
///
/// # Examples
///
/// ```
/// use largebatch_types::path::FieldPath;
/// use largebatch_types::write::{FieldUpdates, Precondition, UpdateArg};
/// use serde_json::json;
///
/// let built = FieldUpdates::new(FieldPath::new("score")?, json!(10))
///     .and(FieldPath::new("stats.games")?, json!(3))
///     .with_precondition(Precondition::Exists(true));
///
/// let parsed = FieldUpdates::from_args(
///     FieldPath::new("score")?,
///     json!(10),
///     [
///         UpdateArg::Field(FieldPath::new("stats.games")?),
///         UpdateArg::Value(json!(3)),
///         UpdateArg::Precondition(Precondition::Exists(true)),
///     ],
/// )?;
/// assert_eq!(built, parsed);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFieldUpdates")]
pub struct FieldUpdates {
    fields: Vec<(FieldPath, Value)>,
    precondition: Option<Precondition>,
}

#[derive(Deserialize)]
struct RawFieldUpdates {
    fields: Vec<(FieldPath, Value)>,
    #[serde(default)]
    precondition: Option<Precondition>,
}

impl TryFrom<RawFieldUpdates> for FieldUpdates {
    type Error = ArgumentError;

    fn try_from(raw: RawFieldUpdates) -> Result<Self, Self::Error> {
        if raw.fields.is_empty() {
            return Err(ArgumentError::NoFields);
        }
        Ok(Self {
            fields: raw.fields,
            precondition: raw.precondition,
        })
    }
}

impl FieldUpdates {
    pub fn new(field: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            fields: vec![(field, value.into())],
            precondition: None,
        }
    }

    /// Add another field to the update.
    pub fn and(mut self, field: FieldPath, value: impl Into<Value>) -> Self {
        self.fields.push((field, value.into()));
        self
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }

    /// Parse the alternating argument form. The leading pair is mandatory;
    /// `rest` continues with further field/value pairs and may end with a
    /// single precondition.
    pub fn from_args<I>(field: FieldPath, value: Value, rest: I) -> Result<Self, ArgumentError>
    where
        I: IntoIterator<Item = UpdateArg>,
    {
        let mut updates = Self::new(field, value);
        let mut args = rest.into_iter().enumerate().peekable();

        // Positions count from the first argument after `value`.
        while let Some((index, arg)) = args.next() {
            let position = index + 2;
            match arg {
                UpdateArg::Field(field) => match args.next() {
                    Some((_, UpdateArg::Value(value))) => updates.fields.push((field, value)),
                    _ => {
                        return Err(ArgumentError::MissingValue {
                            field: field.to_string(),
                            position,
                        });
                    }
                },
                UpdateArg::Precondition(precondition) => {
                    if args.peek().is_some() {
                        return Err(ArgumentError::PreconditionNotLast { position });
                    }
                    updates.precondition = Some(precondition);
                }
                UpdateArg::Value(_) => return Err(ArgumentError::ExpectedField { position }),
            }
        }

        Ok(updates)
    }

    pub fn fields(&self) -> &[(FieldPath, Value)] {
        &self.fields
    }

    pub fn precondition(&self) -> Option<&Precondition> {
        self.precondition.as_ref()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false`: an update carries at least one field.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_parts(self) -> (Vec<(FieldPath, Value)>, Option<Precondition>) {
        (self.fields, self.precondition)
    }
}
