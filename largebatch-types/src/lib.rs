//! # largebatch-types
//!
//! Value types shared between the `largebatch` accumulator and the database
//! clients it drives:
//!
//! - **Paths**: `DocumentPath`, `FieldPath`
//! - **Write options**: `Precondition`, `SetOptions`
//! - **Variadic updates**: `FieldUpdates`, `UpdateArg`
//!
//! All types are serializable with Serde. Document payloads are plain JSON
//! objects (`DocumentData`).
//!
//! ## Examples
//!
//! ```rust
//! use largebatch_types::path::{DocumentPath, FieldPath};
//! use largebatch_types::write::{FieldUpdates, Precondition};
//! use serde_json::json;
//!
//! let doc = DocumentPath::new("users/alice")?;
//! let updates = FieldUpdates::new(FieldPath::new("profile.age")?, json!(31))
//!     .with_precondition(Precondition::Exists(true));
//! assert_eq!(doc.collection(), "users");
//! assert_eq!(updates.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod path;
pub mod write;

pub use path::{DocumentPath, FieldPath, PathError};
pub use write::{ArgumentError, DocumentData, FieldUpdates, Precondition, SetOptions, UpdateArg};
