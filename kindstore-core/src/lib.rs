pub mod error;
pub mod key;
pub mod types;
pub mod wire; // tagged JSON value helpers
pub mod validation;
pub mod field;
pub mod schema;
pub mod container; // Array / Mapping field content
pub mod embedded;
pub mod entity;

pub use container::{Array, Mapping};
pub use embedded::Embedded;
pub use entity::{Entity, EntityBuilder, IdentityRequest, SharedEntity};
pub use error::{Error, Result};
pub use field::{Field, FieldKind};
pub use key::{Key, KeyId};
pub use schema::{Schema, SchemaBuilder, LOCK_FIELD};
pub use types::*;
pub use validation::Constraint;
