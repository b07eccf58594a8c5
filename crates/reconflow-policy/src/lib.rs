//! Tool policies: the effective contract of each scanning tool.
//!
//! A policy is a built-in baseline narrowed by optional catalog override rows.
//! Resolution is cached per tool slug by [`PolicyResolver`] and invalidated
//! explicitly when the catalog changes.

mod baseline;
mod catalog;
mod error;
mod policy;
mod resolver;
mod stage;

pub use baseline::Baseline;
pub use catalog::{PolicyCatalog, StaticCatalog};
pub use error::PolicyError;
pub use policy::{FieldKind, RuntimeBound, SchemaField, ToolPolicy};
pub use resolver::PolicyResolver;
pub use stage::Stage;
