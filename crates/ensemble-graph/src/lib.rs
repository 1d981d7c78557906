//! Resource group analysis.
//!
//! Turns a [`ResourceGroup`](ensemble_api::ResourceGroup) into an immutable
//! execution plan:
//!
//! 1. [`parser`] walks each template against its schema and extracts the
//!    expression-bearing fields.
//! 2. [`resolver`] classifies every expression reference as static (instance
//!    scope) or dynamic (sibling resource), producing dependency edges.
//! 3. [`dag`] aggregates the edges, rejects cycles, and fixes a
//!    deterministic topological order.
//! 4. [`crd`] synthesizes the custom resource definition for the new kind.
//!
//! [`builder::Builder`] runs the pipeline and produces a [`builder::Graph`].

pub mod builder;
pub mod crd;
pub mod dag;
pub mod error;
pub mod parser;
pub mod path;
pub mod resolver;
pub mod schema;
pub mod validation;
pub mod variable;

pub use builder::{Builder, Graph, GraphResource, SchemaResolver, StaticSchemaResolver};
pub use error::{Error, Result};
pub use schema::ExpectedType;
pub use variable::{FieldDescriptor, ResourceField, VariableKind};
