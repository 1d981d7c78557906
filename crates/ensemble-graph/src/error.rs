//! Build errors.
//!
//! Every variant carries the offending path or identifier. The pipeline is
//! fail-fast: the first error aborts the build and surfaces on the group.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("naming convention violation: {0}")]
    Naming(String),

    #[error("id {0} is a reserved keyword")]
    ReservedId(String),

    #[error("found duplicate resource id {0}")]
    DuplicateId(String),

    /// Structural invariant broken while walking a template.
    #[error("schema is missing for path {path:?}")]
    NilSchema { path: String },

    #[error("invalid schema at {path:?}: {message}")]
    Schema { path: String, message: String },

    #[error("type error at path {path:?}: {message}")]
    Type { path: String, message: String },

    #[error("invalid expression at path {path:?}: {source}")]
    Expression {
        path: String,
        #[source]
        source: ensemble_expr::Error,
    },

    #[error("unresolved variable {name:?} at path {path:?}")]
    UnresolvedVariable { name: String, path: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("unknown resource {id:?} referenced by {referrer:?}")]
    UnknownResource { id: String, referrer: String },

    #[error("invalid template for resource {id:?}: {message}")]
    Template { id: String, message: String },

    #[error("invalid schema definition: {0}")]
    Definition(String),

    #[error("cannot parse field path {path:?}: {message}")]
    Path { path: String, message: String },
}
