//! Expression errors.

use thiserror::Error;

use crate::eval::EvalError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `${` without a matching `}`.
    #[error("unterminated expression starting at offset {offset}")]
    Unterminated { offset: usize },

    #[error("cannot parse expression {expression:?}: {message}")]
    Parse { expression: String, message: String },

    #[error("undeclared variable {name:?} in expression {expression:?}")]
    UndeclaredVariable { name: String, expression: String },

    #[error(transparent)]
    Eval(#[from] EvalError),
}
