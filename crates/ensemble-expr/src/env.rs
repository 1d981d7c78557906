//! Compilation environment: declared variables and compiled programs.
//!
//! Mirrors the compile-then-evaluate shape of hosted expression engines: an
//! [`Environment`] declares the variable names an expression may reference,
//! [`Environment::compile`] checks an expression against them, and the
//! resulting [`Program`] can report its references and be evaluated many
//! times against different bindings.

use indexmap::IndexSet;
use serde_json::Value;

use crate::ast::{self, Expr, Reference};
use crate::error::{Error, Result};
use crate::eval::Bindings;
use crate::parser;

/// A set of declared variable names.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: IndexSet<String>,
}

impl Environment {
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn declare(&mut self, name: impl Into<String>) {
        self.variables.insert(name.into());
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.variables.contains(name)
    }

    /// Parse an expression body and verify every free variable is declared.
    pub fn compile(&self, source: &str) -> Result<Program> {
        let ast = parser::parse(source)?;
        let references = ast::references(&ast);
        for reference in &references {
            if !self.variables.contains(&reference.root) {
                return Err(Error::UndeclaredVariable {
                    name: reference.root.clone(),
                    expression: source.to_string(),
                });
            }
        }
        Ok(Program {
            source: source.to_string(),
            ast,
            references,
        })
    }
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    ast: Expr,
    references: Vec<Reference>,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free variables, deduplicated, in first-appearance order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value> {
        Ok(crate::eval::evaluate(&self.ast, bindings)?)
    }
}
