//! Reference resolution (static vs dynamic classification).
//!
//! Each extracted expression is compiled against the declared variable set:
//! every resource id plus the instance scope variable. A reference rooted at
//! a resource id makes the expression dynamic and records a dependency edge;
//! a reference into `schema.spec` or `schema.metadata` is static; anything
//! else is an unresolved variable.

use ensemble_expr::{Environment, RefSegment};
use indexmap::IndexSet;

use crate::error::{Error, Result};
use crate::variable::{FieldDescriptor, ResourceField, VariableKind};

/// Root variable exposing the instance document to expressions.
pub const INSTANCE_VARIABLE: &str = "schema";

/// Instance-scoped sub-paths resolvable before any resource exists.
const INSTANCE_SCOPES: [&str; 2] = ["spec", "metadata"];

/// Build the compilation environment for a group: one opaque variable per
/// resource id plus the instance scope.
pub fn environment(ids: &IndexSet<String>) -> Environment {
    let mut env = Environment::new(ids.iter().cloned());
    env.declare(INSTANCE_VARIABLE);
    env
}

/// Classify the descriptors of one resource.
pub fn resolve_fields(
    descriptors: Vec<FieldDescriptor>,
    env: &Environment,
    ids: &IndexSet<String>,
) -> Result<Vec<ResourceField>> {
    descriptors
        .into_iter()
        .map(|descriptor| resolve_field(descriptor, env, ids))
        .collect()
}

fn resolve_field(
    descriptor: FieldDescriptor,
    env: &Environment,
    ids: &IndexSet<String>,
) -> Result<ResourceField> {
    let mut dependencies: IndexSet<String> = IndexSet::new();

    for expression in &descriptor.expressions {
        let program = env.compile(expression).map_err(|err| match err {
            ensemble_expr::Error::UndeclaredVariable { name, .. } => Error::UnresolvedVariable {
                name,
                path: descriptor.path.clone(),
            },
            other => Error::Expression {
                path: descriptor.path.clone(),
                source: other,
            },
        })?;

        for reference in program.references() {
            if ids.contains(&reference.root) {
                dependencies.insert(reference.root.clone());
            } else {
                // Compilation guarantees the only other declared root is the
                // instance scope.
                debug_assert_eq!(reference.root, INSTANCE_VARIABLE);
                let scope = reference.segments.first();
                let valid = matches!(
                    scope,
                    Some(RefSegment::Field(name)) if INSTANCE_SCOPES.contains(&name.as_str())
                );
                if !valid {
                    return Err(Error::UnresolvedVariable {
                        name: reference.path(),
                        path: descriptor.path.clone(),
                    });
                }
            }
        }
    }

    let kind = if dependencies.is_empty() {
        VariableKind::Static
    } else {
        VariableKind::Dynamic
    };
    Ok(ResourceField {
        descriptor,
        kind,
        dependencies: dependencies.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExpectedType;

    fn descriptor(path: &str, expressions: &[&str]) -> FieldDescriptor {
        FieldDescriptor {
            path: path.to_string(),
            expressions: expressions.iter().map(|s| s.to_string()).collect(),
            expected_type: ExpectedType::String,
            expected_schema: None,
            standalone: expressions.len() == 1,
        }
    }

    fn ids(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn instance_scope_is_static() {
        let ids = ids(&["db"]);
        let env = environment(&ids);
        let fields = resolve_fields(
            vec![descriptor("spec.name", &["schema.spec.name"])],
            &env,
            &ids,
        )
        .unwrap();
        assert!(fields[0].is_static());
        assert!(fields[0].dependencies.is_empty());
    }

    #[test]
    fn resource_reference_is_dynamic_with_edge() {
        let ids = ids(&["db", "web"]);
        let env = environment(&ids);
        let fields = resolve_fields(
            vec![descriptor(
                "spec.dsn",
                &["db.status.endpoint", "schema.spec.port"],
            )],
            &env,
            &ids,
        )
        .unwrap();
        assert_eq!(fields[0].kind, VariableKind::Dynamic);
        assert_eq!(fields[0].dependencies, vec!["db".to_string()]);
    }

    #[test]
    fn unknown_root_is_unresolved() {
        let ids = ids(&["db"]);
        let env = environment(&ids);
        let err = resolve_fields(
            vec![descriptor("spec.dsn", &["cache.status.endpoint"])],
            &env,
            &ids,
        )
        .unwrap_err();
        match err {
            Error::UnresolvedVariable { name, path } => {
                assert_eq!(name, "cache");
                assert_eq!(path, "spec.dsn");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn instance_status_is_not_addressable() {
        let ids = ids(&["db"]);
        let env = environment(&ids);
        let err = resolve_fields(
            vec![descriptor("spec.x", &["schema.status.ready"])],
            &env,
            &ids,
        )
        .unwrap_err();
        match err {
            Error::UnresolvedVariable { name, .. } => assert_eq!(name, "schema.status.ready"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
