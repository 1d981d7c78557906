//! Instance reconciliation.
//!
//! Drives one instance of a synthesized kind through its execution plan:
//! render each member resource in topological order, apply it with a stable
//! field owner, resolve dynamic references from observed sibling state, and
//! propagate the result into the instance status. Reconciliation is
//! idempotent and re-drivable; a blocked pass returns cleanly and resumes
//! when an event on the blocking resource re-enqueues the instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ensemble_api::instance::{
    new_condition, set_condition, InstanceState, CONDITION_INSTANCE_SYNCED,
};
use ensemble_api::{labels, unstructured, GroupVersionKind, ObjectRef};
use ensemble_expr::{Bindings, Environment};
use ensemble_graph::builder::{Graph, GraphResource, StatusTemplate};
use ensemble_graph::{path, resolver, ExpectedType, ResourceField};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::handler::{ReconcileError, ReconcileHandler};
use crate::platform::PlatformClient;
use crate::registry::Registry;

/// Field owner for every server-side apply issued by the runtime.
pub const FIELD_OWNER: &str = "ensemble-controller";

/// Finalizer held on an instance until all of its children are gone.
pub const FINALIZER: &str = "ensemble.dev/cleanup";

/// Requeue interval while the execution plan is not yet published.
const PLAN_RETRY: Duration = Duration::from_secs(2);

/// Poll interval for child deletion confirmation.
const DELETE_POLL: Duration = Duration::from_secs(1);

/// Progress of one member resource within a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceState {
    Pending,
    Rendered,
    Applied,
    Ready,
    Blocked,
    Failed,
}

/// Reconciler for one synthesized kind.
pub struct InstanceHandler {
    client: Arc<dyn PlatformClient>,
    registry: Arc<Registry>,
    gvk: GroupVersionKind,
}

#[async_trait]
impl ReconcileHandler for InstanceHandler {
    async fn reconcile(&self, key: ObjectRef) -> Result<(), ReconcileError> {
        let Some(graph) = self.registry.get(&self.gvk) else {
            return Err(ReconcileError::requeue_after(
                PLAN_RETRY,
                "execution plan not yet published",
            ));
        };
        let Some(instance) = self
            .client
            .get(&self.gvk, &key.namespace, &key.name)
            .await?
        else {
            debug!(kind = %self.gvk, key = %key, "instance is gone");
            return Ok(());
        };

        if unstructured::deletion_timestamp(&instance).is_some() {
            self.finalize(&graph, &key, instance).await
        } else {
            self.materialize(&graph, &key, instance).await
        }
    }

    async fn on_drop(&self, key: ObjectRef) {
        let Ok(Some(instance)) = self.client.get(&self.gvk, &key.namespace, &key.name).await
        else {
            return;
        };
        let _ = self
            .write_status(
                &key,
                &instance,
                InstanceState::Failed,
                (
                    false,
                    "RetriesExhausted",
                    "reconciliation retries exhausted; waiting for an instance edit",
                ),
                None,
            )
            .await;
    }
}

impl InstanceHandler {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        registry: Arc<Registry>,
        gvk: GroupVersionKind,
    ) -> Self {
        Self {
            client,
            registry,
            gvk,
        }
    }

    async fn materialize(
        &self,
        graph: &Graph,
        key: &ObjectRef,
        mut instance: Value,
    ) -> Result<(), ReconcileError> {
        // Expressions belong in the group, never in instances.
        if let Some(found) = find_expression(instance.get("spec").unwrap_or(&Value::Null), "spec")
        {
            let message = format!("instance spec must not contain expressions (found at {found})");
            self.write_status(
                key,
                &instance,
                InstanceState::Failed,
                (false, "ValidationError", &message),
                None,
            )
            .await?;
            return Err(ReconcileError::Terminal(message));
        }

        if !unstructured::has_finalizer(&instance, FINALIZER) {
            unstructured::add_finalizer(&mut instance, FINALIZER);
            instance = self.client.apply(&self.gvk, &instance, FIELD_OWNER).await?;
        }

        let env = resolver::environment(&graph.resources.keys().cloned().collect());
        let mut bindings = instance_bindings(&instance);

        for id in &graph.topological_order {
            let resource = graph
                .get(id)
                .ok_or_else(|| ReconcileError::Terminal(format!("plan has no resource {id}")))?;
            trace!(resource = %id, state = ?ResourceState::Pending, "walking plan");

            match render_resource(resource, &env, &bindings, &self.gvk, key, &instance) {
                Ok(rendered) => {
                    trace!(resource = %id, state = ?ResourceState::Rendered, "rendered");
                    let applied = self
                        .client
                        .apply(&resource.gvk, &rendered, FIELD_OWNER)
                        .await?;
                    trace!(resource = %id, state = ?ResourceState::Applied, "applied");

                    // Bind the live object so later resources see its status.
                    let namespace = unstructured::namespace(&applied)
                        .unwrap_or_default()
                        .to_string();
                    let name = unstructured::name(&applied).unwrap_or_default().to_string();
                    let live = self
                        .client
                        .get(&resource.gvk, &namespace, &name)
                        .await?
                        .unwrap_or(applied);
                    bindings.insert(id.clone(), live);
                    trace!(resource = %id, state = ?ResourceState::Ready, "observed");
                }
                Err(RenderFailure::Blocked { detail }) => {
                    debug!(
                        resource = %id,
                        state = ?ResourceState::Blocked,
                        detail = %detail,
                        "resource blocked on upstream state"
                    );
                    let message = format!("resource {id} is waiting for {detail}");
                    self.write_status(
                        key,
                        &instance,
                        InstanceState::InProgress,
                        (false, "WaitingForDependencies", &message),
                        None,
                    )
                    .await?;
                    // Re-driven by a watch event on the blocking resource.
                    return Ok(());
                }
                Err(RenderFailure::Terminal(message)) => {
                    let message = format!("resource {id}: {message}");
                    trace!(resource = %id, state = ?ResourceState::Failed, "failed");
                    self.write_status(
                        key,
                        &instance,
                        InstanceState::Failed,
                        (false, "RenderingError", &message),
                        None,
                    )
                    .await?;
                    return Err(ReconcileError::Terminal(message));
                }
            }
        }

        let mut projected = None;
        if let Some(template) = &graph.status_template {
            match project_status(template, &env, &bindings) {
                Ok(value) => projected = Some(value),
                Err(RenderFailure::Blocked { detail }) => {
                    let message = format!("declared status is waiting for {detail}");
                    self.write_status(
                        key,
                        &instance,
                        InstanceState::InProgress,
                        (false, "WaitingForDependencies", &message),
                        None,
                    )
                    .await?;
                    return Ok(());
                }
                Err(RenderFailure::Terminal(message)) => {
                    self.write_status(
                        key,
                        &instance,
                        InstanceState::Failed,
                        (false, "RenderingError", &message),
                        None,
                    )
                    .await?;
                    return Err(ReconcileError::Terminal(message));
                }
            }
        }

        self.write_status(
            key,
            &instance,
            InstanceState::Active,
            (true, "ResourcesReady", "all resources are in their desired state"),
            projected,
        )
        .await?;
        Ok(())
    }

    /// Tear children down in reverse topological order, confirming each is
    /// gone before proceeding, then release the finalizer.
    async fn finalize(
        &self,
        graph: &Graph,
        key: &ObjectRef,
        mut instance: Value,
    ) -> Result<(), ReconcileError> {
        self.write_status(
            key,
            &instance,
            InstanceState::Terminating,
            (false, "Terminating", "deleting member resources"),
            None,
        )
        .await?;

        let env = resolver::environment(&graph.resources.keys().cloned().collect());
        let bindings = instance_bindings(&instance);

        for id in graph.topological_order.iter().rev() {
            let resource = graph
                .get(id)
                .ok_or_else(|| ReconcileError::Terminal(format!("plan has no resource {id}")))?;
            let (namespace, name) = child_identity(resource, &env, &bindings, key)
                .map_err(|message| ReconcileError::Terminal(format!("resource {id}: {message}")))?;

            if self
                .client
                .get(&resource.gvk, &namespace, &name)
                .await?
                .is_some()
            {
                debug!(resource = %id, name = %name, "deleting child");
                self.client.delete(&resource.gvk, &namespace, &name).await?;
                return Err(ReconcileError::requeue_after(
                    DELETE_POLL,
                    format!("waiting for resource {id} to be deleted"),
                ));
            }
        }

        if unstructured::has_finalizer(&instance, FINALIZER) {
            unstructured::remove_finalizer(&mut instance, FINALIZER);
            self.client.apply(&self.gvk, &instance, FIELD_OWNER).await?;
        }
        debug!(kind = %self.gvk, key = %key, "instance finalized");
        Ok(())
    }

    /// Write the instance status when it differs from the live one.
    async fn write_status(
        &self,
        key: &ObjectRef,
        instance: &Value,
        state: InstanceState,
        synced: (bool, &str, &str),
        projected: Option<Value>,
    ) -> Result<(), ReconcileError> {
        let mut conditions: Vec<Condition> = instance
            .get("status")
            .and_then(|s| s.get("conditions"))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let (ok, reason, message) = synced;
        set_condition(
            &mut conditions,
            new_condition(
                CONDITION_INSTANCE_SYNCED,
                ok,
                reason,
                message,
                unstructured::generation(instance),
            ),
        );

        let mut status = match projected {
            Some(value @ Value::Object(_)) => value,
            _ => json!({}),
        };
        status["state"] = json!(state.to_string());
        status["conditions"] = serde_json::to_value(&conditions)
            .map_err(|err| ReconcileError::Terminal(err.to_string()))?;

        if instance.get("status") == Some(&status) {
            return Ok(());
        }
        self.client
            .patch_status(&self.gvk, &key.namespace, &key.name, &status)
            .await?;
        Ok(())
    }
}

/// Bind the instance scope variable.
fn instance_bindings(instance: &Value) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert(
        resolver::INSTANCE_VARIABLE,
        json!({
            "spec": instance.get("spec").cloned().unwrap_or(Value::Null),
            "metadata": instance.get("metadata").cloned().unwrap_or(Value::Null),
        }),
    );
    bindings
}

enum RenderFailure {
    /// Upstream data not yet observable; resolvable by a later pass.
    Blocked { detail: String },
    /// No pass can succeed until the user edits the group or instance.
    Terminal(String),
}

/// Render a member resource: substitute every expression-bearing field,
/// default the namespace, and stamp the owner labels.
fn render_resource(
    resource: &GraphResource,
    env: &Environment,
    bindings: &Bindings,
    instance_gvk: &GroupVersionKind,
    key: &ObjectRef,
    instance: &Value,
) -> Result<Value, RenderFailure> {
    let mut doc = resource.template.clone();
    render_into(&mut doc, &resource.fields, env, bindings)?;

    if unstructured::namespace(&doc).is_none() {
        unstructured::set_namespace(&mut doc, &key.namespace);
    }
    let uid = unstructured::uid(instance).unwrap_or_default();
    unstructured::set_labels(&mut doc, &labels::owner_labels(instance_gvk, key, uid));
    Ok(doc)
}

/// Locate a child for teardown. Identity fields are static by construction,
/// so only static fields need rendering.
fn child_identity(
    resource: &GraphResource,
    env: &Environment,
    bindings: &Bindings,
    key: &ObjectRef,
) -> Result<(String, String), String> {
    let mut doc = resource.template.clone();
    let static_fields: Vec<ResourceField> = resource.static_fields().cloned().collect();
    match render_into(&mut doc, &static_fields, env, bindings) {
        Ok(()) => {}
        Err(RenderFailure::Blocked { detail }) | Err(RenderFailure::Terminal(detail)) => {
            return Err(detail);
        }
    }
    let name = unstructured::name(&doc)
        .ok_or_else(|| "template has no metadata.name".to_string())?
        .to_string();
    let namespace = unstructured::namespace(&doc)
        .unwrap_or(&key.namespace)
        .to_string();
    Ok((namespace, name))
}

fn project_status(
    template: &StatusTemplate,
    env: &Environment,
    bindings: &Bindings,
) -> Result<Value, RenderFailure> {
    let mut doc = template.template.clone();
    render_into(&mut doc, &template.fields, env, bindings)?;
    Ok(doc)
}

/// Substitute every expression-bearing field of `doc` in place.
fn render_into(
    doc: &mut Value,
    fields: &[ResourceField],
    env: &Environment,
    bindings: &Bindings,
) -> Result<(), RenderFailure> {
    for field in fields {
        let descriptor = &field.descriptor;
        let terminal = |message: String| {
            RenderFailure::Terminal(format!("field {:?}: {message}", descriptor.path))
        };
        let segments =
            path::parse(&descriptor.path).map_err(|err| terminal(err.to_string()))?;

        if descriptor.standalone {
            let program = env
                .compile(&descriptor.expressions[0])
                .map_err(|err| terminal(err.to_string()))?;
            let value = program
                .evaluate(bindings)
                .map_err(|err| classify(err, field))?;
            check_expected_type(&value, descriptor.expected_type)
                .map_err(|message| terminal(message))?;
            path::set(doc, &segments, value).map_err(|err| terminal(err.to_string()))?;
        } else {
            let raw = path::get(doc, &segments)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| terminal("templated string is missing".to_string()))?;
            let mut rendered = String::new();
            for segment in
                ensemble_expr::scan(&raw).map_err(|err| terminal(err.to_string()))?
            {
                match segment {
                    ensemble_expr::Segment::Literal(text) => rendered.push_str(&text),
                    ensemble_expr::Segment::Expression(body) => {
                        let program =
                            env.compile(&body).map_err(|err| terminal(err.to_string()))?;
                        let value = program
                            .evaluate(bindings)
                            .map_err(|err| classify(err, field))?;
                        let text =
                            coerce_to_string(&value).map_err(|message| terminal(message))?;
                        rendered.push_str(&text);
                    }
                }
            }
            path::set(doc, &segments, Value::String(rendered))
                .map_err(|err| terminal(err.to_string()))?;
        }
    }
    Ok(())
}

/// Sort expression failures: missing upstream data on a dynamic field is a
/// blocked pass, everything else is terminal for this instance revision.
fn classify(err: ensemble_expr::Error, field: &ResourceField) -> RenderFailure {
    match &err {
        ensemble_expr::Error::Eval(eval) if eval.is_missing_data() && !field.is_static() => {
            RenderFailure::Blocked {
                detail: eval.to_string(),
            }
        }
        _ => RenderFailure::Terminal(format!(
            "field {:?}: expression failed: {err}",
            field.descriptor.path
        )),
    }
}

/// A standalone expression may take any type its field's schema admits.
fn check_expected_type(value: &Value, expected: ExpectedType) -> Result<(), String> {
    let ok = match expected {
        ExpectedType::Any => true,
        ExpectedType::String => value.is_string(),
        ExpectedType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        ExpectedType::Number => value.is_number(),
        ExpectedType::Boolean => value.is_boolean(),
        ExpectedType::Object => value.is_object(),
        ExpectedType::Array => value.is_array(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "expression result {value} does not match declared type {expected}"
        ))
    }
}

/// Embedded expressions must render to something string-coercible.
fn coerce_to_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!(
            "expression result {other} is not coercible to string"
        )),
    }
}

/// First expression found in a document that must not contain any.
fn find_expression(value: &Value, root: &str) -> Option<String> {
    match value {
        Value::String(s) if ensemble_expr::has_expressions(s) => Some(root.to_string()),
        Value::Object(map) => map
            .iter()
            .find_map(|(k, v)| find_expression(v, &path::join(root, k))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_expression(v, &path::join_index(root, i))),
        _ => None,
    }
}
