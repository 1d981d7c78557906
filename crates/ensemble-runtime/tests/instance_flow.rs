//! End-to-end instance lifecycle against the in-memory platform.
//!
//! A two-resource group (database, web server linked by a status
//! expression) is built, installed, and driven through: instance creation,
//! a blocked pass, completion once upstream status arrives, idempotent
//! re-reconciliation, and cascading deletion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ensemble_api::{labels, unstructured, GroupVersionKind, ObjectRef, ResourceGroup};
use ensemble_graph::{Builder, SchemaResolver, StaticSchemaResolver};
use ensemble_runtime::install;
use ensemble_runtime::platform::mem::MemoryPlatform;
use ensemble_runtime::{Config, DynamicController, PlatformClient, Registry};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaProps;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// Use `RUST_LOG` to raise verbosity when a scenario misbehaves.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

const GROUP_YAML: &str = r#"
apiVersion: ensemble.dev/v1alpha1
kind: ResourceGroup
metadata:
  name: webapp
spec:
  schema:
    apiVersion: v1alpha1
    kind: WebApp
    spec:
      type: object
      properties:
        size: {type: integer}
    status:
      endpoint: "${db.status.endpoint}"
  resources:
    - id: web
      template:
        apiVersion: apps.example.com/v1
        kind: WebServer
        metadata: {name: web}
        spec:
          dsn: "${db.status.endpoint}"
    - id: db
      template:
        apiVersion: data.example.com/v1
        kind: Database
        metadata: {name: db}
        spec:
          size: "${schema.spec.size}"
"#;

fn template_schema() -> JSONSchemaProps {
    serde_yaml::from_str(
        r#"
type: object
properties:
  apiVersion: {type: string}
  kind: {type: string}
  metadata:
    type: object
    properties:
      name: {type: string}
      namespace: {type: string}
      labels:
        type: object
        additionalProperties: {type: string}
  spec:
    type: object
    properties:
      size: {type: integer}
      dsn: {type: string}
"#,
    )
    .unwrap()
}

fn schema_resolver() -> Arc<dyn SchemaResolver> {
    Arc::new(
        StaticSchemaResolver::new()
            .with(
                GroupVersionKind::new("data.example.com", "v1", "Database"),
                template_schema(),
            )
            .with(
                GroupVersionKind::new("apps.example.com", "v1", "WebServer"),
                template_schema(),
            ),
    )
}

struct Harness {
    platform: Arc<MemoryPlatform>,
    controller: Arc<DynamicController>,
    instance_gvk: GroupVersionKind,
    db_gvk: GroupVersionKind,
    web_gvk: GroupVersionKind,
}

async fn harness() -> Harness {
    init_tracing();
    let platform = Arc::new(MemoryPlatform::new());
    let client: Arc<dyn PlatformClient> = platform.clone();
    let controller = Arc::new(DynamicController::new(
        client.clone(),
        Config {
            workers: 2,
            ..Config::default()
        },
    ));
    let registry = Arc::new(Registry::new());

    let group: ResourceGroup = serde_yaml::from_str(GROUP_YAML).unwrap();
    let graph = Builder::new(schema_resolver()).build(&group).unwrap();
    assert_eq!(graph.topological_order, vec!["db", "web"]);

    install::install(&controller, &registry, &client, graph)
        .await
        .unwrap();
    assert!(platform
        .installed_crds()
        .contains(&"webapps.ensemble.dev".to_string()));

    Harness {
        platform,
        controller,
        instance_gvk: GroupVersionKind::new("ensemble.dev", "v1alpha1", "WebApp"),
        db_gvk: GroupVersionKind::new("data.example.com", "v1", "Database"),
        web_gvk: GroupVersionKind::new("apps.example.com", "v1", "WebServer"),
    }
}

async fn eventually<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn instance(name: &str, size: i64) -> Value {
    json!({
        "apiVersion": "ensemble.dev/v1alpha1",
        "kind": "WebApp",
        "metadata": {"name": name, "namespace": "prod"},
        "spec": {"size": size},
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn instance_lifecycle_end_to_end() {
    let h = harness().await;

    h.platform
        .apply(&h.instance_gvk, &instance("shop", 3), "test")
        .await
        .unwrap();

    // The database renders from instance spec alone and is applied first.
    eventually("database applied", || async {
        h.platform
            .get(&h.db_gvk, "prod", "db")
            .await
            .unwrap()
            .is_some()
    })
    .await;
    let db = h.platform.get(&h.db_gvk, "prod", "db").await.unwrap().unwrap();
    assert_eq!(db["spec"]["size"], json!(3));
    let db_labels = unstructured::labels(&db);
    assert_eq!(
        db_labels.get(labels::LABEL_INSTANCE_NAME).map(String::as_str),
        Some("shop")
    );

    // The web server is blocked on the database endpoint.
    eventually("instance marked in progress", || async {
        let live = h
            .platform
            .get(&h.instance_gvk, "prod", "shop")
            .await
            .unwrap()
            .unwrap();
        live["status"]["state"] == json!("InProgress")
    })
    .await;
    assert!(h
        .platform
        .get(&h.web_gvk, "prod", "web")
        .await
        .unwrap()
        .is_none());

    // Upstream status arrives; the watch event resumes the instance.
    h.platform
        .patch_status(&h.db_gvk, "prod", "db", &json!({"endpoint": "db.prod:5432"}))
        .await
        .unwrap();

    eventually("web server applied with rendered dsn", || async {
        h.platform
            .get(&h.web_gvk, "prod", "web")
            .await
            .unwrap()
            .map(|web| web["spec"]["dsn"] == json!("db.prod:5432"))
            .unwrap_or(false)
    })
    .await;

    eventually("instance active with projected status", || async {
        let live = h
            .platform
            .get(&h.instance_gvk, "prod", "shop")
            .await
            .unwrap()
            .unwrap();
        live["status"]["state"] == json!("Active")
            && live["status"]["endpoint"] == json!("db.prod:5432")
            && live["status"]["conditions"]
                .as_array()
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c["type"] == json!("InstanceSynced") && c["status"] == json!("True")
                    })
                })
                .unwrap_or(false)
    })
    .await;

    // Idempotency: another pass with no external change changes nothing.
    let db_before = h.platform.get(&h.db_gvk, "prod", "db").await.unwrap();
    let web_before = h.platform.get(&h.web_gvk, "prod", "web").await.unwrap();
    let instance_before = h
        .platform
        .get(&h.instance_gvk, "prod", "shop")
        .await
        .unwrap();
    h.controller
        .enqueue(&h.instance_gvk, ObjectRef::new("prod", "shop"))
        .await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(db_before, h.platform.get(&h.db_gvk, "prod", "db").await.unwrap());
    assert_eq!(
        web_before,
        h.platform.get(&h.web_gvk, "prod", "web").await.unwrap()
    );
    assert_eq!(
        instance_before,
        h.platform
            .get(&h.instance_gvk, "prod", "shop")
            .await
            .unwrap()
    );

    // Deletion cascades in reverse order and releases the finalizer.
    let uid = unstructured::uid(instance_before.as_ref().unwrap())
        .unwrap()
        .to_string();
    h.platform
        .delete(&h.instance_gvk, "prod", "shop")
        .await
        .unwrap();

    eventually("instance and children removed", || async {
        h.platform
            .get(&h.instance_gvk, "prod", "shop")
            .await
            .unwrap()
            .is_none()
    })
    .await;
    assert!(h
        .platform
        .get(&h.web_gvk, "prod", "web")
        .await
        .unwrap()
        .is_none());
    assert!(h
        .platform
        .get(&h.db_gvk, "prod", "db")
        .await
        .unwrap()
        .is_none());
    assert!(h
        .platform
        .objects_with_label(labels::LABEL_INSTANCE_UID, &uid)
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn apply_conflict_recovers_via_requeue() {
    let h = harness().await;

    h.platform
        .apply(&h.instance_gvk, &instance("racy", 2), "test")
        .await
        .unwrap();
    // A concurrent writer wins exactly one apply race inside the reconcile
    // loop; the pass fails with a conflict and is requeued with backoff.
    h.platform.inject_apply_conflicts(1);

    eventually("database applied despite apply conflict", || async {
        h.platform
            .get(&h.db_gvk, "prod", "db")
            .await
            .unwrap()
            .is_some()
    })
    .await;
    h.platform
        .patch_status(&h.db_gvk, "prod", "db", &json!({"endpoint": "db.prod:5432"}))
        .await
        .unwrap();

    eventually("instance active despite apply conflict", || async {
        h.platform
            .get(&h.instance_gvk, "prod", "racy")
            .await
            .unwrap()
            .map(|live| live["status"]["state"] == json!("Active"))
            .unwrap_or(false)
    })
    .await;

    // Recovered by retry, not by dropping the item.
    let stats = h.controller.queue_stats(&h.instance_gvk).await.unwrap();
    assert_eq!(stats.dropped, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn instance_spec_with_expressions_is_rejected() {
    let h = harness().await;

    let mut bad = instance("sneaky", 1);
    bad["spec"]["size"] = json!("${db.status.port}");
    h.platform
        .apply(&h.instance_gvk, &bad, "test")
        .await
        .unwrap();

    eventually("instance marked failed", || async {
        let live = h
            .platform
            .get(&h.instance_gvk, "prod", "sneaky")
            .await
            .unwrap()
            .unwrap();
        live["status"]["state"] == json!("Failed")
    })
    .await;
    assert!(h
        .platform
        .get(&h.db_gvk, "prod", "db")
        .await
        .unwrap()
        .is_none());
}
