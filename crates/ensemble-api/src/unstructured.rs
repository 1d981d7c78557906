//! Accessors for unstructured platform objects.
//!
//! Child resources and instances flow through the engine as raw
//! `serde_json::Value` documents; these helpers cover the handful of
//! metadata fields the engine needs without forcing a typed decode.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::meta::{GroupVersionKind, ObjectRef};

pub fn api_version(obj: &Value) -> Option<&str> {
    obj.get("apiVersion")?.as_str()
}

pub fn kind(obj: &Value) -> Option<&str> {
    obj.get("kind")?.as_str()
}

/// Kind identifier of an object, when both fields are present.
pub fn gvk(obj: &Value) -> Option<GroupVersionKind> {
    Some(GroupVersionKind::from_api_version(
        api_version(obj)?,
        kind(obj)?,
    ))
}

pub fn name(obj: &Value) -> Option<&str> {
    obj.get("metadata")?.get("name")?.as_str()
}

pub fn namespace(obj: &Value) -> Option<&str> {
    obj.get("metadata")?.get("namespace")?.as_str()
}

/// Namespaced key of an object; empty namespace for cluster-scoped objects.
pub fn object_ref(obj: &Value) -> Option<ObjectRef> {
    Some(ObjectRef::new(
        namespace(obj).unwrap_or_default(),
        name(obj)?,
    ))
}

pub fn uid(obj: &Value) -> Option<&str> {
    obj.get("metadata")?.get("uid")?.as_str()
}

pub fn generation(obj: &Value) -> Option<i64> {
    obj.get("metadata")?.get("generation")?.as_i64()
}

pub fn deletion_timestamp(obj: &Value) -> Option<&str> {
    obj.get("metadata")?.get("deletionTimestamp")?.as_str()
}

pub fn labels(obj: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(map)) = obj.get("metadata").and_then(|m| m.get("labels")) {
        for (k, v) in map {
            if let Some(s) = v.as_str() {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    out
}

/// Merge labels into `metadata.labels`, creating the map as needed.
pub fn set_labels(obj: &mut Value, labels: &BTreeMap<String, String>) {
    let meta = ensure_object(obj, "metadata");
    let map = ensure_object_in(meta, "labels");
    for (k, v) in labels {
        map.insert(k.clone(), Value::String(v.clone()));
    }
}

pub fn set_namespace(obj: &mut Value, namespace: &str) {
    let meta = ensure_object(obj, "metadata");
    meta.insert(
        "namespace".to_string(),
        Value::String(namespace.to_string()),
    );
}

pub fn finalizers(obj: &Value) -> Vec<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

pub fn has_finalizer(obj: &Value, finalizer: &str) -> bool {
    finalizers(obj).contains(&finalizer)
}

pub fn add_finalizer(obj: &mut Value, finalizer: &str) {
    if has_finalizer(obj, finalizer) {
        return;
    }
    let meta = ensure_object(obj, "metadata");
    let list = meta
        .entry("finalizers".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(list) = list {
        list.push(Value::String(finalizer.to_string()));
    }
}

pub fn remove_finalizer(obj: &mut Value, finalizer: &str) {
    if let Some(Value::Array(list)) = obj.get_mut("metadata").and_then(|m| m.get_mut("finalizers"))
    {
        list.retain(|v| v.as_str() != Some(finalizer));
    }
}

/// Walk nested objects by field name.
pub fn get<'a>(obj: &'a Value, parts: &[&str]) -> Option<&'a Value> {
    let mut current = obj;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn ensure_object<'a>(obj: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    if !obj.is_object() {
        *obj = Value::Object(Map::new());
    }
    let map = obj.as_object_mut().unwrap();
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut().unwrap()
}

fn ensure_object_in<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut().unwrap()
}
