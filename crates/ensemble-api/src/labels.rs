//! Owner labels stamped onto every child resource.
//!
//! The labels tie a child back to the instance that produced it: deletion
//! cascades by label selection, and child watch events are routed to the
//! owning instance without holding object references.

use std::collections::BTreeMap;

use crate::meta::{GroupVersionKind, ObjectRef};

pub const LABEL_OWNED: &str = "ensemble.dev/owned";
pub const LABEL_INSTANCE_KIND: &str = "ensemble.dev/instance-kind";
pub const LABEL_INSTANCE_NAME: &str = "ensemble.dev/instance-name";
pub const LABEL_INSTANCE_NAMESPACE: &str = "ensemble.dev/instance-namespace";
pub const LABEL_INSTANCE_UID: &str = "ensemble.dev/instance-uid";

/// Labels identifying the owning instance of a child resource.
pub fn owner_labels(
    instance_gvk: &GroupVersionKind,
    instance: &ObjectRef,
    uid: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_OWNED.to_string(), "true".to_string()),
        (LABEL_INSTANCE_KIND.to_string(), instance_gvk.label_value()),
        (LABEL_INSTANCE_NAME.to_string(), instance.name.clone()),
        (
            LABEL_INSTANCE_NAMESPACE.to_string(),
            instance.namespace.clone(),
        ),
        (LABEL_INSTANCE_UID.to_string(), uid.to_string()),
    ])
}

/// Recover the owning instance from a child's labels.
pub fn owner_of(labels: &BTreeMap<String, String>) -> Option<(GroupVersionKind, ObjectRef)> {
    if labels.get(LABEL_OWNED).map(String::as_str) != Some("true") {
        return None;
    }
    let gvk = GroupVersionKind::from_label_value(labels.get(LABEL_INSTANCE_KIND)?)?;
    let name = labels.get(LABEL_INSTANCE_NAME)?;
    let namespace = labels.get(LABEL_INSTANCE_NAMESPACE)?;
    Some((gvk, ObjectRef::new(namespace.clone(), name.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_round_trip() {
        let gvk = GroupVersionKind::new("ensemble.dev", "v1alpha1", "WebApp");
        let instance = ObjectRef::new("prod", "shop");
        let labels = owner_labels(&gvk, &instance, "uid-1");
        let (got_gvk, got_ref) = owner_of(&labels).unwrap();
        assert_eq!(got_gvk, gvk);
        assert_eq!(got_ref, instance);
    }

    #[test]
    fn owner_of_rejects_foreign_labels() {
        let labels = BTreeMap::from([("app".to_string(), "db".to_string())]);
        assert!(owner_of(&labels).is_none());
    }
}
