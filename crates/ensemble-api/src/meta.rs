//! Foundation identifiers for platform kinds and objects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified kind identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` string (`group/version`, or bare `version` for
    /// the core group) and pair it with a kind.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Recompose the `apiVersion` string.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Encoding safe for use as a label value: `Kind.version.group`.
    pub fn label_value(&self) -> String {
        format!("{}.{}.{}", self.kind, self.version, self.group)
    }

    /// Inverse of [`GroupVersionKind::label_value`].
    pub fn from_label_value(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, '.');
        let kind = parts.next()?;
        let version = parts.next()?;
        let group = parts.next().unwrap_or("");
        if kind.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(group, version, kind))
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Namespaced object key. Cluster-scoped objects carry an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_round_trip() {
        let gvk = GroupVersionKind::from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "apps/v1");

        let core = GroupVersionKind::from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn label_value_round_trip() {
        let gvk = GroupVersionKind::new("ensemble.dev", "v1alpha1", "WebApp");
        let encoded = gvk.label_value();
        assert_eq!(encoded, "WebApp.v1alpha1.ensemble.dev");
        assert_eq!(GroupVersionKind::from_label_value(&encoded), Some(gvk));
    }
}
