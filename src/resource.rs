// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resource value types.
//!
//! A [`Resource`] is the unit of work that flows from the export controllers to the saver. It
//! bundles the identity of a cluster object, its (possibly absent) payload, and a change-status
//! tag that ends up in the commit message.

use crate::Result;

use clap::ValueEnum;
use kube::core::DynamicObject;
use serde::Serialize;
use std::fmt;

/// Identity of a cluster object: kind, optional namespace, and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Kind of the object, e.g. `Service`.
    pub kind: String,

    /// Namespace of the object. [`None`] for cluster-scoped objects.
    pub namespace: Option<String>,

    /// Name of the object.
    pub name: String,
}

impl ResourceRef {
    /// Construct a reference from a kind and a `"namespace/name"` or `"name"` key.
    pub fn from_key(kind: impl Into<String>, key: &str) -> Self {
        let (namespace, name) = match key.split_once('/') {
            Some((namespace, name)) => (Some(namespace.to_string()), name.to_string()),
            None => (None, key.to_string()),
        };

        Self { kind: kind.into(), namespace, name }
    }

    /// Construct a reference for an observed object of a known kind.
    ///
    /// List and watch responses routinely omit the `TypeMeta` of individual items, so the kind
    /// always comes from the caller rather than from the object itself.
    pub fn from_object(kind: impl Into<String>, object: &DynamicObject) -> Self {
        Self {
            kind: kind.into(),
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone().unwrap_or_default(),
        }
    }

    /// Whether the object lives inside a namespace.
    pub fn is_namespaced(&self) -> bool {
        self.namespace.as_deref().is_some_and(|ns| !ns.is_empty())
    }

    /// Key of the object: `"namespace/name"` when namespaced, `"name"` otherwise.
    pub fn namespaced_name(&self) -> String {
        match self.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => format!("{namespace}/{}", self.name),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.namespaced_name())
    }
}

/// Change-status tag attached to every resource sent to the saver.
///
/// The lowercase rendering of the status is the first word of the commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Object appeared while watching.
    Added,

    /// Object changed while watching.
    Updated,

    /// Object reported as current state by a list or resync.
    Sync,

    /// Object no longer exists on the cluster.
    Deleted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            ResourceStatus::Added => "added",
            ResourceStatus::Updated => "updated",
            ResourceStatus::Sync => "sync",
            ResourceStatus::Deleted => "deleted",
        };
        write!(f, "{status}")
    }
}

/// A cluster object on its way to the repository.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Identity of the object.
    pub reference: ResourceRef,

    /// Sanitized payload. [`None`] for deletions received as references only.
    pub payload: Option<DynamicObject>,

    /// Whether the object still exists on the cluster.
    pub exists: bool,

    /// Change-status tag used in the commit message.
    pub status: ResourceStatus,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

/// Storage format of exported resources.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// YAML documents, one object per file.
    #[default]
    Yaml,

    /// Pretty-printed JSON documents, one object per file.
    Json,
}

impl Format {
    /// File extension used for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Yaml => "yaml",
            Format::Json => "json",
        }
    }

    /// Serialize a payload into the bytes written to the working copy.
    ///
    /// # Errors
    ///
    /// - Will fail if the payload cannot be represented in this format.
    pub fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let bytes = match self {
            Format::Yaml => serde_yaml::to_string(payload)?.into_bytes(),
            Format::Json => {
                let mut bytes = serde_json::to_vec_pretty(payload)?;
                bytes.push(b'\n');
                bytes
            }
        };

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("Service", "ns1/svc-a", Some("ns1"), "svc-a"; "namespaced key")]
    #[test_case("Namespace", "ns1", None, "ns1"; "cluster scoped key")]
    #[test]
    fn resource_ref_from_key(kind: &str, key: &str, namespace: Option<&str>, name: &str) {
        let reference = ResourceRef::from_key(kind, key);
        self::assert_eq!(reference.kind, kind);
        self::assert_eq!(reference.namespace.as_deref(), namespace);
        self::assert_eq!(reference.name, name);
        self::assert_eq!(reference.namespaced_name(), key);
    }

    #[test]
    fn resource_ref_display() {
        let reference = ResourceRef::from_key("Service", "ns1/svc-a");
        assert_eq!(reference.to_string(), "Service ns1/svc-a");
        assert!(reference.is_namespaced());

        let reference = ResourceRef::from_key("PersistentVolume", "pv-a");
        assert_eq!(reference.to_string(), "PersistentVolume pv-a");
        assert!(!reference.is_namespaced());
    }

    #[test_case(ResourceStatus::Added, "added"; "added")]
    #[test_case(ResourceStatus::Updated, "updated"; "updated")]
    #[test_case(ResourceStatus::Sync, "sync"; "sync")]
    #[test_case(ResourceStatus::Deleted, "deleted"; "deleted")]
    #[test]
    fn resource_status_display(status: ResourceStatus, expect: &str) {
        self::assert_eq!(status.to_string(), expect);
    }

    #[test]
    fn format_extension() {
        assert_eq!(Format::Yaml.extension(), "yaml");
        assert_eq!(Format::Json.extension(), "json");
    }

    #[test]
    fn format_serialize_round_trip() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc-a", "namespace": "ns1" },
            "spec": { "clusterIP": "None" },
        }))
        .unwrap();

        let yaml = Format::Yaml.serialize(&object).unwrap();
        let parsed: DynamicObject = serde_yaml::from_slice(&yaml).unwrap();
        assert_eq!(parsed.metadata.name.as_deref(), Some("svc-a"));

        let json = Format::Json.serialize(&object).unwrap();
        let parsed: DynamicObject = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.metadata.namespace.as_deref(), Some("ns1"));
    }
}
