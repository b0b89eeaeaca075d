// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Payload sanitization.
//!
//! Objects read back from the cluster carry server-assigned runtime state that has no business
//! in an exported manifest: UIDs, resource versions, timestamps, managed-field bookkeeping, and
//! the whole `status` subtree. The sanitizer strips that state before serialization, so the
//! repository only churns when the declarative content actually changes. Some objects are not
//! worth exporting at all and are omitted outright.

use kube::core::DynamicObject;
use thiserror::Error;

/// Annotation left behind by `kubectl apply`, never part of declarative intent.
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Secret type minted by the service account controller.
const SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";

/// Outcome of a failed sanitization.
#[derive(Debug, Error)]
pub enum SanitizeError {
    /// Object should be silently dropped from the export.
    #[error("resource omitted from export")]
    Omit,

    /// Object could not be sanitized.
    #[error("{0}")]
    Failed(String),
}

/// Strips server-assigned fields from an object before serialization.
pub trait Sanitize: Send + Sync {
    /// Sanitize the object in place.
    ///
    /// # Errors
    ///
    /// - Return [`SanitizeError::Omit`] to drop the object from the export silently.
    /// - Return [`SanitizeError::Failed`] if the object cannot be sanitized.
    fn sanitize(&self, object: &mut DynamicObject) -> Result<(), SanitizeError>;
}

/// Default sanitization policy.
///
/// Clears the server-populated metadata fields, drops the `status` subtree, removes the
/// last-applied annotation, and omits service account token secrets since their content is
/// minted by the cluster rather than declared by anyone.
#[derive(Debug, Default, Clone)]
pub struct ExportSanitizer;

impl Sanitize for ExportSanitizer {
    fn sanitize(&self, object: &mut DynamicObject) -> Result<(), SanitizeError> {
        if is_service_account_token(object) {
            return Err(SanitizeError::Omit);
        }

        let meta = &mut object.metadata;
        meta.uid = None;
        meta.resource_version = None;
        meta.creation_timestamp = None;
        meta.generation = None;
        meta.self_link = None;
        meta.managed_fields = None;
        meta.deletion_timestamp = None;
        meta.deletion_grace_period_seconds = None;

        if let Some(annotations) = meta.annotations.as_mut() {
            annotations.remove(LAST_APPLIED_ANNOTATION);
            if annotations.is_empty() {
                meta.annotations = None;
            }
        }

        if let Some(data) = object.data.as_object_mut() {
            data.remove("status");
        }

        Ok(())
    }
}

fn is_service_account_token(object: &DynamicObject) -> bool {
    let is_secret = object.types.as_ref().is_some_and(|types| types.kind == "Secret");
    let token_type = object
        .data
        .get("type")
        .and_then(|value| value.as_str())
        .is_some_and(|value| value == SERVICE_ACCOUNT_TOKEN);

    is_secret && token_type
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn object(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn strips_server_fields() {
        let mut secret = object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "svc-a",
                "namespace": "ns1",
                "uid": "5e9cf7d3",
                "resourceVersion": "4242",
                "creationTimestamp": "2025-01-01T00:00:00Z",
                "generation": 3,
                "selfLink": "/api/v1/namespaces/ns1/services/svc-a",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    "keep.me/note": "yes",
                },
            },
            "spec": { "clusterIP": "10.0.0.1" },
            "status": { "loadBalancer": {} },
        }));

        ExportSanitizer.sanitize(&mut secret).unwrap();

        assert_eq!(secret.metadata.uid, None);
        assert_eq!(secret.metadata.resource_version, None);
        assert_eq!(secret.metadata.creation_timestamp, None);
        assert_eq!(secret.metadata.generation, None);
        assert_eq!(secret.metadata.self_link, None);
        assert_eq!(secret.data.get("status"), None);

        let annotations = secret.metadata.annotations.unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.get("keep.me/note").map(String::as_str), Some("yes"));
    }

    #[test]
    fn drops_empty_annotation_map() {
        let mut service = object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "svc-a",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                },
            },
        }));

        ExportSanitizer.sanitize(&mut service).unwrap();
        assert_eq!(service.metadata.annotations, None);
    }

    #[test]
    fn omits_service_account_tokens() {
        let mut token = object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "default-token-abcde", "namespace": "ns1" },
            "type": "kubernetes.io/service-account-token",
            "data": {},
        }));

        let result = ExportSanitizer.sanitize(&mut token);
        assert!(matches!(result, Err(SanitizeError::Omit)));

        let mut opaque = object(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "app-config", "namespace": "ns1" },
            "type": "Opaque",
        }));
        assert!(ExportSanitizer.sanitize(&mut opaque).is_ok());
    }
}
