// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cluster adapter.
//!
//! Everything that touches the cluster API lives here: client construction from command-line
//! flags, the table of exportable kinds with their aliases and built-in selector requirements,
//! alias resolution through API discovery, and the [`KindSource`] seam that the export
//! controllers and listers consume. The rest of the crate treats cluster objects as opaque
//! [`DynamicObject`] payloads; only identity and labels are ever inspected.

use crate::{
    labels::{Requirement, Selector},
    Error, Result,
};

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use kube::{
    api::{Api, ListParams, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{DynamicObject, TypeMeta, WatchEvent},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client, Config,
};
use std::{collections::HashMap, path::Path, pin::Pin, sync::Arc};
use tracing::{debug, info, warn};

/// Scope of a kind: does the object live inside a namespace or at the cluster root?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindScope {
    /// Objects of this kind live inside namespaces.
    Namespaced,

    /// Objects of this kind live at the cluster root.
    Cluster,
}

/// One row of the exportable-kind table.
pub struct KindSpec {
    /// Canonical kind name, e.g. `Service`.
    pub kind: &'static str,

    /// Aliases accepted on the command line, e.g. `svc`.
    pub aliases: &'static [&'static str],

    /// Scope of the kind.
    pub scope: KindScope,

    /// Built-in selector requirements applied when the default selector is enabled.
    ///
    /// A constructor rather than a constant: every call builds owned values, so requirements
    /// can never alias state shared between kinds.
    pub requirements: fn() -> Vec<Requirement>,
}

fn no_requirements() -> Vec<Requirement> {
    Vec::new()
}

/// Build and deployer pods are owned by their configs; exporting them only captures churn.
fn pod_requirements() -> Vec<Requirement> {
    vec![
        Requirement::absent("openshift.io/build.name"),
        Requirement::absent("openshift.io/deployer-pod-for.name"),
        Requirement::absent("openshift.io/deployment-config.name"),
    ]
}

fn replication_controller_requirements() -> Vec<Requirement> {
    vec![Requirement::absent("openshift.io/deployment-config.name")]
}

/// All kinds that the `everything` alias expands to.
pub const KINDS: &[KindSpec] = &[
    // cluster-scoped kinds
    KindSpec {
        kind: "Namespace",
        aliases: &["ns", "namespaces"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "PersistentVolume",
        aliases: &["pv", "persistentvolumes"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "SecurityContextConstraints",
        aliases: &["scc", "securitycontextconstraints"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "ClusterPolicy",
        aliases: &["clusterpolicies", "clusterpolicy"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "ClusterPolicyBinding",
        aliases: &["clusterpolicybindings", "clusterpolicybinding"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "User",
        aliases: &["users"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Group",
        aliases: &["groups"],
        scope: KindScope::Cluster,
        requirements: no_requirements,
    },
    // namespace-scoped kinds
    KindSpec {
        kind: "BuildConfig",
        aliases: &["bc", "buildconfigs"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "DeploymentConfig",
        aliases: &["dc", "deploymentconfigs"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "ReplicationController",
        aliases: &["rc", "replicationcontrollers"],
        scope: KindScope::Namespaced,
        requirements: replication_controller_requirements,
    },
    KindSpec {
        kind: "Pod",
        aliases: &["po", "pod", "pods"],
        scope: KindScope::Namespaced,
        requirements: pod_requirements,
    },
    KindSpec {
        kind: "ImageStream",
        aliases: &["is", "imagestreams"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Service",
        aliases: &["svc", "services"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Route",
        aliases: &["route", "routes"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Template",
        aliases: &["template", "templates"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Secret",
        aliases: &["secret", "secrets"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "LimitRange",
        aliases: &["limits", "limitranges"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "ResourceQuota",
        aliases: &["quota", "resourcequotas"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "PersistentVolumeClaim",
        aliases: &["pvc", "persistentvolumeclaims"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "Policy",
        aliases: &["policies", "policy"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "PolicyBinding",
        aliases: &["policybindings", "policybinding"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
    KindSpec {
        kind: "ServiceAccount",
        aliases: &["sa", "serviceaccounts"],
        scope: KindScope::Namespaced,
        requirements: no_requirements,
    },
];

/// Look up a table row by kind name or alias, case-insensitively.
pub fn find_spec(name: &str) -> Option<&'static KindSpec> {
    KINDS.iter().find(|spec| {
        spec.kind.eq_ignore_ascii_case(name)
            || spec.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    })
}

/// Expand requested type names into table rows.
///
/// The meta-alias `everything` expands to the whole table. The returned flag records whether
/// the row was named explicitly, which decides how hard a failed discovery lookup hits later.
///
/// # Errors
///
/// - Will fail if a name is neither `everything`, a kind, nor a known alias.
pub fn expand_types(names: &[String]) -> Result<Vec<(&'static KindSpec, bool)>> {
    let mut rows: Vec<(&'static KindSpec, bool)> = Vec::new();
    let mut index: HashMap<&'static str, usize> = HashMap::new();

    let mut add = |spec: &'static KindSpec, explicit: bool| match index.get(spec.kind) {
        Some(&at) => rows[at].1 |= explicit,
        None => {
            index.insert(spec.kind, rows.len());
            rows.push((spec, explicit));
        }
    };

    for name in names {
        if name.eq_ignore_ascii_case("everything") {
            for spec in KINDS {
                add(spec, false);
            }
        } else {
            let spec = find_spec(name).ok_or_else(|| Error::UnknownKind(name.clone()))?;
            add(spec, true);
        }
    }

    Ok(rows)
}

/// Boxed stream of watch events, as produced by a [`KindSource`].
pub type WatchStream =
    Pin<Box<dyn Stream<Item = kube::Result<WatchEvent<DynamicObject>>> + Send>>;

/// List and watch capability for one kind.
///
/// The reconciliation pipeline only ever talks to the cluster through this trait, which keeps
/// controllers and listers testable against in-memory fakes.
#[async_trait]
pub trait KindSource: Send + Sync {
    /// Kind this source serves.
    fn kind(&self) -> &str;

    /// List all objects matching the selector.
    ///
    /// Returns the items and the collection resource version to start a watch from.
    ///
    /// # Errors
    ///
    /// - Will fail if the cluster cannot be reached or rejects the call.
    async fn list(&self, selector: &Selector) -> Result<(Vec<DynamicObject>, Option<String>)>;

    /// Watch objects matching the selector, starting at the given resource version.
    ///
    /// # Errors
    ///
    /// - Will fail if the watch cannot be established.
    async fn watch(&self, selector: &Selector, from_version: &str) -> Result<WatchStream>;
}

/// [`KindSource`] backed by a dynamic API client.
pub struct ApiSource {
    kind: String,
    api_version: String,
    api: Api<DynamicObject>,
}

impl ApiSource {
    fn stamp(kind: &str, api_version: &str, object: &mut DynamicObject) {
        if object.types.is_none() {
            object.types = Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            });
        }
    }
}

#[async_trait]
impl KindSource for ApiSource {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn list(&self, selector: &Selector) -> Result<(Vec<DynamicObject>, Option<String>)> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        let list = self.api.list(&params).await?;
        let version = list.metadata.resource_version.clone();
        let items = list
            .items
            .into_iter()
            .map(|mut object| {
                Self::stamp(&self.kind, &self.api_version, &mut object);
                object
            })
            .collect();

        Ok((items, version))
    }

    async fn watch(&self, selector: &Selector, from_version: &str) -> Result<WatchStream> {
        let mut params = WatchParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        let kind = self.kind.clone();
        let api_version = self.api_version.clone();
        let stream = self.api.watch(&params, from_version).await?;
        let stream = stream.map(move |event| {
            event.map(|event| match event {
                WatchEvent::Added(mut object) => {
                    Self::stamp(&kind, &api_version, &mut object);
                    WatchEvent::Added(object)
                }
                WatchEvent::Modified(mut object) => {
                    Self::stamp(&kind, &api_version, &mut object);
                    WatchEvent::Modified(object)
                }
                WatchEvent::Deleted(mut object) => {
                    Self::stamp(&kind, &api_version, &mut object);
                    WatchEvent::Deleted(object)
                }
                other => other,
            })
        });

        Ok(stream.boxed())
    }
}

/// [`KindSource`] that exports a single `Namespace` object.
///
/// Used when the invocation is scoped to one namespace: the list is a synthetic one-element
/// collection fetched by name, and the watch never yields. A resync refreshes the object.
pub struct NamespaceSource {
    name: String,
    api_version: String,
    api: Api<DynamicObject>,
}

#[async_trait]
impl KindSource for NamespaceSource {
    fn kind(&self) -> &str {
        "Namespace"
    }

    async fn list(&self, _selector: &Selector) -> Result<(Vec<DynamicObject>, Option<String>)> {
        let mut object = self.api.get(&self.name).await?;
        ApiSource::stamp("Namespace", &self.api_version, &mut object);
        let version = object.metadata.resource_version.clone();

        Ok((vec![object], version))
    }

    async fn watch(&self, _selector: &Selector, _from_version: &str) -> Result<WatchStream> {
        // A single namespace cannot be watched by name, so watch nothing.
        Ok(stream::pending().boxed())
    }
}

/// A kind bound to the cluster: its table row plus a ready-to-use source.
pub struct KindBinding {
    /// Table row of the kind.
    pub spec: &'static KindSpec,

    /// Source serving list and watch calls for the kind.
    pub source: Arc<dyn KindSource>,
}

/// Resolve requested types into bound kinds.
///
/// Expands aliases, resolves each kind against API discovery, and applies the namespace gate:
/// cluster-scoped kinds are only bound under `--all-namespaces`, except for `Namespace`, which
/// degrades to the synthetic single-object source.
///
/// # Errors
///
/// - Will fail if a requested name is unknown to the kind table.
/// - Will fail if an explicitly named kind is not served by the cluster. Kinds reached only
///   through `everything` are skipped with a warning instead.
pub async fn bind_kinds(
    client: &Client,
    types: &[String],
    namespace: &str,
    all_namespaces: bool,
) -> Result<Vec<KindBinding>> {
    let discovery = Discovery::new(client.clone()).run().await?;

    let mut bindings = Vec::new();
    for (spec, explicit) in expand_types(types)? {
        let Some((resource, capabilities)) = resolve(&discovery, spec.kind) else {
            if explicit {
                return Err(Error::UnknownKind(spec.kind.to_string()));
            }
            warn!("Cluster does not serve {}, skipping", spec.kind);
            continue;
        };

        if spec.scope == KindScope::Cluster && !all_namespaces {
            if spec.kind == "Namespace" {
                info!("Exporting only the {namespace:?} namespace object");
                let source = NamespaceSource {
                    name: namespace.to_string(),
                    api_version: resource.api_version.clone(),
                    api: Api::all_with(client.clone(), &resource),
                };
                bindings.push(KindBinding { spec, source: Arc::new(source) });
            } else {
                debug!("Skipping cluster-scoped kind {} without --all-namespaces", spec.kind);
            }
            continue;
        }

        let api = match capabilities.scope {
            Scope::Namespaced if !all_namespaces => {
                Api::namespaced_with(client.clone(), namespace, &resource)
            }
            _ => Api::all_with(client.clone(), &resource),
        };
        let source = ApiSource {
            kind: spec.kind.to_string(),
            api_version: resource.api_version.clone(),
            api,
        };
        bindings.push(KindBinding { spec, source: Arc::new(source) });
    }

    Ok(bindings)
}

fn resolve(discovery: &Discovery, kind: &str) -> Option<(ApiResource, ApiCapabilities)> {
    for group in discovery.groups() {
        for (resource, capabilities) in group.recommended_resources() {
            if resource.kind == kind {
                return Some((resource, capabilities));
            }
        }
    }

    None
}

/// Construct the cluster client from connection flags.
///
/// `--server` and `--token` build a synthetic kubeconfig; `--config` reads the given
/// kubeconfig file; with neither, the configuration is inferred from the environment
/// (`~/.kube/config` or the in-cluster service account).
///
/// # Errors
///
/// - Will fail if no usable cluster configuration can be built.
pub async fn client(
    server: Option<&str>,
    token: Option<&str>,
    kubeconfig: Option<&Path>,
) -> Result<Client> {
    let config = if let Some(server) = server {
        let token = token
            .ok_or_else(|| Error::Config("--server also requires --token".to_string()))?;
        let kubeconfig: Kubeconfig = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": "cluster", "cluster": { "server": server } }],
            "users": [{ "name": "user", "user": { "token": token } }],
            "contexts": [{
                "name": "context",
                "context": { "cluster": "cluster", "user": "user" },
            }],
            "current-context": "context",
        }))?;
        from_kubeconfig(kubeconfig).await?
    } else if let Some(path) = kubeconfig {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|error| {
            Error::Config(format!("failed to read kubeconfig {}: {error}", path.display()))
        })?;
        from_kubeconfig(kubeconfig).await?
    } else {
        Config::infer().await.map_err(|error| {
            Error::Config(format!("failed to infer cluster configuration: {error}"))
        })?
    };

    Ok(Client::try_from(config)?)
}

async fn from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Config> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|error| Error::Config(format!("failed to build cluster configuration: {error}")))
}

/// Namespace the invocation is scoped to: the `-n` flag when given, otherwise the client's
/// default namespace.
pub fn default_namespace(client: &Client, flag: Option<&str>) -> String {
    match flag {
        Some(namespace) => namespace.to_string(),
        None => client.default_namespace().to_string(),
    }
}
