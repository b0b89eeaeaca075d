// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror Kubernetes cluster state into a Git repository.
//!
//! The kubegit tool keeps a local Git working copy in sync with the declarative state of a
//! cluster. Each observed object is sanitized, serialized as YAML or JSON, written to a
//! deterministic path, and committed with a message describing the change. Deletions on the
//! cluster remove the file and produce a deletion commit. The working copy can optionally be kept
//! in sync with a remote repository through periodic pull and push operations.

#![allow(clippy::missing_docs_in_private_items)]
#![warn(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panic_doc,
)]

pub mod cluster;
pub mod cmd;
pub mod controller;
pub mod export;
pub mod labels;
pub mod lister;
pub mod queue;
pub mod repo;
pub mod resource;
pub mod sanitize;
pub mod saver;


use thiserror::Error;

/// Result type of the kubegit binary and library.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type of the kubegit binary and library.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid command-line arguments or repository settings.
    #[error("{0}")]
    Config(String),

    /// Failure from libgit2 while manipulating the working copy.
    #[error(transparent)]
    Git(#[from] git2::Error),

    /// Failure from the file system.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure from the cluster API.
    #[error(transparent)]
    Cluster(#[from] kube::Error),

    /// Label selector that does not follow the selector grammar.
    #[error("invalid label selector {selector:?}: {reason}")]
    Selector {
        /// Original selector text as given by the user.
        selector: String,

        /// Explanation of the grammar violation.
        reason: String,
    },

    /// Resource kind or alias that no table entry or discovery data matches.
    #[error("unknown resource kind or alias {0:?}")]
    UnknownKind(String),

    /// Failure to sanitize a payload before serialization.
    #[error("failed to sanitize {reference}: {reason}")]
    Sanitize {
        /// Identity of the resource that could not be sanitized.
        reference: String,

        /// Explanation from the sanitizer.
        reason: String,
    },

    /// Failure to serialize a resource payload as YAML.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Failure to serialize a resource payload as JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failure in the export pipeline, including aggregated one-shot lister failures.
    #[error("{0}")]
    Export(String),
}
