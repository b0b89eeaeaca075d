// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command set implementation.
//!
//! This module is the forward facing API of the internal library. It is meant to be used in
//! `main` of the kubegit binary. The entire kubegit command set is implemented right there!

use crate::{export, Result};

use clap::{ArgAction, Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

/// kubegit public command set CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  kubegit [options] <kubegit-command>",
    subcommand_help_heading = "Commands",
    version
)]
pub struct Kubegit {
    /// Command-set interfaces.
    #[command(subcommand)]
    pub command: Command,
}

impl Kubegit {
    /// Run kubegit command based on given arguments.
    ///
    /// # Errors
    ///
    /// Will fail if given command implementation fails.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Export(options) => export::run(options).await,
        }
    }
}

/// Full command-set of kubegit.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Export cluster resources to a Git repository.
    #[command(override_usage = "kubegit export [options] <types>", long_about = EXPORT_LONG_ABOUT)]
    Export(ExportOptions),
}

const EXPORT_LONG_ABOUT: &str = "\
Exports cluster resources to a Git repository - optionally pushing to a configured remote.

It can either be run:
- as a one-time operation, just exporting all resources
- as a daemon, first exporting all resources and then watching for changes (with '--watch')

It expects a comma-separated list of types to export, like buildconfigs, pods, routes and so
on. The special 'everything' alias expands to every supported type.

The '--repository-path' flag is mandatory: it defines where the files will be saved on the
filesystem. If there is no existing repository at this path, a new repository will be created.
If a remote repository is provided with the '--repository-remote' flag, it will be cloned to
the local repository.

By default, resources will be exported in the YAML format, but the '--format' flag can be used
to export as JSON.

By default the cluster connection is read from ~/.kube/config or the in-cluster service
account. Otherwise:
--config to use a custom kubeconfig file
--server and --token to specify the API server URL and (service account) token directly";

/// Export cluster resources to a Git repository.
#[derive(Debug, Clone, Args)]
pub struct ExportOptions {
    /// Comma-separated list of types to export, or 'everything'.
    #[arg(value_name = "types")]
    pub types: String,

    /// Mandatory. Path of the git repository on the filesystem. A new repository will be
    /// created if the path does not exist.
    #[arg(long, value_name = "path")]
    pub repository_path: PathBuf,

    /// Branch of the git repository to use for commits.
    #[arg(long, default_value = "master", value_name = "branch")]
    pub repository_branch: String,

    /// Optional URL of a remote git repository. If present, periodic push/pull operations
    /// will be scheduled, to keep the local and remote repositories in sync.
    #[arg(long, value_name = "url")]
    pub repository_remote: Option<String>,

    /// Optional relative directory (in the repository) that will be used to store data.
    #[arg(long, value_name = "dir")]
    pub repository_context_dir: Option<PathBuf>,

    /// Optional user name to configure for commits.
    #[arg(long, value_name = "name")]
    pub repository_user_name: Option<String>,

    /// Optional user email to configure for commits.
    #[arg(long, value_name = "email")]
    pub repository_user_email: Option<String>,

    /// Format of the exported resources.
    #[arg(long, default_value = "yaml", value_enum, value_name = "format")]
    pub format: crate::resource::Format,

    /// Selector (label query) to filter on.
    #[arg(short = 'l', long = "selector", value_name = "selector")]
    pub selector: Option<String>,

    /// If present, export the requested resources across all namespaces. Namespace in current
    /// context is ignored even if specified with --namespace.
    #[arg(long)]
    pub all_namespaces: bool,

    /// If true, some default label selectors will be applied (for example, ignore build and
    /// deploy pods, or ignore RC managed by DC).
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "bool")]
    pub default_selector: bool,

    /// After exporting the requested types, watch for changes.
    #[arg(short = 'w', long)]
    pub watch: bool,

    /// If not zero, defines the interval of time to perform a full resync of the cluster
    /// resources to export.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1h", value_name = "duration")]
    pub resync_period: Duration,

    /// If not zero, defines the interval of time to perform a pull of the remote git
    /// repository.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2m", value_name = "duration")]
    pub repository_pull_period: Duration,

    /// If not zero, defines the interval of time to perform a push to the remote git
    /// repository.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2m", value_name = "duration")]
    pub repository_push_period: Duration,

    /// Namespace to export from. Defaults to the namespace of the current context.
    #[arg(short = 'n', long, value_name = "namespace")]
    pub namespace: Option<String>,

    /// URL of the cluster API server. Requires --token.
    #[arg(long, value_name = "url", requires = "token")]
    pub server: Option<String>,

    /// Bearer token used to authenticate against --server.
    #[arg(long, value_name = "token", requires = "server")]
    pub token: Option<String>,

    /// Path to a kubeconfig file to use instead of the default one.
    #[arg(long = "config", value_name = "path", conflicts_with_all = ["server", "token"])]
    pub kubeconfig: Option<PathBuf>,
}
