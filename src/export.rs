// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Export supervision.
//!
//! One invocation of the export command runs through here: bootstrap the repository, spawn the
//! saver, resolve the requested kinds against the cluster, then either run every kind's
//! one-shot lister to completion or keep per-kind controllers watching until a signal arrives.
//! The supervisor owns the channel lifecycle: controllers stop producing when the stop token
//! fires, the sender side is dropped, and the saver drains and exits.

use crate::{
    cluster::{self, KindBinding},
    cmd::ExportOptions,
    controller::ExportController,
    labels::{self, Selector},
    lister::ExportLister,
    repo::{Repository, WorkTree},
    resource::Resource,
    sanitize::{ExportSanitizer, Sanitize},
    saver::Saver,
    Error, Result,
};

use beau_collector::BeauCollector as _;
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the channel between controllers and the saver. Sends block when the saver
/// falls behind, exerting backpressure on the watch side.
const RESOURCES_CHANNEL_CAPACITY: usize = 10;

/// Grace window for controllers to quiesce after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Run one export invocation to completion.
///
/// # Errors
///
/// - Will fail if the repository cannot be bootstrapped.
/// - Will fail if the cluster client cannot be constructed or kinds cannot be resolved.
/// - Will fail in one-shot mode if any lister failed.
pub async fn run(options: ExportOptions) -> Result<()> {
    let repository = Repository::builder(&options.repository_path)
        .branch(&options.repository_branch)
        .remote_url(options.repository_remote.clone())
        .context_dir(options.repository_context_dir.clone())
        .identity(
            options.repository_user_name.clone(),
            options.repository_user_email.clone(),
        )
        .open()?;
    let work_tree = repository.work_tree().clone();

    let types: Vec<String> = options
        .types
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if types.is_empty() {
        return Err(Error::Config("missing export type".to_string()));
    }

    let client = cluster::client(
        options.server.as_deref(),
        options.token.as_deref(),
        options.kubeconfig.as_deref(),
    )
    .await?;
    let namespace = cluster::default_namespace(&client, options.namespace.as_deref());

    let bindings =
        cluster::bind_kinds(&client, &types, &namespace, options.all_namespaces).await?;
    if bindings.is_empty() {
        warn!("Nothing to export for the requested types");
    }

    let sanitizer: Arc<dyn Sanitize> = Arc::new(ExportSanitizer);
    let (resources, incoming) = mpsc::channel::<Resource>(RESOURCES_CHANNEL_CAPACITY);
    let saver = Saver::new(repository, options.format);
    let saver_task = tokio::spawn(saver.run(
        incoming,
        options.repository_pull_period,
        options.repository_push_period,
    ));

    let result = if options.watch {
        run_watch(&options, bindings, sanitizer, work_tree, resources).await
    } else {
        run_list(&options, bindings, sanitizer, resources).await
    };

    if saver_task.await.is_err() {
        warn!("Saver task panicked");
    }

    result
}

/// One-shot mode: run every lister concurrently and aggregate their failures.
async fn run_list(
    options: &ExportOptions,
    bindings: Vec<KindBinding>,
    sanitizer: Arc<dyn Sanitize>,
    resources: mpsc::Sender<Resource>,
) -> Result<()> {
    let mut listers = Vec::new();
    for binding in bindings {
        let selector = selector_for(options, &binding)?;
        let lister =
            ExportLister::new(binding.source, sanitizer.clone(), selector, resources.clone());
        listers.push(lister.list());
    }
    drop(resources);

    let results: Vec<anyhow::Result<()>> = join_all(listers)
        .await
        .into_iter()
        .map(|result| result.map_err(anyhow::Error::from))
        .collect();
    results
        .into_iter()
        .bcollect::<Vec<_>>()
        .map_err(|error| Error::Export(format!("{error:#}")))?;

    Ok(())
}

/// Watch mode: keep controllers running until a termination signal arrives.
async fn run_watch(
    options: &ExportOptions,
    bindings: Vec<KindBinding>,
    sanitizer: Arc<dyn Sanitize>,
    work_tree: WorkTree,
    resources: mpsc::Sender<Resource>,
) -> Result<()> {
    let stop = CancellationToken::new();
    let mut controllers: JoinSet<()> = JoinSet::new();

    for binding in bindings {
        let selector = selector_for(options, &binding)?;
        let controller = ExportController::new(
            binding.source,
            sanitizer.clone(),
            selector,
            options.resync_period,
            options.format,
            work_tree.clone(),
            resources.clone(),
        );
        controllers.spawn(controller.run(stop.clone()));
    }
    drop(resources);

    wait_for_signal().await?;
    info!("Interrupted by user (or killed)!");
    stop.cancel();

    let drained = async {
        while controllers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drained).await.is_err() {
        warn!("Controllers did not quiesce in time, aborting them");
        controllers.abort_all();
        while controllers.join_next().await.is_some() {}
    }

    Ok(())
}

/// Compose the selector for one kind from the user selector and the kind's built-in
/// requirements, honoring the default-selector flag.
fn selector_for(options: &ExportOptions, binding: &KindBinding) -> Result<Selector> {
    let requirements = if options.default_selector {
        (binding.spec.requirements)()
    } else {
        Vec::new()
    };

    labels::compose(options.selector.as_deref(), requirements)
}

async fn wait_for_signal() -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }

    Ok(())
}
