// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use kubegit::{
    repo::Repository,
    resource::{Format, Resource, ResourceRef, ResourceStatus},
    saver::Saver,
};

use anyhow::Result;
use kube::core::DynamicObject;
use std::{path::Path, time::Duration};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn bootstrap(path: &Path) -> Result<Repository> {
    let repository = Repository::builder(path)
        .identity(Some("John Doe"), Some("john@doe.com"))
        .open()?;
    Ok(repository)
}

fn payload(kind: &str, namespace: &str, name: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "replicas": 1 },
    }))
    .unwrap()
}

fn upsert(kind: &str, namespace: &str, name: &str, status: ResourceStatus) -> Resource {
    Resource {
        reference: ResourceRef::from_key(kind, &format!("{namespace}/{name}")),
        payload: Some(payload(kind, namespace, name)),
        exists: true,
        status,
    }
}

fn deletion(kind: &str, key: &str) -> Resource {
    Resource {
        reference: ResourceRef::from_key(kind, key),
        payload: None,
        exists: false,
        status: ResourceStatus::Deleted,
    }
}

/// Run a saver over the given resources until the channel drains.
async fn run_saver(repository: Repository, resources: Vec<Resource>) {
    let (sender, receiver) = mpsc::channel(10);
    let saver = Saver::new(repository, Format::Yaml);
    let task = tokio::spawn(saver.run(receiver, Duration::ZERO, Duration::ZERO));

    for resource in resources {
        sender.send(resource).await.unwrap();
    }
    drop(sender);

    task.await.unwrap();
}

fn commit_messages(path: &Path) -> Vec<String> {
    let repo = git2::Repository::open(path).unwrap();
    let mut revwalk = repo.revwalk().unwrap();
    revwalk.push_head().unwrap();

    revwalk
        .map(|oid| {
            let commit = repo.find_commit(oid.unwrap()).unwrap();
            commit.message().unwrap_or_default().to_string()
        })
        .collect()
}

#[tokio::test]
async fn initial_export_writes_files_and_commits() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");
    let repository = bootstrap(&path)?;

    run_saver(
        repository,
        vec![
            upsert("Service", "ns1", "svc-a", ResourceStatus::Sync),
            upsert("Route", "ns1", "route-a", ResourceStatus::Sync),
        ],
    )
    .await;

    assert!(path.join("Namespace/ns1/Service/svc-a.yaml").exists());
    assert!(path.join("Namespace/ns1/Route/route-a.yaml").exists());

    let messages = commit_messages(&path);
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().any(|message| message == "sync Service ns1/svc-a"));
    assert!(messages.iter().any(|message| message == "sync Route ns1/route-a"));
    assert!(messages.iter().any(|message| message == "Initial commit"));

    Ok(())
}

#[tokio::test]
async fn deletion_removes_the_file_and_commits() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");
    let repository = bootstrap(&path)?;

    run_saver(
        repository,
        vec![
            upsert("Service", "ns1", "svc-a", ResourceStatus::Sync),
            deletion("Service", "ns1/svc-a"),
        ],
    )
    .await;

    assert!(!path.join("Namespace/ns1/Service/svc-a.yaml").exists());
    let messages = commit_messages(&path);
    assert!(messages.iter().any(|message| message == "deleted Service ns1/svc-a"));

    Ok(())
}

#[tokio::test]
async fn identical_payload_produces_no_new_commit() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");
    let repository = bootstrap(&path)?;

    run_saver(
        repository,
        vec![
            upsert("Service", "ns1", "svc-a", ResourceStatus::Sync),
            upsert("Service", "ns1", "svc-a", ResourceStatus::Sync),
        ],
    )
    .await;

    // Initial commit plus exactly one sync commit; the unchanged re-sync is a no-op.
    assert_eq!(commit_messages(&path).len(), 2);

    Ok(())
}

#[tokio::test]
async fn per_resource_failures_do_not_poison_the_pipeline() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");
    let repository = bootstrap(&path)?;

    let broken = Resource {
        reference: ResourceRef::from_key("Service", "ns1/broken"),
        payload: None, // upsert without payload cannot be saved
        exists: true,
        status: ResourceStatus::Sync,
    };

    run_saver(
        repository,
        vec![broken, upsert("Service", "ns1", "svc-a", ResourceStatus::Sync)],
    )
    .await;

    assert!(path.join("Namespace/ns1/Service/svc-a.yaml").exists());
    assert!(!path.join("Namespace/ns1/Service/broken.yaml").exists());

    Ok(())
}

#[tokio::test]
async fn key_index_matches_the_surviving_resources() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");
    let repository = bootstrap(&path)?;
    let work_tree = repository.work_tree().clone();

    run_saver(
        repository,
        vec![
            upsert("Service", "ns1", "svc-a", ResourceStatus::Sync),
            upsert("Service", "ns1", "svc-b", ResourceStatus::Added),
            upsert("Service", "ns2", "svc-c", ResourceStatus::Sync),
            deletion("Service", "ns1/svc-b"),
        ],
    )
    .await;

    let mut keys = work_tree.list_keys("Service");
    keys.sort();
    assert_eq!(keys, vec!["ns1/svc-a", "ns2/svc-c"]);

    Ok(())
}

#[tokio::test]
async fn remote_failures_do_not_stop_local_commits() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("export");

    // Bootstrap without a remote so the initial commit exists, then reopen against a remote
    // that cannot be reached.
    drop(bootstrap(&path)?);
    let repository = Repository::builder(&path)
        .remote_url(Some(temp.path().join("no-such-remote.git").to_string_lossy().into_owned()))
        .identity(Some("John Doe"), Some("john@doe.com"))
        .open()?;

    let (sender, receiver) = mpsc::channel(10);
    let saver = Saver::new(repository, Format::Yaml);
    let task = tokio::spawn(saver.run(
        receiver,
        Duration::from_millis(10),
        Duration::from_millis(10),
    ));

    // Let a few pull/push ticks fail before feeding the resource through.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send(upsert("Service", "ns1", "svc-a", ResourceStatus::Sync)).await.unwrap();
    drop(sender);
    task.await.unwrap();

    let messages = commit_messages(&path);
    assert!(messages.iter().any(|message| message == "sync Service ns1/svc-a"));

    Ok(())
}
