// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{GitFixture, GitKind};

use kubegit::repo::Repository;

use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;

fn builder(path: impl Into<PathBuf>) -> kubegit::repo::RepositoryBuilder {
    Repository::builder(path).identity(Some("John Doe"), Some("john@doe.com"))
}

#[test]
fn bootstrap_clones_from_a_remote() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("remote.git");
    let fixture = GitFixture::new(&remote, GitKind::Bare)?;
    fixture.stage_and_commit("README.md", "# existing export\n")?;

    let repository = builder(temp.path().join("export"))
        .remote_url(Some(remote.to_string_lossy().into_owned()))
        .open()?;

    assert!(repository.path().join("README.md").exists());
    // The clone already carries a commit, so no initial commit is created on top.
    assert_eq!(repository.commit_count(), 1);

    Ok(())
}

#[test]
fn bootstrap_pushes_the_initial_commit() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("remote.git");
    let fixture = GitFixture::new(&remote, GitKind::Bare)?;

    let repository = builder(temp.path().join("export"))
        .remote_url(Some(remote.to_string_lossy().into_owned()))
        .open()?;

    assert_eq!(repository.commit_count(), 1);
    assert_eq!(fixture.commit_count(), 1);
    assert_eq!(fixture.head_message().as_deref(), Some("Initial commit"));

    Ok(())
}

#[test]
fn pull_fast_forwards_to_the_remote() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("remote.git");
    let fixture = GitFixture::new(&remote, GitKind::Bare)?;
    fixture.stage_and_commit("README.md", "# existing export\n")?;

    let repository = builder(temp.path().join("export"))
        .remote_url(Some(remote.to_string_lossy().into_owned()))
        .open()?;
    assert_eq!(repository.commit_count(), 1);

    fixture.stage_and_commit("Namespace/ns1/Service/svc-a.yaml", "spec: {}\n")?;
    repository.pull()?;

    assert_eq!(repository.commit_count(), 2);
    assert!(repository.path().join("Namespace/ns1/Service/svc-a.yaml").exists());

    Ok(())
}

#[test]
fn push_publishes_local_commits() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("remote.git");
    let fixture = GitFixture::new(&remote, GitKind::Bare)?;

    let repository = builder(temp.path().join("export"))
        .remote_url(Some(remote.to_string_lossy().into_owned()))
        .open()?;

    let reference = kubegit::resource::ResourceRef::from_key("Service", "ns1/svc-a");
    let mut file = kubegit::repo::ResourceFile::new(
        &repository,
        reference,
        kubegit::resource::ResourceStatus::Sync,
        kubegit::resource::Format::Yaml,
    );
    file.open()?;
    std::io::Write::write_all(&mut file, b"spec: {}\n")?;
    file.close()?;
    file.commit()?;

    repository.push()?;
    assert_eq!(fixture.commit_count(), 2);
    assert_eq!(fixture.head_message().as_deref(), Some("sync Service ns1/svc-a"));

    Ok(())
}

#[test]
fn pull_and_push_are_no_ops_without_a_remote() -> Result<()> {
    let temp = TempDir::new()?;
    let repository = builder(temp.path().join("export")).open()?;

    repository.pull()?;
    repository.push()?;
    assert_eq!(repository.commit_count(), 1);

    Ok(())
}
