// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git repository management.
//!
//! This module provides the typed handle over the working copy that exported resources are
//! written into. The [`Repository`] owns all mutation: bootstrap (clone or init), commit
//! plumbing, and the periodic pull/push against an optional remote. The [`WorkTree`] is the
//! cheap, clonable read-only view of the same directory: path arithmetic between resources and
//! files, plus the key index that the export controllers use to detect dangling objects.
//!
//! Only one task may hold the [`Repository`]; the working copy, its index, and `HEAD` are not
//! safe for concurrent mutation. The [`WorkTree`] read path tolerates running concurrently with
//! the writer.

mod file;

pub use file::ResourceFile;

use crate::{
    resource::{Format, ResourceRef},
    Error, Result,
};

use auth_git2::GitAuthenticator;
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    FetchOptions, PushOptions, RemoteCallbacks, RepositoryInitOptions, Status,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

/// Contents of the README written together with the initial commit.
const README: &str = "# Export of Kubernetes resources\n\nAutomatically managed by `kubegit`.\n";

/// Typed handle over the working copy directory.
///
/// Created once per invocation and owned by the saver. All commits, pulls, and pushes go
/// through this type.
pub struct Repository {
    repo: git2::Repository,
    work_tree: WorkTree,
    branch: String,
    remote_url: Option<String>,
    auth: GitAuthenticator,
}

impl Repository {
    /// Start building a repository handle rooted at the given path.
    pub fn builder(path: impl Into<PathBuf>) -> RepositoryBuilder {
        RepositoryBuilder {
            path: path.into(),
            branch: "master".into(),
            remote_url: None,
            context_dir: None,
            user_name: None,
            user_email: None,
        }
    }

    /// Path of the repository on the file system.
    pub fn path(&self) -> &Path {
        &self.work_tree.root
    }

    /// Branch used for commits.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// URL of the configured remote, if any.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// Read-only view of the working copy, safe to hand to other tasks.
    pub fn work_tree(&self) -> &WorkTree {
        &self.work_tree
    }

    /// Pull from the configured remote.
    ///
    /// No-op without a remote. Fetches the branch and fast-forwards the local copy. A diverged
    /// history is reported as an error; resolving it is out of scope.
    ///
    /// # Errors
    ///
    /// - Will fail if the fetch fails, or local and remote histories have diverged.
    pub fn pull(&self) -> Result<()> {
        let Some(url) = &self.remote_url else {
            return Ok(());
        };
        debug!("Pulling {} from {url}", self.branch);

        let config = self.repo.config()?;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(self.auth.credentials(&config));
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);

        let mut remote = self.repo.find_remote("origin")?;
        remote.fetch(&[self.branch.as_str()], Some(&mut options), None)?;
        drop(remote);

        let fetched = self
            .repo
            .find_reference(&format!("refs/remotes/origin/{}", self.branch))
            .and_then(|reference| self.repo.reference_to_annotated_commit(&reference))?;
        let (analysis, _) = self.repo.merge_analysis(&[&fetched])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        if analysis.is_fast_forward() || analysis.is_unborn() {
            let refname = format!("refs/heads/{}", self.branch);
            self.repo.reference(&refname, fetched.id(), true, "pull: fast-forward")?;
            self.repo.set_head(&refname)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            self.repo.checkout_head(Some(&mut checkout))?;
            return Ok(());
        }

        Err(Error::Git(git2::Error::from_str(
            "local and remote branches have diverged; refusing to merge",
        )))
    }

    /// Push to the configured remote.
    ///
    /// No-op without a remote.
    ///
    /// # Errors
    ///
    /// - Will fail if the remote rejects the push or cannot be reached.
    pub fn push(&self) -> Result<()> {
        let Some(url) = &self.remote_url else {
            return Ok(());
        };
        debug!("Pushing {} to {url}", self.branch);

        let config = self.repo.config()?;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(self.auth.credentials(&config));
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let mut remote = self.repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        remote.push(&[refspec.as_str()], Some(&mut options))?;

        Ok(())
    }

    /// Number of commits reachable from `HEAD`, zero for an unborn branch.
    pub fn commit_count(&self) -> usize {
        let walk = || -> std::result::Result<usize, git2::Error> {
            let mut revwalk = self.repo.revwalk()?;
            revwalk.push_head()?;
            Ok(revwalk.count())
        };
        walk().unwrap_or(0)
    }

    /// Commit message of `HEAD`, if any commit exists.
    pub fn head_message(&self) -> Option<String> {
        let commit = self.head_commit().ok().flatten()?;
        commit.message().ok().map(ToString::to_string)
    }

    /// Stage the single given file (or its removal) and commit it with the given message.
    ///
    /// No-op when the file is neither new nor modified relative to the index and `HEAD`. On
    /// commit failure the index is reset to `HEAD` so a partial stage is not retained.
    pub(crate) fn commit_file(&self, path: &Path, message: &str) -> Result<()> {
        let rel = path.strip_prefix(&self.work_tree.root).map_err(|_| {
            Error::Config(format!("{} lies outside the repository", path.display()))
        })?;

        if self.is_path_clean(rel)? {
            debug!("Nothing to commit for {}", rel.display());
            return Ok(());
        }

        let staged = (|| -> Result<()> {
            let mut index = self.repo.index()?;
            if path.exists() {
                index.add_path(rel)?;
            } else {
                index.remove_path(rel)?;
            }
            index.write()?;
            self.commit_index(message)
        })();

        if staged.is_err() {
            self.reset_index();
        }

        staged
    }

    fn commit_index(&self, message: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        let parent = self.head_commit()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        self.repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        Ok(())
    }

    fn stage_all_and_commit(&self, message: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        self.commit_index(message)
    }

    fn is_path_clean(&self, rel: &Path) -> Result<bool> {
        let dirty = Status::WT_NEW
            | Status::WT_MODIFIED
            | Status::WT_DELETED
            | Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED;

        match self.repo.status_file(rel) {
            Ok(status) => Ok(!status.intersects(dirty)),
            Err(error) if error.code() == git2::ErrorCode::NotFound => Ok(true),
            Err(error) => Err(error.into()),
        }
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(head
                .target()
                .map(|oid| self.repo.find_commit(oid))
                .transpose()?),
            Err(_) => Ok(None),
        }
    }

    fn signature(&self) -> Result<git2::Signature<'static>> {
        match self.repo.signature() {
            Ok(signature) => Ok(signature),
            // No identity configured anywhere; commits still have to happen.
            Err(_) => Ok(git2::Signature::now("kubegit", "kubegit@localhost")?),
        }
    }

    fn reset_index(&self) {
        let reset = (|| -> Result<()> {
            let mut index = self.repo.index()?;
            match self.head_commit()? {
                Some(commit) => index.read_tree(&commit.tree()?)?,
                None => index.clear()?,
            }
            index.write()?;
            Ok(())
        })();

        if let Err(error) = reset {
            warn!("Failed to reset index after commit failure: {error}");
        }
    }
}

/// Builder of a [`Repository`], ending in an idempotent bootstrap.
pub struct RepositoryBuilder {
    path: PathBuf,
    branch: String,
    remote_url: Option<String>,
    context_dir: Option<PathBuf>,
    user_name: Option<String>,
    user_email: Option<String>,
}

impl RepositoryBuilder {
    /// Set the branch used for commits.
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Set the URL of the remote repository to pull from and push to.
    pub fn remote_url(mut self, url: Option<impl Into<String>>) -> Self {
        self.remote_url = url.map(Into::into);
        self
    }

    /// Set the directory inside the repository that exported files live under.
    pub fn context_dir(mut self, dir: Option<impl Into<PathBuf>>) -> Self {
        self.context_dir = dir.map(Into::into);
        self
    }

    /// Set the commit identity to configure on the repository.
    pub fn identity(
        mut self,
        name: Option<impl Into<String>>,
        email: Option<impl Into<String>>,
    ) -> Self {
        self.user_name = name.map(Into::into);
        self.user_email = email.map(Into::into);
        self
    }

    /// Open the repository, bootstrapping it when needed.
    ///
    /// If the path does not exist, the repository is cloned from the remote when one is
    /// configured and initialized empty otherwise. The commit identity and origin URL are
    /// (re)applied, the default branch is set, the context directory is created, and if no
    /// commit exists yet a README is written and committed (and pushed when a remote is
    /// configured).
    ///
    /// # Errors
    ///
    /// - Will fail if the path exists but is not a directory.
    /// - Will fail if cloning or initialization fails.
    /// - Will fail if the initial commit cannot be created or pushed.
    pub fn open(self) -> Result<Repository> {
        let auth = GitAuthenticator::default();

        match fs::metadata(&self.path) {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(Error::Config(format!("{} is not a directory", self.path.display())));
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                if let Some(url) = &self.remote_url {
                    info!("Cloning from {url} to {} ...", self.path.display());
                    let config = git2::Config::open_default()?;
                    let mut callbacks = RemoteCallbacks::new();
                    callbacks.credentials(auth.credentials(&config));
                    let mut options = FetchOptions::new();
                    options.remote_callbacks(callbacks);
                    RepoBuilder::new().fetch_options(options).clone(url, &self.path)?;
                } else {
                    info!("Initializing a new empty repository at {} ...", self.path.display());
                    fs::create_dir_all(&self.path)?;
                    let mut options = RepositoryInitOptions::new();
                    options.initial_head(&self.branch);
                    git2::Repository::init_opts(&self.path, &options)?;
                }
            }
            Err(error) => return Err(error.into()),
        }

        let repo = git2::Repository::open(&self.path)?;

        {
            let mut config = repo.config()?;
            if let Some(name) = &self.user_name {
                config.set_str("user.name", name)?;
            }
            if let Some(email) = &self.user_email {
                config.set_str("user.email", email)?;
            }
        }

        match &self.remote_url {
            Some(url) => {
                info!("Scheduling push/pull to/from remote repository {url} ...");
                match repo.find_remote("origin") {
                    Ok(_) => repo.remote_set_url("origin", url)?,
                    Err(_) => {
                        repo.remote("origin", url)?;
                    }
                }
            }
            None => info!("No remote repository configured."),
        }

        let refname = format!("refs/heads/{}", self.branch);
        repo.set_head(&refname)?;
        if repo.find_reference(&refname).is_ok() {
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))?;
        }

        let work_tree = WorkTree { root: self.path, context_dir: self.context_dir };
        let export_root = work_tree.export_root();
        match fs::metadata(&export_root) {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(Error::Config(format!(
                    "{} is not a directory",
                    export_root.display()
                )));
            }
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&export_root)?;
            }
            Err(error) => return Err(error.into()),
        }

        let repository = Repository {
            repo,
            work_tree,
            branch: self.branch,
            remote_url: self.remote_url,
            auth,
        };

        if repository.head_commit()?.is_none() {
            debug!("Creating initial commit...");
            fs::write(export_root.join("README.md"), README)?;
            repository.stage_all_and_commit("Initial commit")?;
            repository.push()?;
        }

        Ok(repository)
    }
}

/// Read-only view of the working copy: path arithmetic and the key index.
#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
    context_dir: Option<PathBuf>,
}

impl WorkTree {
    /// Construct a view over a working copy directory.
    pub fn new(root: impl Into<PathBuf>, context_dir: Option<impl Into<PathBuf>>) -> Self {
        Self { root: root.into(), context_dir: context_dir.map(Into::into) }
    }

    /// Directory that exported resources are written under.
    pub fn export_root(&self) -> PathBuf {
        match &self.context_dir {
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }

    /// Full path of the given resource in the given format.
    ///
    /// Namespaced resources live at `Namespace/<ns>/<Kind>/<name>.<ext>`, cluster-scoped ones
    /// at `<Kind>/<name>.<ext>`, both under the export root.
    pub fn path_for(&self, reference: &ResourceRef, format: Format) -> PathBuf {
        let mut path = self.export_root();
        if let Some(namespace) = reference.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            path.push("Namespace");
            path.push(namespace);
        }
        path.push(&reference.kind);
        path.push(format!("{}.{}", reference.name, format.extension()));

        path
    }

    /// Decode the resource stored at the given path.
    ///
    /// Inverse of [`WorkTree::path_for`], ignoring the payload: only the two path shapes
    /// produced by it are accepted, and the returned resource carries the reference alone.
    /// Anything under `.git/` yields [`None`].
    pub fn resource_from_path(&self, path: &Path) -> Option<ResourceRef> {
        let rel = path.strip_prefix(self.export_root()).ok()?;
        let elems: Vec<&str> = rel
            .iter()
            .map(|component| component.to_str())
            .collect::<Option<_>>()?;

        if elems.iter().any(|elem| *elem == ".git") {
            return None;
        }

        match elems.as_slice() {
            [kind, filename] => Some(ResourceRef {
                kind: (*kind).to_string(),
                namespace: None,
                name: file_stem(filename)?,
            }),
            ["Namespace", namespace, kind, filename] => Some(ResourceRef {
                kind: (*kind).to_string(),
                namespace: Some((*namespace).to_string()),
                name: file_stem(filename)?,
            }),
            _ => None,
        }
    }

    /// Keys (`"namespace/name"` or `"name"`) of every resource of the given kind on disk.
    ///
    /// This is the local half of the two-way sync: keys present here but absent from a fresh
    /// cluster list belong to objects deleted while nobody was watching. Walk errors are logged
    /// and yield an empty list.
    pub fn list_keys(&self, kind: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let result = walk(&self.export_root(), &mut |path| {
            if let Some(reference) = self.resource_from_path(path) {
                if reference.kind == kind {
                    keys.push(reference.namespaced_name());
                }
            }
        });

        if let Err(error) = result {
            error!("Failed to walk {} for kind {kind}: {error}", self.export_root().display());
            return Vec::new();
        }

        debug!("Found {} local keys for {kind}", keys.len());
        keys
    }

    /// Look up a single key of the given kind and format on disk.
    pub fn get_key(&self, kind: &str, format: Format, key: &str) -> Option<ResourceRef> {
        let reference = ResourceRef::from_key(kind, key);
        let path = self.path_for(&reference, format);
        path.exists().then_some(reference)
    }
}

fn file_stem(filename: &str) -> Option<String> {
    Path::new(filename).file_stem().and_then(|stem| stem.to_str()).map(ToString::to_string)
}

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path)) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            walk(&entry.path(), visit)?;
        } else {
            visit(&entry.path());
        }
    }

    Ok(())
}
