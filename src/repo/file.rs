// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scoped writer and committer for a single resource file.

use crate::{
    repo::Repository,
    resource::{Format, ResourceRef, ResourceStatus},
    Result,
};

use std::{
    fs::{self, File},
    io::{self, Write},
    path::PathBuf,
};

/// A single resource file inside the working copy.
///
/// Upserts go through `open`, a streamed write, `close`, then `commit`. Deletions go through
/// `delete`, then `commit`. The commit stages exactly this file and nothing else.
pub struct ResourceFile<'repo> {
    repository: &'repo Repository,
    reference: ResourceRef,
    status: ResourceStatus,
    path: PathBuf,
    file: Option<File>,
}

impl<'repo> ResourceFile<'repo> {
    /// Construct the file handle for the given resource in the given format.
    pub fn new(
        repository: &'repo Repository,
        reference: ResourceRef,
        status: ResourceStatus,
        format: Format,
    ) -> Self {
        let path = repository.work_tree().path_for(&reference, format);
        Self { repository, reference, status, path, file: None }
    }

    /// Create or truncate the file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Will fail if the parent directories or the file cannot be created.
    pub fn open(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.file = Some(File::create(&self.path)?);

        Ok(())
    }

    /// Flush and release the file handle.
    ///
    /// # Errors
    ///
    /// - Will fail if buffered data cannot be flushed.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        Ok(())
    }

    /// Remove the file from the working copy. A missing file is success.
    ///
    /// # Errors
    ///
    /// - Will fail if the file exists but cannot be removed.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    /// Commit the file (or its removal) with a `"<status> <kind> <ns/name>"` message.
    ///
    /// No-op when the file is unchanged relative to the index. On commit failure the index is
    /// reset to `HEAD` so no partial stage survives.
    ///
    /// # Errors
    ///
    /// - Will fail if staging or committing fails.
    pub fn commit(&self) -> Result<()> {
        let message = format!("{} {}", self.status, self.reference);
        self.repository.commit_file(&self.path, &message)
    }
}

impl Write for ResourceFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "resource file is not open")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
