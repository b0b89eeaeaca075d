// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! One-shot export lister.
//!
//! The lister is the non-watching half of the export command: list one kind once, sanitize
//! each item, and publish everything as `sync` records. Errors abort the lister; the
//! supervisor aggregates them across kinds.

use crate::{
    cluster::KindSource,
    labels::Selector,
    resource::{Resource, ResourceRef, ResourceStatus},
    sanitize::{Sanitize, SanitizeError},
    Error, Result,
};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

/// One-shot pipeline for a single kind.
pub struct ExportLister {
    source: Arc<dyn KindSource>,
    sanitizer: Arc<dyn Sanitize>,
    selector: Selector,
    resources: mpsc::Sender<Resource>,
}

impl ExportLister {
    /// Construct a lister for one kind.
    ///
    /// The selector must already be composed from the user selector and the kind's built-in
    /// requirements.
    pub fn new(
        source: Arc<dyn KindSource>,
        sanitizer: Arc<dyn Sanitize>,
        selector: Selector,
        resources: mpsc::Sender<Resource>,
    ) -> Self {
        Self { source, sanitizer, selector, resources }
    }

    /// List the kind and publish every surviving item with status `sync`.
    ///
    /// # Errors
    ///
    /// - Will fail if the list call fails.
    /// - Will fail if any item fails to sanitize for a reason other than omission.
    #[instrument(skip(self), fields(kind = %self.source.kind()))]
    pub async fn list(self) -> Result<()> {
        let kind = self.source.kind().to_string();
        info!("Listing {kind}s...");

        let (items, _) = self.source.list(&self.selector).await?;
        debug!("Found {} items for {kind}", items.len());

        for mut object in items {
            let reference = ResourceRef::from_object(&kind, &object);

            match self.sanitizer.sanitize(&mut object) {
                Ok(()) => {}
                Err(SanitizeError::Omit) => {
                    debug!("Ignoring {reference}");
                    continue;
                }
                Err(SanitizeError::Failed(reason)) => {
                    return Err(Error::Sanitize { reference: reference.to_string(), reason });
                }
            }

            let resource = Resource {
                reference,
                payload: Some(object),
                exists: true,
                status: ResourceStatus::Sync,
            };
            debug!("Processing {resource}");
            if self.resources.send(resource).await.is_err() {
                // Receiver is gone; nothing left to publish to.
                return Ok(());
            }
        }

        Ok(())
    }
}
