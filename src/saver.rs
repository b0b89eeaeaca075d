// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Single-writer saver.
//!
//! The saver is the only task that mutates the repository: the working copy, its index, and
//! `HEAD` are not safe for concurrent use, so every controller and lister funnels its output
//! through one channel into this loop. Alongside the channel, the saver drives the two remote
//! synchronization timers. Remote failures and per-resource failures are logged and never stop
//! the loop; it ends only when the channel closes.

use crate::{
    repo::{Repository, ResourceFile},
    resource::{Format, Resource},
    Result,
};

use std::{io::Write, time::Duration};
use tokio::{
    sync::mpsc,
    time::{interval, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Single consumer of the resource channel, owner of all repository mutation.
pub struct Saver {
    repository: Repository,
    format: Format,
    saved: u64,
    deleted: u64,
}

impl Saver {
    /// Construct a saver that takes ownership of the repository.
    pub fn new(repository: Repository, format: Format) -> Self {
        Self { repository, format, saved: 0, deleted: 0 }
    }

    /// Consume resources until the channel closes, pulling and pushing on the given periods.
    ///
    /// A zero period disables the corresponding timer.
    pub async fn run(
        mut self,
        mut resources: mpsc::Receiver<Resource>,
        pull_period: Duration,
        push_period: Duration,
    ) {
        let mut pull = timer(pull_period);
        let mut push = timer(push_period);

        loop {
            tokio::select! {
                _ = tick(&mut pull) => {
                    if let Err(error) = self.repository.pull() {
                        error!(
                            "Failed to pull from {}: {error}",
                            self.repository.remote_url().unwrap_or_default(),
                        );
                    }
                }
                _ = tick(&mut push) => {
                    if let Err(error) = self.repository.push() {
                        error!(
                            "Failed to push to {}: {error}",
                            self.repository.remote_url().unwrap_or_default(),
                        );
                    }
                }
                resource = resources.recv() => {
                    let Some(resource) = resource else {
                        info!(
                            "Closing! Stats: {} resources saved, and {} resources deleted.",
                            self.saved, self.deleted,
                        );
                        return;
                    };
                    self.process(resource);
                }
            }
        }
    }

    fn process(&mut self, resource: Resource) {
        if resource.exists {
            match self.save(&resource) {
                Ok(()) => self.saved += 1,
                Err(error) => error!("Failed to save {resource}: {error}"),
            }
        } else {
            match self.delete(&resource) {
                Ok(()) => self.deleted += 1,
                Err(error) => error!("Failed to delete {resource}: {error}"),
            }
        }
    }

    fn save(&self, resource: &Resource) -> Result<()> {
        debug!("Saving {resource}");

        let Some(payload) = resource.payload.as_ref() else {
            return Err(crate::Error::Export(format!("{resource} carries no payload")));
        };

        let bytes = self.format.serialize(payload)?;
        let mut file = ResourceFile::new(
            &self.repository,
            resource.reference.clone(),
            resource.status,
            self.format,
        );

        file.open()?;
        let written = file.write_all(&bytes);
        file.close()?;
        written?;

        file.commit()
    }

    fn delete(&self, resource: &Resource) -> Result<()> {
        debug!("Deleting {resource}");

        let file = ResourceFile::new(
            &self.repository,
            resource.reference.clone(),
            resource.status,
            self.format,
        );

        file.delete()?;
        file.commit()
    }
}

/// Build the optional timer for a synchronization period. Zero disables it.
fn timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }

    let mut timer = interval(period);
    // The first tick of a tokio interval fires immediately; skip it so the first pull/push
    // happens one full period after startup, and a blocked saver does not burst.
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer.reset();

    Some(timer)
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => futures::future::pending().await,
    }
}
