/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::{
    log_channels,
    processor::{MailetContext, PendingRemoval, Pipeline},
    services::Services,
    spool::{MailQueue, QueueError, QueueItem},
};
use mailetd_common::{
    re::{anyhow, log},
    Mail, MailState,
};

/// Workers moving the mails of the queue through the processors.
pub struct SpoolManager {
    queue: std::sync::Arc<MailQueue>,
    pipeline: std::sync::Arc<Pipeline>,
    services: std::sync::Arc<Services>,
}

impl SpoolManager {
    ///
    #[must_use]
    pub fn new(
        queue: std::sync::Arc<MailQueue>,
        pipeline: std::sync::Arc<Pipeline>,
        services: std::sync::Arc<Services>,
    ) -> Self {
        Self {
            queue,
            pipeline,
            services,
        }
    }

    /// run `server.queues.workers` workers until `shutdown` is set or the
    /// queue is closed
    ///
    /// # Errors
    ///
    /// * a worker panicked
    pub async fn run(
        self: std::sync::Arc<Self>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let workers = (0..self.services.config.server.queues.workers)
            .map(|id| tokio::spawn(self.clone().worker(id, shutdown.clone())))
            .collect::<Vec<_>>();

        for worker in workers {
            worker.await?;
        }
        log::info!(target: log_channels::SPOOL, "every spool worker stopped");
        Ok(())
    }

    async fn worker(
        self: std::sync::Arc<Self>,
        id: usize,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        log::debug!(target: log_channels::SPOOL, "worker #{id} started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let item = tokio::select! {
                item = self.queue.dequeue() => item,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match item {
                Ok(item) => self.handle(item),
                Err(QueueError::Closed) => break,
                Err(error) => {
                    log::error!(target: log_channels::SPOOL, "worker #{id}: {error}");
                    tokio::time::sleep(self.services.config.server.queues.requeue_delay).await;
                }
            }
        }
        log::debug!(target: log_channels::SPOOL, "worker #{id} stopped");
    }

    /// Process a dequeued mail, enqueue the mails it spawned, then
    /// acknowledge it or put it back in the queue.
    pub fn handle(&self, item: QueueItem) {
        let QueueItem { mut mail, handle } = item;
        let original = mail.clone();
        let mut context = MailetContext::new(&self.services);
        self.process(&mut mail, &mut context);
        let removals = context.take_removals();

        for mut child in context.take_spawned() {
            if !(child.state.is_ghost() || child.recipients().is_empty()) {
                let delay = child.take_deferred();
                if let Err(error) = self.queue.enqueue(&child, delay) {
                    log::error!(
                        target: log_channels::SPOOL,
                        "mail '{}' spawned by '{}' cannot be enqueued, '{}' will be processed again: {}",
                        child.name,
                        mail.name,
                        mail.name,
                        error
                    );
                    let delay = Some(self.services.config.server.queues.requeue_delay);
                    if let Err(error) = self.queue.requeue(&handle, &original, delay) {
                        log::error!(target: log_channels::SPOOL, "{error}");
                    }
                    return;
                }
            }
            Self::apply_removals(&removals, &child.name);
        }

        let result = if mail.state.is_ghost() || mail.recipients().is_empty() {
            log::debug!(
                target: log_channels::SPOOL,
                "mail '{}' processed, removed from the queue",
                mail.name
            );
            self.queue.ack(&handle)
        } else {
            let delay = mail
                .take_deferred()
                .unwrap_or(self.services.config.server.queues.requeue_delay);
            log::debug!(
                target: log_channels::SPOOL,
                "mail '{}' requeued in state '{}', delay={:?}",
                mail.name,
                mail.state,
                delay
            );
            self.queue.requeue(&handle, &mail, Some(delay))
        };

        if let Err(error) = result {
            log::error!(target: log_channels::SPOOL, "{error}");
        }
    }

    /// Run the mail through the processors until it is ghosted, deferred or
    /// has no recipient left. A failure sends the mail to the `error`
    /// processor, any later failure ghosts it.
    ///
    /// The mails spawned on the way are left in `context`.
    pub fn process(&self, mail: &mut Mail, context: &mut MailetContext<'_>) {
        let max_hops = self.services.config.server.queues.max_processor_hops;
        let mut hops = 0;
        let mut failed = mail.state == MailState::error();

        while !mail.state.is_ghost() && !mail.is_deferred() && !mail.recipients().is_empty() {
            hops += 1;
            let failure = if hops > max_hops {
                Some(format!(
                    "mail went through more than {max_hops} processors, is there a loop ?"
                ))
            } else {
                self.pipeline
                    .service(mail, context)
                    .err()
                    .map(|error| error.to_string())
            };

            if let Some(error) = failure {
                mail.take_deferred();
                if failed {
                    log::error!(
                        target: log_channels::SPOOL,
                        "mail '{}' failed again in state '{}', dropped: {}",
                        mail.name,
                        mail.state,
                        error
                    );
                    mail.state = MailState::Ghost;
                } else {
                    log::warn!(
                        target: log_channels::SPOOL,
                        "mail '{}' failed in state '{}', sent to the error processor: {}",
                        mail.name,
                        mail.state,
                        error
                    );
                    mail.state = MailState::error();
                    failed = true;
                    hops = 0;
                }
                mail.error_message = Some(error);
            }
        }
    }

    /// drop the stored copies of a mail now held by the queue
    fn apply_removals(removals: &[PendingRemoval], spawned: &str) {
        for removal in removals.iter().filter(|r| r.spawned == spawned) {
            if let Err(error) = removal.repository.remove(&removal.key) {
                log::warn!(
                    target: log_channels::SPOOL,
                    "mail '{}' is queued but stays in its repository: {}",
                    removal.key,
                    error
                );
            }
        }
    }
}
