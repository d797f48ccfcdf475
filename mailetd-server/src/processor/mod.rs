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
use crate::{log_channels, services::Services};
use mailetd_common::{
    re::{anyhow, log},
    Address, Mail, MailRepository, MailState, ERROR_PROCESSOR, GHOST, ROOT_PROCESSOR,
};
use mailetd_config::Config;

/// Mailets built from the configuration
pub mod mailets;
/// Matchers built from the configuration
pub mod matchers;

/// A stored mail to remove once the mail replayed from it is in the queue
pub struct PendingRemoval {
    /// name of the replayed mail
    pub spawned: String,
    ///
    pub repository: std::sync::Arc<dyn MailRepository>,
    ///
    pub key: String,
}

/// What a matcher or a mailet can reach while servicing a mail
pub struct MailetContext<'a> {
    /// collaborators
    pub services: &'a Services,
    spawned: Vec<Mail>,
    removals: Vec<PendingRemoval>,
}

impl<'a> MailetContext<'a> {
    ///
    #[must_use]
    pub const fn new(services: &'a Services) -> Self {
        Self {
            services,
            spawned: vec![],
            removals: vec![],
        }
    }

    ///
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.services.config
    }

    /// hand a new mail to the spool, it is enqueued once the current mail
    /// has been processed
    pub fn send_mail(&mut self, mail: Mail) {
        log::debug!(
            target: log_channels::PROCESSOR,
            "mail '{}' spawned in state '{}'",
            mail.name,
            mail.state
        );
        self.spawned.push(mail);
    }

    /// the mails spawned so far
    pub fn take_spawned(&mut self) -> Vec<Mail> {
        std::mem::take(&mut self.spawned)
    }

    /// remove `key` from `repository` after `spawned` has been enqueued
    pub fn remove_once_enqueued(
        &mut self,
        spawned: &Mail,
        repository: std::sync::Arc<dyn MailRepository>,
        key: String,
    ) {
        self.removals.push(PendingRemoval {
            spawned: spawned.name.clone(),
            repository,
            key,
        });
    }

    /// the removals waiting for their mail to be enqueued
    pub fn take_removals(&mut self) -> Vec<PendingRemoval> {
        std::mem::take(&mut self.removals)
    }
}

/// Select the recipients a mailet applies to
pub trait Matcher: Send + Sync {
    /// a subset of `mail.recipients()`, empty if the mailet must be skipped
    ///
    /// # Errors
    ///
    /// * a collaborator failed
    fn match_mail(&self, mail: &Mail, context: &MailetContext<'_>) -> anyhow::Result<Vec<Address>>;
}

/// Act on a mail whose recipients are the ones selected by the matcher
pub trait Mailet: Send + Sync {
    /// name used in the logs
    fn name(&self) -> &str;

    /// change the state to send the mail to another processor, or to
    /// [`MailState::Ghost`] to end its processing
    ///
    /// # Errors
    ///
    /// * the mail cannot be processed, it is sent to the error processor
    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()>;

    /// processors this mailet may send mails to
    fn processor_targets(&self) -> Vec<&str> {
        vec![]
    }

    /// repositories this mailet uses
    fn repositories(&self) -> Vec<&str> {
        vec![]
    }
}

/// Why a mail could not go through a processor
#[derive(Debug)]
pub enum PipelineError {
    /// the state of the mail names no processor
    UnknownProcessor(String),
    /// a matcher failed
    Matcher {
        ///
        processor: String,
        ///
        matcher: String,
        ///
        error: anyhow::Error,
    },
    /// a mailet failed
    Mailet {
        ///
        processor: String,
        ///
        mailet: String,
        ///
        error: anyhow::Error,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProcessor(name) => write!(f, "there is no processor named '{name}'"),
            Self::Matcher {
                processor,
                matcher,
                error,
            } => write!(f, "matcher '{matcher}' of processor '{processor}' failed: {error}"),
            Self::Mailet {
                processor,
                mailet,
                error,
            } => write!(f, "mailet '{mailet}' of processor '{processor}' failed: {error}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// A matcher and the mailet it guards
pub struct ProcessorEntry {
    matcher_name: String,
    matcher: Box<dyn Matcher>,
    mailet: Box<dyn Mailet>,
}

impl ProcessorEntry {
    ///
    #[must_use]
    pub fn new(
        matcher_name: impl Into<String>,
        matcher: Box<dyn Matcher>,
        mailet: Box<dyn Mailet>,
    ) -> Self {
        Self {
            matcher_name: matcher_name.into(),
            matcher,
            mailet,
        }
    }
}

/// A named list of (matcher, mailet)
pub struct Processor {
    name: String,
    state: MailState,
    entries: Vec<ProcessorEntry>,
}

impl Processor {
    ///
    #[must_use]
    pub fn new(name: impl Into<String>, entries: Vec<ProcessorEntry>) -> Self {
        let name = name.into();
        Self {
            state: MailState::processor(name.clone()),
            name,
            entries,
        }
    }

    ///
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply each mailet to the recipients selected by its matcher, until a
    /// mailet changes the state of the mail or defers it. The recipients the
    /// mailet did not see are put back, or split into the original mail if
    /// the matched ones left the processor. A mail reaching the end of the
    /// list is ghosted.
    ///
    /// # Errors
    ///
    /// * a matcher or a mailet failed, the recipients are left untouched
    pub fn service(
        &self,
        mail: &mut Mail,
        context: &mut MailetContext<'_>,
    ) -> Result<(), PipelineError> {
        for entry in &self.entries {
            if mail.state != self.state || mail.is_deferred() {
                return Ok(());
            }

            let matched = entry
                .matcher
                .match_mail(mail, context)
                .map_err(|error| PipelineError::Matcher {
                    processor: self.name.clone(),
                    matcher: entry.matcher_name.clone(),
                    error,
                })?;

            let all = mail.recipients().to_vec();
            let (matched, unmatched): (Vec<_>, Vec<_>) =
                all.iter().cloned().partition(|r| matched.contains(r));
            if matched.is_empty() {
                continue;
            }

            log::trace!(
                target: log_channels::PROCESSOR,
                "[{}] mail '{}': '{}' matched {} recipient(s), calling '{}'",
                self.name,
                mail.name,
                entry.matcher_name,
                matched.len(),
                entry.mailet.name()
            );

            mail.set_recipients(matched);
            if let Err(error) = entry.mailet.service(mail, context) {
                mail.set_recipients(all);
                return Err(PipelineError::Mailet {
                    processor: self.name.clone(),
                    mailet: entry.mailet.name().to_string(),
                    error,
                });
            }

            if unmatched.is_empty() {
                continue;
            }
            if mail.state == self.state && !mail.is_deferred() {
                for rcpt in unmatched {
                    mail.add_recipient(rcpt);
                }
                continue;
            }

            // the matched recipients left the processor, the others stay
            if !mail.state.is_ghost() && !mail.recipients().is_empty() {
                let split_name = format!(
                    "{}-{}",
                    mail.name,
                    std::iter::repeat_with(fastrand::alphanumeric)
                        .take(6)
                        .collect::<String>()
                );
                let split = mail
                    .duplicate(split_name)
                    .map_err(|error| PipelineError::Mailet {
                        processor: self.name.clone(),
                        mailet: entry.mailet.name().to_string(),
                        error,
                    })?;
                context.send_mail(split);
            }
            mail.state = self.state.clone();
            mail.take_deferred();
            mail.set_recipients(unmatched);
        }

        if mail.state == self.state && !mail.is_deferred() {
            log::debug!(
                target: log_channels::PROCESSOR,
                "[{}] mail '{}' reached the end of the processor",
                self.name,
                mail.name
            );
            mail.state = MailState::Ghost;
        }
        Ok(())
    }
}

/// The processors, routed by the state of the mails
pub struct Pipeline {
    processors: std::collections::HashMap<String, Processor>,
}

impl Pipeline {
    /// A (All, PostmasterAlias) entry is inserted at the head of `root`.
    ///
    /// # Errors
    ///
    /// * a processor is defined twice, or named `ghost`
    /// * `root` or `error` is missing
    /// * a mailet sends mails to a processor which does not exist
    pub fn new(processors: Vec<Processor>) -> anyhow::Result<Self> {
        let mut by_name = std::collections::HashMap::new();
        for mut processor in processors {
            if processor.name.is_empty() || processor.name == GHOST {
                anyhow::bail!("'{}' is not a valid processor name", processor.name);
            }
            if processor.name == ROOT_PROCESSOR {
                processor.entries.insert(
                    0,
                    ProcessorEntry::new(
                        "All",
                        Box::new(matchers::All),
                        Box::new(mailets::PostmasterAlias),
                    ),
                );
            }
            if let Some(processor) = by_name.insert(processor.name.clone(), processor) {
                anyhow::bail!("processor '{}' is defined twice", processor.name);
            }
        }

        for required in [ROOT_PROCESSOR, ERROR_PROCESSOR] {
            if !by_name.contains_key(required) {
                anyhow::bail!("the '{}' processor is missing", required);
            }
        }

        for processor in by_name.values() {
            for entry in &processor.entries {
                for target in entry.mailet.processor_targets() {
                    if target != GHOST && !by_name.contains_key(target) {
                        anyhow::bail!(
                            "mailet '{}' of processor '{}' targets the unknown processor '{}'",
                            entry.mailet.name(),
                            processor.name,
                            target
                        );
                    }
                }
            }
        }

        Ok(Self {
            processors: by_name,
        })
    }

    /// build the processors of `app.processors`
    ///
    /// # Errors
    ///
    /// * a matcher or a mailet is unknown or badly configured
    /// * a mailet uses a repository which is not configured
    /// * see [`Pipeline::new`]
    pub fn from_config(config: &Config, services: &Services) -> anyhow::Result<Self> {
        let processors = config
            .app
            .processors
            .iter()
            .map(|processor| {
                processor
                    .mailets
                    .iter()
                    .map(|stage| {
                        let matcher = matchers::from_spec(&stage.matcher)?;
                        let mailet = mailets::from_config(&stage.mailet, &stage.params)?;
                        for repository in mailet.repositories() {
                            services.repository(repository).map_err(|e| {
                                anyhow::anyhow!(
                                    "mailet '{}' of processor '{}': {}",
                                    stage.mailet,
                                    processor.name,
                                    e
                                )
                            })?;
                        }
                        Ok(ProcessorEntry::new(stage.matcher.clone(), matcher, mailet))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map(|entries| Processor::new(processor.name.clone(), entries))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Self::new(processors)
    }

    ///
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// run the mail through the processor named by its state
    ///
    /// # Errors
    ///
    /// * the state names no processor
    /// * see [`Processor::service`]
    pub fn service(
        &self,
        mail: &mut Mail,
        context: &mut MailetContext<'_>,
    ) -> Result<(), PipelineError> {
        let name = match mail.state.processor_name() {
            Some(name) => name,
            None => return Ok(()),
        };
        match self.processors.get(name) {
            Some(processor) => processor.service(mail, context),
            None => Err(PipelineError::UnknownProcessor(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests;
