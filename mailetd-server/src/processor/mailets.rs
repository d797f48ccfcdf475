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
use super::{Mailet, MailetContext};
use crate::log_channels;
use mailetd_common::{
    re::{anyhow, log, serde_json},
    Address, Mail, MailState, ROOT_PROCESSOR,
};

/// attribute counting the failed remote deliveries
pub const ATTRIBUTE_REMOTE_ATTEMPTS: &str = "mailetd.remote-delivery.attempts";

fn params<T: serde::de::DeserializeOwned>(
    name: &str,
    params: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| anyhow::anyhow!("invalid parameters for mailet '{}': {}", name, e))
}

/// build a mailet from its name and parameters
///
/// # Errors
///
/// * the mailet is unknown
/// * the parameters are invalid
pub fn from_config(
    name: &str,
    parameters: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<Box<dyn Mailet>> {
    let no_params = || {
        if parameters.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("mailet '{}' takes no parameter", name))
        }
    };

    let mailet: Box<dyn Mailet> = match name {
        "Null" => no_params().map(|_| Box::new(Null))?,
        "ToProcessor" => Box::new(params::<ToProcessor>(name, parameters)?),
        "PostmasterAlias" => no_params().map(|_| Box::new(PostmasterAlias))?,
        "SetMailAttribute" => Box::new(params::<SetMailAttribute>(name, parameters)?),
        "RemoveMailAttribute" => Box::new(params::<RemoveMailAttribute>(name, parameters)?),
        "RecipientRewriteTable" => no_params().map(|_| Box::new(RecipientRewriteTable))?,
        "LocalDelivery" => Box::new(params::<LocalDelivery>(name, parameters)?),
        "RemoteDelivery" => Box::new(params::<RemoteDelivery>(name, parameters)?),
        "ToRepository" => Box::new(params::<ToRepository>(name, parameters)?),
        "FromRepository" => Box::new(params::<FromRepository>(name, parameters)?),
        "Bounce" => no_params().map(|_| Box::new(Bounce))?,
        "LogMessage" => Box::new(params::<LogMessage>(name, parameters)?),
        unknown => anyhow::bail!("unknown mailet '{}'", unknown),
    };
    Ok(mailet)
}

/// end the processing
pub struct Null;

impl Mailet for Null {
    fn name(&self) -> &str {
        "Null"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.state = MailState::Ghost;
        Ok(())
    }
}

/// send the mail to another processor
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToProcessor {
    processor: String,
    /// stored as the error message of the mail
    #[serde(default)]
    notice: Option<String>,
}

impl Mailet for ToProcessor {
    fn name(&self) -> &str {
        "ToProcessor"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        log::debug!(
            target: log_channels::PROCESSOR,
            "mail '{}' sent to processor '{}'",
            mail.name,
            self.processor
        );
        mail.state = MailState::processor(self.processor.clone());
        if let Some(notice) = &self.notice {
            mail.error_message = Some(notice.clone());
        }
        Ok(())
    }

    fn processor_targets(&self) -> Vec<&str> {
        vec![&self.processor]
    }
}

/// rewrite `postmaster@<local domain>` to the configured postmaster
pub struct PostmasterAlias;

impl Mailet for PostmasterAlias {
    fn name(&self) -> &str {
        "PostmasterAlias"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        let postmaster = context.services.postmaster();
        if !mail.recipients().iter().any(|r| {
            r.is_postmaster() && context.services.is_local_domain(r.domain()) && r != postmaster
        }) {
            return Ok(());
        }

        let recipients = mail
            .take_recipients()
            .into_iter()
            .map(|r| {
                if r.is_postmaster() && context.services.is_local_domain(r.domain()) {
                    postmaster.clone()
                } else {
                    r
                }
            })
            .collect::<Vec<_>>();
        mail.set_recipients(recipients);
        Ok(())
    }
}

/// set an attribute of the mail
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetMailAttribute {
    name: String,
    value: serde_json::Value,
}

impl Mailet for SetMailAttribute {
    fn name(&self) -> &str {
        "SetMailAttribute"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.attributes.insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// remove an attribute of the mail
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveMailAttribute {
    name: String,
}

impl Mailet for RemoveMailAttribute {
    fn name(&self) -> &str {
        "RemoveMailAttribute"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.attributes.remove(&self.name);
        Ok(())
    }
}

/// Replace the recipients having a mapping by its targets. The local
/// targets stay in the mail, a copy of the mail is spawned in the same
/// processor for the remote ones.
pub struct RecipientRewriteTable;

impl Mailet for RecipientRewriteTable {
    fn name(&self) -> &str {
        "RecipientRewriteTable"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        let mut local = vec![];
        let mut remote = vec![];
        for rcpt in mail.recipients() {
            match context.services.rrt.resolve(rcpt.local_part(), rcpt.domain())? {
                Some(targets) => {
                    log::debug!(
                        target: log_channels::PROCESSOR,
                        "mail '{}': '{}' rewritten to {:?}",
                        mail.name,
                        rcpt,
                        targets.iter().map(Address::full).collect::<Vec<_>>()
                    );
                    for target in targets {
                        if context.services.is_local_domain(target.domain()) {
                            local.push(target);
                        } else {
                            remote.push(target);
                        }
                    }
                }
                None => local.push(rcpt.clone()),
            }
        }

        if !remote.is_empty() {
            let mut forward = mail.duplicate(Mail::generate_name())?;
            forward.set_recipients(remote);
            context.send_mail(forward);
        }
        mail.set_recipients(local);
        Ok(())
    }
}

/// replace the characters which cannot be part of a repository key
fn key_part(address: &Address) -> String {
    address
        .full()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_inbox() -> String {
    "inbox".to_string()
}

/// store a copy of the mail for each recipient, then end the processing
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalDelivery {
    #[serde(default = "default_inbox")]
    repository: String,
}

impl Mailet for LocalDelivery {
    fn name(&self) -> &str {
        "LocalDelivery"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        let repository = context.services.repository(&self.repository)?;
        for rcpt in mail.recipients() {
            let mut copy = mail.duplicate(format!("{}-{}", key_part(rcpt), mail.name))?;
            copy.set_recipients([rcpt.clone()]);
            copy.state = MailState::Ghost;
            repository.store(&copy)?;
            log::info!(
                target: log_channels::PROCESSOR,
                "mail '{}' delivered to '{}'",
                mail.name,
                rcpt
            );
        }
        mail.state = MailState::Ghost;
        Ok(())
    }

    fn repositories(&self) -> Vec<&str> {
        vec![&self.repository]
    }
}

const fn default_max_retries() -> u64 {
    5
}

const fn default_retry_delay() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 60)
}

fn default_bounce_processor() -> String {
    "bounces".to_string()
}

/// Hand the mail to the delivery agent. A failed delivery is retried after
/// `delay`, up to `max_retries` times, then the mail is bounced.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteDelivery {
    #[serde(default = "default_max_retries")]
    max_retries: u64,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    delay: std::time::Duration,
    #[serde(default = "default_bounce_processor")]
    bounce_processor: String,
}

impl Mailet for RemoteDelivery {
    fn name(&self) -> &str {
        "RemoteDelivery"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        let error = match context.services.delivery.deliver(mail, mail.recipients()) {
            Ok(()) => {
                log::info!(
                    target: log_channels::PROCESSOR,
                    "mail '{}' handed to the delivery agent for {} recipient(s)",
                    mail.name,
                    mail.recipients().len()
                );
                mail.attributes.remove(ATTRIBUTE_REMOTE_ATTEMPTS);
                mail.state = MailState::Ghost;
                return Ok(());
            }
            Err(error) => error,
        };

        let attempts = mail
            .attributes
            .get(ATTRIBUTE_REMOTE_ATTEMPTS)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
            + 1;
        mail.error_message = Some(error.to_string());

        if attempts > self.max_retries {
            log::warn!(
                target: log_channels::PROCESSOR,
                "mail '{}' undeliverable after {} attempt(s): {}",
                mail.name,
                attempts,
                error
            );
            mail.attributes.remove(ATTRIBUTE_REMOTE_ATTEMPTS);
            mail.state = MailState::processor(self.bounce_processor.clone());
        } else {
            log::info!(
                target: log_channels::PROCESSOR,
                "mail '{}' delivery attempt {} failed, retry in {:?}: {}",
                mail.name,
                attempts,
                self.delay,
                error
            );
            mail.attributes
                .insert(ATTRIBUTE_REMOTE_ATTEMPTS.to_string(), attempts.into());
            mail.defer(self.delay);
        }
        Ok(())
    }

    fn processor_targets(&self) -> Vec<&str> {
        vec![&self.bounce_processor]
    }
}

/// store the mail in a repository
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToRepository {
    repository: String,
    /// keep processing the mail after storing it
    #[serde(default)]
    pass_through: bool,
}

impl Mailet for ToRepository {
    fn name(&self) -> &str {
        "ToRepository"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        context.services.repository(&self.repository)?.store(mail)?;
        log::info!(
            target: log_channels::PROCESSOR,
            "mail '{}' stored in repository '{}'",
            mail.name,
            self.repository
        );
        if !self.pass_through {
            mail.state = MailState::Ghost;
        }
        Ok(())
    }

    fn repositories(&self) -> Vec<&str> {
        vec![&self.repository]
    }
}

const fn default_true() -> bool {
    true
}

/// spawn every mail of a repository in a processor
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FromRepository {
    repository: String,
    #[serde(default = "FromRepository::default_processor")]
    processor: String,
    /// remove the mails from the repository
    #[serde(default = "default_true")]
    delete: bool,
}

impl FromRepository {
    fn default_processor() -> String {
        ROOT_PROCESSOR.to_string()
    }
}

impl Mailet for FromRepository {
    fn name(&self) -> &str {
        "FromRepository"
    }

    fn service(&self, _: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        let repository = context.services.repository(&self.repository)?.clone();
        for key in repository.list()? {
            let mut replayed = match repository.retrieve(&key)? {
                Some(mail) => mail,
                None => continue,
            };
            replayed.materialize()?;
            replayed.state = MailState::processor(self.processor.clone());
            replayed.error_message = None;
            if self.delete {
                context.remove_once_enqueued(&replayed, repository.clone(), key);
            }
            context.send_mail(replayed);
        }
        Ok(())
    }

    fn processor_targets(&self) -> Vec<&str> {
        vec![&self.processor]
    }

    fn repositories(&self) -> Vec<&str> {
        vec![&self.repository]
    }
}

/// Send a delivery status notification to the sender, then end the
/// processing. A bounce is never bounced.
pub struct Bounce;

impl Bounce {
    fn notification(mail: &Mail, sender: &Address, domain: &str) -> anyhow::Result<Mail> {
        let content = mail.content()?;
        let headers_end = content
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(content.len(), |i| i + 2);

        let body = format!(
            "From: MAILER-DAEMON@{domain}\r\n\
            To: {sender}\r\n\
            Subject: Undelivered Mail Returned to Sender\r\n\
            Auto-Submitted: auto-replied\r\n\
            \r\n\
            This is the mail system at host {domain}.\r\n\
            \r\n\
            Your message could not be delivered to the following recipient(s):\r\n\
            {recipients}\r\n\
            Reason: {reason}\r\n\
            \r\n\
            --- Headers of the original message ---\r\n\
            {headers}",
            recipients = mail
                .recipients()
                .iter()
                .map(|r| format!("  <{r}>\r\n"))
                .collect::<String>(),
            reason = mail.error_message.as_deref().unwrap_or("unknown"),
            headers = String::from_utf8_lossy(&content[..headers_end]),
        );

        let mut notification = Mail::new(
            Mail::generate_name(),
            None,
            [sender.clone()],
            body.into_bytes(),
        );
        notification.remote_addr = mail.remote_addr;
        notification.remote_host = mail.remote_host.clone();
        Ok(notification)
    }
}

impl Mailet for Bounce {
    fn name(&self) -> &str {
        "Bounce"
    }

    fn service(&self, mail: &mut Mail, context: &mut MailetContext<'_>) -> anyhow::Result<()> {
        match &mail.sender {
            Some(sender) => {
                let notification =
                    Self::notification(mail, sender, &context.config().server.domain)?;
                log::info!(
                    target: log_channels::PROCESSOR,
                    "mail '{}' bounced to '{}' as '{}'",
                    mail.name,
                    sender,
                    notification.name
                );
                context.send_mail(notification);
            }
            None => log::warn!(
                target: log_channels::PROCESSOR,
                "mail '{}' has a null sender, the bounce is dropped",
                mail.name
            ),
        }
        mail.state = MailState::Ghost;
        Ok(())
    }
}

/// log the envelope of the mail
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogMessage {
    #[serde(default)]
    comment: Option<String>,
}

impl Mailet for LogMessage {
    fn name(&self) -> &str {
        "LogMessage"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        log::info!(
            target: mailetd_config::log_channel::MAILET,
            "{}name='{}' sender='{}' recipients={:?} state='{}' error={:?}",
            self.comment
                .as_ref()
                .map_or_else(String::new, |c| format!("{c}: ")),
            mail.name,
            mail.sender
                .as_ref()
                .map_or_else(|| "<>".to_string(), ToString::to_string),
            mail.recipients().iter().map(Address::full).collect::<Vec<_>>(),
            mail.state,
            mail.error_message
        );
        Ok(())
    }
}
