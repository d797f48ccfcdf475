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
use crate::{Address, Mail, MailRepository};

/// Hand a mail to the outside world (SMTP client, relay, ...).
pub trait DeliveryAgent: Send + Sync {
    /// deliver `mail` to `recipients`
    ///
    /// # Errors
    ///
    /// * the delivery failed, it may succeed later
    fn deliver(&self, mail: &Mail, recipients: &[Address]) -> anyhow::Result<()>;
}

/// Delivery agent writing the outgoing mails in a repository, picked up
/// by an external relay.
pub struct RepositoryDeliveryAgent {
    repository: std::sync::Arc<dyn MailRepository>,
}

impl RepositoryDeliveryAgent {
    ///
    #[must_use]
    pub fn new(repository: std::sync::Arc<dyn MailRepository>) -> Self {
        Self { repository }
    }
}

impl DeliveryAgent for RepositoryDeliveryAgent {
    fn deliver(&self, mail: &Mail, recipients: &[Address]) -> anyhow::Result<()> {
        let mut outgoing = mail.duplicate(Mail::generate_name())?;
        outgoing.set_recipients(recipients.iter().cloned());
        self.repository.store(&outgoing)
    }
}

/// Delivery agent used when remote delivery is not configured.
#[derive(Debug, Default)]
pub struct NoDeliveryAgent;

impl DeliveryAgent for NoDeliveryAgent {
    fn deliver(&self, _: &Mail, recipients: &[Address]) -> anyhow::Result<()> {
        anyhow::bail!(
            "remote delivery is not configured, cannot deliver to {} recipient(s)",
            recipients.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DeliveryAgent, NoDeliveryAgent, RepositoryDeliveryAgent};
    use crate::{Mail, MailRepository, MemoryMailRepository};

    #[test]
    fn repository() {
        let repository = std::sync::Arc::new(MemoryMailRepository::default());
        let agent = RepositoryDeliveryAgent::new(repository.clone());

        let mail = Mail::new(
            "m1",
            None,
            [
                "a@remote.org".parse().unwrap(),
                "b@remote.org".parse().unwrap(),
            ],
            b"hello".to_vec(),
        );
        agent
            .deliver(&mail, &["b@remote.org".parse().unwrap()])
            .unwrap();

        let keys = repository.list().unwrap();
        assert_eq!(keys.len(), 1);
        let stored = repository.retrieve(&keys[0]).unwrap().unwrap();
        assert_eq!(
            stored.recipients(),
            &["b@remote.org".parse::<crate::Address>().unwrap()]
        );
    }

    #[test]
    fn none() {
        let mail = Mail::new("m1", None, ["a@remote.org".parse().unwrap()], vec![]);
        assert!(NoDeliveryAgent.deliver(&mail, mail.recipients()).is_err());
    }
}
