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
use mailetd_common::{
    re::anyhow, Address, DeliveryAgent, FileMailRepository, MailRepository,
    MemoryRecipientRewriteTable, MemoryUsersRepository, NoDeliveryAgent, RecipientRewriteTable,
    RepositoryDeliveryAgent, UsersRepository,
};
use mailetd_config::Config;

/// name of the repository used by the default delivery agent
pub const OUTGOING_REPOSITORY: &str = "outgoing";

/// The collaborators shared by the receiver and the processing pipeline
pub struct Services {
    /// server's configuration
    pub config: std::sync::Arc<Config>,
    /// users allowed to authenticate and to receive mails
    pub users: std::sync::Arc<dyn UsersRepository>,
    /// aliases and forwards
    pub rrt: std::sync::Arc<dyn RecipientRewriteTable>,
    /// remote delivery
    pub delivery: std::sync::Arc<dyn DeliveryAgent>,
    repositories: std::collections::BTreeMap<String, std::sync::Arc<dyn MailRepository>>,
    local_domains: Vec<String>,
    postmaster: Address,
}

impl Services {
    ///
    /// # Errors
    ///
    /// * the postmaster is not a valid address
    pub fn new(
        config: std::sync::Arc<Config>,
        users: std::sync::Arc<dyn UsersRepository>,
        rrt: std::sync::Arc<dyn RecipientRewriteTable>,
        delivery: std::sync::Arc<dyn DeliveryAgent>,
        repositories: std::collections::BTreeMap<String, std::sync::Arc<dyn MailRepository>>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            local_domains: config
                .local_domains()
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            postmaster: config.postmaster()?,
            config,
            users,
            rrt,
            delivery,
            repositories,
        })
    }

    /// build the collaborators described in the configuration: users and
    /// mappings in memory, a file repository for each configured directory,
    /// and a delivery agent writing in the `outgoing` repository if any.
    ///
    /// # Errors
    ///
    /// * a repository directory cannot be created
    /// * the postmaster is not a valid address
    pub fn from_config(config: std::sync::Arc<Config>) -> anyhow::Result<Self> {
        let repositories = config
            .app
            .repositories
            .iter()
            .map(|(name, dirpath)| {
                FileMailRepository::new(dirpath).map(|r| {
                    (
                        name.clone(),
                        std::sync::Arc::new(r) as std::sync::Arc<dyn MailRepository>,
                    )
                })
            })
            .collect::<anyhow::Result<std::collections::BTreeMap<_, _>>>()?;

        let delivery: std::sync::Arc<dyn DeliveryAgent> =
            match repositories.get(OUTGOING_REPOSITORY) {
                Some(outgoing) => std::sync::Arc::new(RepositoryDeliveryAgent::new(outgoing.clone())),
                None => std::sync::Arc::new(NoDeliveryAgent),
            };

        Self::new(
            config.clone(),
            std::sync::Arc::new(MemoryUsersRepository::new(config.app.users.clone())),
            std::sync::Arc::new(MemoryRecipientRewriteTable::new(
                config.app.mappings.clone(),
            )),
            delivery,
            repositories,
        )
    }

    /// is the domain served by this instance
    #[must_use]
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.local_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }

    /// address receiving the mails sent to any `postmaster@<local domain>`
    #[must_use]
    pub const fn postmaster(&self) -> &Address {
        &self.postmaster
    }

    /// the repository registered under `name`
    ///
    /// # Errors
    ///
    /// * there is no such repository
    pub fn repository(&self, name: &str) -> anyhow::Result<&std::sync::Arc<dyn MailRepository>> {
        self.repositories
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("repository '{}' is not configured", name))
    }

    /// names of the repositories
    pub fn repository_names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    /// is `address` a user of this instance
    ///
    /// # Errors
    ///
    /// * the users repository or the rewrite table is unavailable
    pub fn is_local_user(&self, address: &Address) -> anyhow::Result<bool> {
        if address.is_postmaster() {
            return Ok(true);
        }
        Ok(self.users.exists(address.full())?
            || self.users.exists(address.local_part())?
            || self
                .rrt
                .resolve(address.local_part(), address.domain())?
                .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::Services;
    use mailetd_common::Address;
    use mailetd_config::Config;

    #[test]
    fn from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.domain = "testserver.com".to_string();
        config.server.smtp.local_domains = vec!["testserver.com".to_string(), "Example.com".to_string()];
        config.app.repositories = [("error", "error"), ("outgoing", "outgoing")]
            .into_iter()
            .map(|(name, path)| (name.to_string(), dir.path().join(path)))
            .collect();
        config.app.users.insert("alice".to_string(), "secret".to_string());
        config.app.mappings.insert(
            "sales@testserver.com".to_string(),
            vec!["alice@testserver.com".to_string()],
        );

        let services = Services::from_config(std::sync::Arc::new(config)).unwrap();
        assert!(services.is_local_domain("example.COM"));
        assert!(!services.is_local_domain("remote.org"));
        assert_eq!(services.postmaster().full(), "postmaster@testserver.com");
        assert!(services.repository("error").is_ok());
        assert!(services.repository("inbox").is_err());
        assert!(dir.path().join("outgoing").exists());

        for (address, expected) in [
            ("alice@testserver.com", true),
            ("sales@testserver.com", true),
            ("PostMaster@testserver.com", true),
            ("bob@testserver.com", false),
        ] {
            assert_eq!(
                services
                    .is_local_user(&address.parse::<Address>().unwrap())
                    .unwrap(),
                expected,
                "{address}"
            );
        }
    }
}
