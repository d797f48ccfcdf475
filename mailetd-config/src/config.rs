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
#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]
use mailetd_common::{re::serde_json, CodeID, Mechanism, Reply};

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(
        serialize_with = "crate::parser::semver::serialize",
        deserialize_with = "crate::parser::semver::deserialize"
    )]
    pub version_requirement: semver::VersionReq,
    #[serde(default)]
    pub server: ConfigServer,
    #[serde(default)]
    pub app: ConfigApp,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServer {
    #[serde(default = "ConfigServer::hostname")]
    pub domain: String,
    /// -1 for no limit
    #[serde(default = "ConfigServer::default_client_count_max")]
    pub client_count_max: i64,
    /// -1 for no limit
    #[serde(default = "ConfigServer::default_client_count_max")]
    pub client_count_max_per_ip: i64,
    #[serde(default)]
    pub system: ConfigServerSystem,
    #[serde(default)]
    pub interfaces: ConfigServerInterfaces,
    #[serde(default)]
    pub logs: ConfigServerLogs,
    #[serde(default)]
    pub queues: ConfigServerQueues,
    #[serde(default)]
    pub smtp: ConfigServerSMTP,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSystem {
    #[serde(default)]
    pub thread_pool: ConfigServerSystemThreadPool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSystemThreadPool {
    pub receiver: usize,
    pub processing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerInterfaces {
    #[serde(deserialize_with = "crate::parser::socket_addr::deserialize")]
    pub addr: Vec<std::net::SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerLogs {
    pub filepath: std::path::PathBuf,
    pub format: String,
    pub level: std::collections::BTreeMap<String, mailetd_common::re::log::LevelFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerQueues {
    pub dirpath: std::path::PathBuf,
    /// number of spool workers
    pub workers: usize,
    /// time after which a dequeued but unacknowledged mail is visible again
    #[serde(with = "humantime_serde")]
    pub lease: std::time::Duration,
    /// delay before a mail which has not reached a terminal state is processed again
    #[serde(with = "humantime_serde")]
    pub requeue_delay: std::time::Duration,
    /// number of processors a mail can go through in a single spool pass
    pub max_processor_hops: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTPError {
    pub soft_count: i64,
    pub hard_count: i64,
    #[serde(with = "humantime_serde")]
    pub delay: std::time::Duration,
}

/// Is the client required to authenticate
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// AUTH is neither announced nor accepted
    Disabled,
    /// AUTH is announced, relaying requires it (or an authorized network)
    Required,
    /// AUTH is announced and accepted, relaying only depends on the network
    Announce,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTPAuth {
    pub mode: AuthMode,
    pub mechanisms: Vec<Mechanism>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTP {
    #[serde(default = "ConfigServerSMTP::default_rcpt_count_max")]
    pub rcpt_count_max: usize,
    #[serde(default = "ConfigServerSMTP::default_message_size_max")]
    pub message_size_max: usize,
    /// including the trailing `\r\n`
    #[serde(default = "ConfigServerSMTP::default_line_length_max")]
    pub line_length_max: usize,
    /// domains delivered locally, the server's domain if empty
    #[serde(default)]
    pub local_domains: Vec<String>,
    /// `postmaster@{domain}` if not set
    #[serde(default)]
    pub postmaster: Option<String>,
    /// clients allowed to relay without authentication
    #[serde(default = "ConfigServerSMTP::default_authorized_networks")]
    pub authorized_networks: Vec<ipnet::IpNet>,
    /// reject a sender of a local domain which is not the authenticated user
    #[serde(default = "ConfigServerSMTP::default_verify_identity")]
    pub verify_identity: bool,
    /// commands removed from the dispatcher
    #[serde(default)]
    pub disabled_commands: Vec<String>,
    /// idle time after which the connection is closed
    #[serde(
        default = "ConfigServerSMTP::default_timeout_client",
        with = "humantime_serde"
    )]
    pub timeout_client: std::time::Duration,
    #[serde(default)]
    pub error: ConfigServerSMTPError,
    #[serde(default)]
    pub auth: ConfigServerSMTPAuth,
    #[serde(default)]
    pub codes: std::collections::BTreeMap<CodeID, Reply>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigAppLogs {
    pub filepath: std::path::PathBuf,
    pub level: mailetd_common::re::log::LevelFilter,
    pub format: String,
}

/// One stage of a processor: the mailet is applied to the recipients
/// selected by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigMailet {
    /// `Name` or `Name=condition`
    #[serde(default = "ConfigMailet::default_matcher")]
    pub matcher: String,
    pub mailet: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigProcessor {
    pub name: String,
    #[serde(default)]
    pub mailets: Vec<ConfigMailet>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigApp {
    #[serde(default)]
    pub logs: ConfigAppLogs,
    #[serde(default = "ConfigApp::default_processors")]
    pub processors: Vec<ConfigProcessor>,
    /// user => password
    #[serde(default)]
    pub users: std::collections::BTreeMap<String, String>,
    /// address or `@domain` => targets
    #[serde(default)]
    pub mappings: std::collections::BTreeMap<String, Vec<String>>,
    /// name => directory
    #[serde(default = "ConfigApp::default_repositories")]
    pub repositories: std::collections::BTreeMap<String, std::path::PathBuf>,
}

impl Config {
    /// the reply to send for `id`, `{domain}` is replaced by the server's domain
    #[must_use]
    pub fn reply(&self, id: CodeID) -> Reply {
        self.server
            .smtp
            .codes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.default_reply())
            .replace("{domain}", &self.server.domain)
    }

    /// domains for which the server accepts mails without authentication
    #[must_use]
    pub fn local_domains(&self) -> Vec<String> {
        if self.server.smtp.local_domains.is_empty() {
            vec![self.server.domain.clone()]
        } else {
            self.server.smtp.local_domains.clone()
        }
    }

    /// address receiving the mails sent to `postmaster@<local domain>`
    ///
    /// # Errors
    ///
    /// * the configured postmaster is not a valid address
    pub fn postmaster(&self) -> mailetd_common::re::anyhow::Result<mailetd_common::Address> {
        match &self.server.smtp.postmaster {
            Some(postmaster) => postmaster.parse(),
            None => mailetd_common::Address::new("postmaster", &self.server.domain),
        }
    }
}
