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
use crate::config::{
    AuthMode, Config, ConfigApp, ConfigAppLogs, ConfigMailet, ConfigProcessor, ConfigServer,
    ConfigServerInterfaces, ConfigServerLogs, ConfigServerQueues, ConfigServerSMTP,
    ConfigServerSMTPAuth, ConfigServerSMTPError, ConfigServerSystem,
    ConfigServerSystemThreadPool,
};
use mailetd_common::{
    re::{log, serde_json},
    Mechanism, ERROR_PROCESSOR, ROOT_PROCESSOR,
};

impl Default for Config {
    fn default() -> Self {
        Self {
            version_requirement: semver::VersionReq::parse(&format!(
                ">={}",
                env!("CARGO_PKG_VERSION")
            ))
            .unwrap_or(semver::VersionReq::STAR),
            server: ConfigServer::default(),
            app: ConfigApp::default(),
        }
    }
}

impl Default for ConfigServer {
    fn default() -> Self {
        Self {
            domain: Self::hostname(),
            client_count_max: Self::default_client_count_max(),
            client_count_max_per_ip: Self::default_client_count_max(),
            system: ConfigServerSystem::default(),
            interfaces: ConfigServerInterfaces::default(),
            logs: ConfigServerLogs::default(),
            queues: ConfigServerQueues::default(),
            smtp: ConfigServerSMTP::default(),
        }
    }
}

impl ConfigServer {
    pub(crate) fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        -1
    }
}

impl Default for ConfigServerSystem {
    fn default() -> Self {
        Self {
            thread_pool: ConfigServerSystemThreadPool::default(),
        }
    }
}

impl Default for ConfigServerSystemThreadPool {
    fn default() -> Self {
        Self {
            receiver: 6,
            processing: 6,
        }
    }
}

impl Default for ConfigServerInterfaces {
    fn default() -> Self {
        Self {
            addr: vec![std::net::SocketAddr::new(
                std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                25,
            )],
        }
    }
}

impl Default for ConfigServerLogs {
    fn default() -> Self {
        Self {
            filepath: std::path::PathBuf::from_iter(["/", "var", "log", "mailetd", "mailetd.log"]),
            format: "{d} {l} - {m}{n}".to_string(),
            level: std::collections::BTreeMap::from_iter([(
                "default".to_string(),
                log::LevelFilter::Warn,
            )]),
        }
    }
}

impl ConfigServerQueues {
    pub(crate) fn default_dirpath() -> std::path::PathBuf {
        std::path::PathBuf::from_iter(["/", "var", "spool", "mailetd"])
    }
}

impl Default for ConfigServerQueues {
    fn default() -> Self {
        Self {
            dirpath: Self::default_dirpath(),
            workers: 4,
            lease: std::time::Duration::from_secs(5 * 60),
            requeue_delay: std::time::Duration::from_secs(60),
            max_processor_hops: 100,
        }
    }
}

impl Default for ConfigServerSMTPError {
    fn default() -> Self {
        Self {
            soft_count: 5,
            hard_count: 10,
            delay: std::time::Duration::from_millis(1000),
        }
    }
}

impl Default for ConfigServerSMTPAuth {
    fn default() -> Self {
        Self {
            mode: AuthMode::Required,
            mechanisms: vec![Mechanism::Plain, Mechanism::Login],
        }
    }
}

impl Default for ConfigServerSMTP {
    fn default() -> Self {
        Self {
            rcpt_count_max: Self::default_rcpt_count_max(),
            message_size_max: Self::default_message_size_max(),
            line_length_max: Self::default_line_length_max(),
            local_domains: vec![],
            postmaster: None,
            authorized_networks: Self::default_authorized_networks(),
            verify_identity: Self::default_verify_identity(),
            disabled_commands: vec![],
            timeout_client: Self::default_timeout_client(),
            error: ConfigServerSMTPError::default(),
            auth: ConfigServerSMTPAuth::default(),
            codes: std::collections::BTreeMap::new(),
        }
    }
}

impl ConfigServerSMTP {
    pub(crate) const fn default_rcpt_count_max() -> usize {
        1000
    }

    pub(crate) const fn default_message_size_max() -> usize {
        20_000_000
    }

    pub(crate) const fn default_line_length_max() -> usize {
        // RFC 5321 4.5.3.1.6 for a text line, the client may pipeline a bit more
        1000
    }

    pub(crate) fn default_authorized_networks() -> Vec<ipnet::IpNet> {
        ["127.0.0.0/8", "::1/128"]
            .into_iter()
            .filter_map(|n| n.parse().ok())
            .collect()
    }

    pub(crate) const fn default_verify_identity() -> bool {
        true
    }

    pub(crate) const fn default_timeout_client() -> std::time::Duration {
        std::time::Duration::from_secs(5 * 60)
    }
}

impl Default for ConfigAppLogs {
    fn default() -> Self {
        Self {
            filepath: std::path::PathBuf::from_iter(["/", "var", "log", "mailetd", "app.log"]),
            level: log::LevelFilter::Info,
            format: "{d} - {m}{n}".to_string(),
        }
    }
}

impl Default for ConfigApp {
    fn default() -> Self {
        Self {
            logs: ConfigAppLogs::default(),
            processors: Self::default_processors(),
            users: std::collections::BTreeMap::new(),
            mappings: std::collections::BTreeMap::new(),
            repositories: Self::default_repositories(),
        }
    }
}

impl ConfigMailet {
    pub(crate) fn default_matcher() -> String {
        "All".to_string()
    }

    /// stage applied to every recipient
    #[must_use]
    pub fn all(mailet: &str, params: serde_json::Value) -> Self {
        Self::new("All", mailet, params)
    }

    ///
    #[must_use]
    pub fn new(matcher: &str, mailet: &str, params: serde_json::Value) -> Self {
        Self {
            matcher: matcher.to_string(),
            mailet: mailet.to_string(),
            params: match params {
                serde_json::Value::Object(params) => params,
                _ => serde_json::Map::new(),
            },
        }
    }
}

impl ConfigApp {
    pub(crate) fn default_processors() -> Vec<ConfigProcessor> {
        vec![
            ConfigProcessor {
                name: ROOT_PROCESSOR.to_string(),
                mailets: vec![ConfigMailet::all(
                    "ToProcessor",
                    serde_json::json!({ "processor": "transport" }),
                )],
            },
            ConfigProcessor {
                name: "transport".to_string(),
                mailets: vec![
                    ConfigMailet::all("RecipientRewriteTable", serde_json::json!({})),
                    ConfigMailet::new("RecipientIsLocal", "LocalDelivery", serde_json::json!({})),
                    ConfigMailet::all("RemoteDelivery", serde_json::json!({})),
                ],
            },
            ConfigProcessor {
                name: "bounces".to_string(),
                mailets: vec![ConfigMailet::all("Bounce", serde_json::json!({}))],
            },
            ConfigProcessor {
                name: ERROR_PROCESSOR.to_string(),
                mailets: vec![ConfigMailet::all(
                    "ToRepository",
                    serde_json::json!({ "repository": "error" }),
                )],
            },
        ]
    }

    pub(crate) fn default_repositories() -> std::collections::BTreeMap<String, std::path::PathBuf>
    {
        let dirpath = ConfigServerQueues::default_dirpath();
        ["error", "inbox", "outgoing"]
            .into_iter()
            .map(|name| (name.to_string(), dirpath.join(name)))
            .collect()
    }
}
