//! mailetd configuration

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

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

/// targets for log! macro
pub mod log_channel {
    /// logs written by the mailets, in the application log file
    pub const MAILET: &str = "mailet";
}

#[cfg(test)]
mod tests;

mod parser {
    pub mod semver;
    pub mod socket_addr;
}

mod log4rs_helper;

mod config;
mod default;

pub use config::*;
pub use log4rs_helper::get_log4rs_config;

/// Re-exported dependencies
pub mod re {
    pub use humantime_serde;
    pub use ipnet;
    pub use log4rs;
    pub use toml;
}

use mailetd_common::{re::anyhow, GHOST};

impl Config {
    /// Parse a [Config] with [TOML] format
    ///
    /// # Errors
    ///
    /// * data is not a valid [TOML]
    /// * one field is unknown
    /// * the version requirement are not fulfilled
    /// * a mandatory field is not provided (no default value)
    /// * the configuration is not consistent, see [Config::ensure]
    ///
    /// [TOML]: https://github.com/toml-lang/toml
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct VersionRequirement {
            #[serde(
                serialize_with = "crate::parser::semver::serialize",
                deserialize_with = "crate::parser::semver::deserialize"
            )]
            version_requirement: semver::VersionReq,
        }

        let req = toml::from_str::<VersionRequirement>(input)?;
        let pkg_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;

        if !req.version_requirement.matches(&pkg_version) {
            anyhow::bail!(
                "Version requirement not fulfilled: expected '{}' but got '{}'",
                req.version_requirement,
                env!("CARGO_PKG_VERSION")
            );
        }

        toml::from_str::<Self>(input)
            .map_err(anyhow::Error::new)
            .and_then(Self::ensure)
    }

    /// Check the values which cannot be checked by the parser
    ///
    /// # Errors
    ///
    /// * a processor name is empty, duplicated or `ghost`
    /// * a reply code has been overridden with a code of another class
    /// * the postmaster is not a valid address
    /// * a limit is zero
    pub fn ensure(self) -> anyhow::Result<Self> {
        let mut names = std::collections::HashSet::new();
        for processor in &self.app.processors {
            if processor.name.is_empty() || processor.name == GHOST {
                anyhow::bail!("'{}' is not a valid processor name", processor.name);
            }
            if !names.insert(processor.name.as_str()) {
                anyhow::bail!("processor '{}' is defined twice", processor.name);
            }
        }

        for (id, reply) in &self.server.smtp.codes {
            let default = id.default_reply();
            if reply.code() / 100 != default.code() / 100 {
                anyhow::bail!(
                    "reply '{}' must be a {}xx code, got {}",
                    id,
                    default.code() / 100,
                    reply.code()
                );
            }
        }

        self.postmaster()?;

        if self.server.smtp.line_length_max < 3 {
            anyhow::bail!("'line_length_max' is too small");
        }
        if self.server.queues.workers == 0 {
            anyhow::bail!("'queues.workers' must be at least 1");
        }
        if self.server.queues.max_processor_hops == 0 {
            anyhow::bail!("'queues.max_processor_hops' must be at least 1");
        }

        Ok(self)
    }
}
