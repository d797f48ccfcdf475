//! mailetd executable

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]
#![allow(clippy::multiple_crate_versions)]

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

mod args;

pub use args::{Args, Commands};

use mailetd_common::re::{anyhow, serde_json};
use mailetd_config::Config;

/// Read and parse the configuration, the default one if no path is given
///
/// # Errors
///
/// * the file cannot be read
/// * the content is not a valid configuration
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    use anyhow::Context;

    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read file '{}'", path))
            .and_then(|data| Config::from_toml(&data).with_context(|| "File contains format error"))
            .with_context(|| "Cannot parse the configuration"),
        None => Ok(Config::default()),
    }
}

/// The loaded configuration, serialized as json
///
/// # Errors
///
/// * the configuration cannot be serialized
pub fn config_show(config: &Config) -> anyhow::Result<String> {
    Ok(format!(
        "Loaded configuration: {}",
        serde_json::to_string_pretty(config)?
    ))
}

/// Line by line difference between the default configuration and `config`,
/// `-` for a default value replaced, `+` for the value loaded
///
/// # Errors
///
/// * the configuration cannot be serialized
pub fn config_diff(config: &Config, color: bool) -> anyhow::Result<Vec<String>> {
    let loaded_config = serde_json::to_string_pretty(config)?;
    let default_config = serde_json::to_string_pretty(&Config::default())?;

    Ok(diff::lines(&default_config, &loaded_config)
        .into_iter()
        .map(|diff| match (diff, color) {
            (diff::Result::Left(left), true) => format!("-\x1b[0;31m{left}\x1b[0m"),
            (diff::Result::Left(left), false) => format!("-{left}"),
            (diff::Result::Both(same, _), _) => format!(" {same}"),
            (diff::Result::Right(right), true) => format!("+\x1b[0;32m{right}\x1b[0m"),
            (diff::Result::Right(right), false) => format!("+{right}"),
        })
        .collect())
}

/// Bind every address of `server.interfaces.addr`
///
/// # Errors
///
/// * one of the addresses cannot be bound
pub fn bind_sockets(config: &Config) -> anyhow::Result<Vec<std::net::TcpListener>> {
    config
        .server
        .interfaces
        .addr
        .iter()
        .map(|addr| {
            anyhow::Context::with_context(std::net::TcpListener::bind(addr), || {
                format!("Failed to bind socket on addr: '{}'", addr)
            })
        })
        .collect()
}
