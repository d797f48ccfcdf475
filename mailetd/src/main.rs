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
use mailetd::{bind_sockets, config_diff, config_show, load_config, Args, Commands};
use mailetd_common::re::{anyhow, log};
use mailetd_config::{get_log4rs_config, re::log4rs};
use mailetd_server::{services::Services, start_runtime};

fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    let args = <Args as clap::StructOpt>::parse();
    let config = load_config(args.config.as_deref())?;

    if let Some(command) = args.command {
        match command {
            Commands::ConfigShow => println!("{}", config_show(&config)?),
            Commands::ConfigDiff => {
                for line in config_diff(&config, true)? {
                    println!("{line}");
                }
            }
        }
        return Ok(());
    }

    get_log4rs_config(&config, args.stdout)
        .context("Logs configuration contain error")
        .map(log4rs::init_config)
        .context("Cannot initialize logs")??;

    let sockets = bind_sockets(&config)?;

    let config = std::sync::Arc::new(config);
    let services = Services::from_config(config.clone())
        .context("Cannot build the services from the configuration")?;

    log::info!(
        "mailetd {} starting for '{}'",
        env!("CARGO_PKG_VERSION"),
        config.server.domain
    );
    start_runtime(std::sync::Arc::new(services), sockets)
}
