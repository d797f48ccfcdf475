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
use crate::{log_channel, Config};
use mailetd_common::re::{anyhow, log};

#[doc(hidden)]
pub fn get_log4rs_config(config: &Config, stdout: bool) -> anyhow::Result<log4rs::Config> {
    use anyhow::Context;
    use log4rs::{append, config, encode, Config};

    let server = append::file::FileAppender::builder()
        .encoder(Box::new(encode::pattern::PatternEncoder::new(
            &config.server.logs.format,
        )))
        .build(&config.server.logs.filepath)
        .with_context(|| format!("For filepath: '{}'", config.server.logs.filepath.display()))?;

    let app = append::file::FileAppender::builder()
        .encoder(Box::new(encode::pattern::PatternEncoder::new(
            &config.app.logs.format,
        )))
        .build(&config.app.logs.filepath)
        .with_context(|| format!("For filepath: '{}'", config.app.logs.filepath.display()))?;

    let mut builder = Config::builder();
    let mut root = config::Root::builder();

    if stdout {
        builder = builder.appender(
            config::Appender::builder().build(
                "stdout",
                Box::new(
                    append::console::ConsoleAppender::builder()
                        .encoder(Box::new(encode::pattern::PatternEncoder::new(
                            "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5} {t})} $ {m}{n}",
                        )))
                        .build(),
                ),
            ),
        );
        root = root.appender("stdout");
    }

    builder
        .appender(config::Appender::builder().build("server", Box::new(server)))
        .appender(config::Appender::builder().build("app", Box::new(app)))
        .loggers(
            config
                .server
                .logs
                .level
                .iter()
                .filter(|(name, _)| name.as_str() != "default")
                .map(|(name, level)| config::Logger::builder().build(name, *level)),
        )
        .logger(
            config::Logger::builder()
                .appender("app")
                .additive(false)
                .build(log_channel::MAILET, config.app.logs.level),
        )
        .build(
            root.appender("server").build(
                *config
                    .server
                    .logs
                    .level
                    .get("default")
                    .unwrap_or(&log::LevelFilter::Warn),
            ),
        )
        .map_err(|e| {
            e.errors().iter().for_each(|e| log::error!("{}", e));
            anyhow::anyhow!(e)
        })
}
