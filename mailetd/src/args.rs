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

/// Flags and command to change mailetd execution
#[derive(Debug, clap::Parser, PartialEq)]
#[clap(about, version, author)]
pub struct Args {
    /// Path of the mailetd configuration file (toml format)
    #[clap(short, long)]
    pub config: Option<String>,

    /// Commands
    #[clap(subcommand)]
    pub command: Option<Commands>,

    /// Also write the logs on the standard output
    #[clap(short, long)]
    pub stdout: bool,
}

/// Subcommand run instead of the mailetd server
#[derive(Debug, clap::Subcommand, PartialEq)]
pub enum Commands {
    /// Show the loaded config (as serialized json format)
    ConfigShow,
    /// Show the difference between the loaded config and the default one
    ConfigDiff,
}
