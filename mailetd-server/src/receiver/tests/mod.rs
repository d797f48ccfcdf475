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
mod clair;

use super::test_helpers::get_regular_config;
use mailetd_config::{AuthMode, Config};

/// a client outside of the authorized networks
const REMOTE_CLIENT: &str = "10.0.0.5:53000";

fn config_with(f: impl FnOnce(&mut Config)) -> Config {
    let mut config = get_regular_config();
    f(&mut config);
    config
}

fn auth_announced() -> Config {
    config_with(|config| config.server.smtp.auth.mode = AuthMode::Announce)
}
