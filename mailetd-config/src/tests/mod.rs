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
use crate::{AuthMode, Config, ConfigMailet};
use mailetd_common::{re::serde_json, CodeID, Mechanism, Reply};

#[test]
fn default_is_valid() {
    let mut config = Config::default();
    config.server.domain = "testserver.com".to_string();
    let config = config.ensure().unwrap();
    assert_eq!(
        config
            .app
            .processors
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>(),
        vec!["root", "transport", "bounces", "error"]
    );
    assert_eq!(config.local_domains(), vec!["testserver.com".to_string()]);
}

#[test]
fn minimal() {
    let config = Config::from_toml(
        r#"
version_requirement = ">=0.1.0"

[server]
domain = "testserver.com"
"#,
    )
    .unwrap();

    assert_eq!(config.server.domain, "testserver.com");
    assert_eq!(config.server.smtp.auth.mode, AuthMode::Required);
    assert_eq!(config.app, Config::default().app);
    assert_eq!(
        config.postmaster().unwrap().full(),
        "postmaster@testserver.com"
    );
}

#[test]
fn complete() {
    let config = Config::from_toml(include_str!("../../../config/mailetd.toml")).unwrap();

    pretty_assertions::assert_eq!(config.server.client_count_max_per_ip, 8);
    pretty_assertions::assert_eq!(
        config.server.queues.lease,
        std::time::Duration::from_secs(5 * 60)
    );
    pretty_assertions::assert_eq!(
        config.server.smtp.timeout_client,
        std::time::Duration::from_secs(30)
    );
    pretty_assertions::assert_eq!(
        config.server.smtp.auth.mechanisms,
        vec![Mechanism::Plain, Mechanism::Login]
    );
    pretty_assertions::assert_eq!(
        config.local_domains(),
        vec!["testserver.com".to_string(), "example.com".to_string()]
    );
    pretty_assertions::assert_eq!(
        config.app.processors[1].mailets[2],
        ConfigMailet::all(
            "RemoteDelivery",
            serde_json::json!({ "max_retries": 5, "delay": "30m", "bounce_processor": "bounces" })
        )
    );
    pretty_assertions::assert_eq!(
        config.app.processors[0].mailets[0].matcher,
        "RemoteAddrInNetwork=10.0.0.0/8"
    );
}

#[test]
fn reply_override() {
    let config = Config::from_toml(include_str!("../../../config/mailetd.toml")).unwrap();
    assert_eq!(
        config.reply(CodeID::Greetings),
        Reply::new(220, "testserver.com ESMTP mailetd")
    );
    assert_eq!(
        config.reply(CodeID::Timeout),
        Reply::enhanced(421, "4.4.2", "testserver.com Idle timeout, closing connection")
    );
}

#[test]
fn reply_override_wrong_class() {
    let error = Config::from_toml(
        r#"
version_requirement = ">=0.1.0"

[server.smtp.codes]
Greetings = "554 go away"
"#,
    )
    .unwrap_err();
    assert_eq!(
        error.to_string(),
        "reply 'Greetings' must be a 2xx code, got 554"
    );
}

#[test]
fn version_requirement() {
    let error = Config::from_toml(r#"version_requirement = "<0.1.0""#).unwrap_err();
    assert!(error
        .to_string()
        .starts_with("Version requirement not fulfilled"));
}

#[test]
fn unknown_field() {
    assert!(Config::from_toml(
        r#"
version_requirement = ">=0.1.0"
[server]
foobar = 1
"#
    )
    .is_err());
}

#[test]
fn processor_names() {
    for input in [
        r#"
version_requirement = ">=0.1.0"
[[app.processors]]
name = "ghost"
"#,
        r#"
version_requirement = ">=0.1.0"
[[app.processors]]
name = "root"
[[app.processors]]
name = "root"
"#,
    ] {
        assert!(Config::from_toml(input).is_err(), "{input}");
    }
}

#[test]
fn serialize_round_trip() {
    let config = Config::from_toml(include_str!("../../../config/mailetd.toml")).unwrap();
    let serialized = toml::to_string_pretty(&config).unwrap();
    pretty_assertions::assert_eq!(Config::from_toml(&serialized).unwrap(), config);
}
