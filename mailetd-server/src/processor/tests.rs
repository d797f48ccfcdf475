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
use super::{
    mailets, matchers, Mailet, MailetContext, Pipeline, PipelineError, Processor, ProcessorEntry,
};
use crate::services::Services;
use mailetd_common::{
    re::anyhow, Address, DeliveryAgent, Mail, MailRepository, MailState,
    MemoryMailRepository, MemoryRecipientRewriteTable, MemoryUsersRepository,
    RepositoryDeliveryAgent,
};
use mailetd_config::Config;

fn config() -> Config {
    let mut config = Config::default();
    config.server.domain = "testserver.com".to_string();
    config.server.smtp.local_domains = vec!["testserver.com".to_string()];
    config.server.smtp.postmaster = Some("admin@testserver.com".to_string());
    config.app.users = [("alice", "secret"), ("bob", "hunter2")]
        .into_iter()
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .collect();
    config.app.mappings.insert(
        "sales@testserver.com".to_string(),
        vec![
            "alice@testserver.com".to_string(),
            "friend@remote.org".to_string(),
        ],
    );
    config
}

/// `testserver.com`, users `alice` and `bob`, the repositories `error`,
/// `inbox` and `outgoing` in memory
pub fn services_with(
    delivery: impl FnOnce(std::sync::Arc<dyn MailRepository>) -> std::sync::Arc<dyn DeliveryAgent>,
) -> Services {
    let config = std::sync::Arc::new(config());
    let repositories = ["error", "inbox", "outgoing"]
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                std::sync::Arc::new(MemoryMailRepository::default())
                    as std::sync::Arc<dyn MailRepository>,
            )
        })
        .collect::<std::collections::BTreeMap<_, _>>();

    Services::new(
        config.clone(),
        std::sync::Arc::new(MemoryUsersRepository::new(config.app.users.clone())),
        std::sync::Arc::new(MemoryRecipientRewriteTable::new(
            config.app.mappings.clone(),
        )),
        delivery(repositories["outgoing"].clone()),
        repositories,
    )
    .unwrap()
}

/// see [`services_with`], remote mails are written in `outgoing`
pub fn services() -> Services {
    services_with(|outgoing| std::sync::Arc::new(RepositoryDeliveryAgent::new(outgoing)))
}

pub fn addresses(addresses: &[&str]) -> Vec<Address> {
    addresses.iter().map(|a| a.parse().unwrap()).collect()
}

pub fn mail(name: &str, sender: Option<&str>, recipients: &[&str]) -> Mail {
    Mail::new(
        name,
        sender.map(|s| s.parse().unwrap()),
        addresses(recipients),
        b"Subject: hello\r\n\r\nthis is the body\r\n".to_vec(),
    )
}

struct SetState(&'static str);

impl Mailet for SetState {
    fn name(&self) -> &str {
        "SetState"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.state = MailState::processor(self.0);
        Ok(())
    }

    fn processor_targets(&self) -> Vec<&str> {
        vec![self.0]
    }
}

struct Fail;

impl Mailet for Fail {
    fn name(&self) -> &str {
        "Fail"
    }

    fn service(&self, _: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        anyhow::bail!("always fails")
    }
}

struct Defer;

impl Mailet for Defer {
    fn name(&self) -> &str {
        "Defer"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.defer(std::time::Duration::from_secs(60));
        Ok(())
    }
}

struct Mark;

impl Mailet for Mark {
    fn name(&self) -> &str {
        "Mark"
    }

    fn service(&self, mail: &mut Mail, _: &mut MailetContext<'_>) -> anyhow::Result<()> {
        mail.attributes.insert(
            "marked".to_string(),
            mail.recipients()
                .iter()
                .map(|r| r.full().to_string())
                .collect::<Vec<_>>()
                .into(),
        );
        Ok(())
    }
}

fn entry(matcher: &str, mailet: impl Mailet + 'static) -> ProcessorEntry {
    ProcessorEntry::new(matcher, matchers::from_spec(matcher).unwrap(), Box::new(mailet))
}

fn pipeline(root: Vec<ProcessorEntry>) -> Pipeline {
    Pipeline::new(vec![
        Processor::new("root", root),
        Processor::new("local", vec![]),
        Processor::new("remote", vec![]),
        Processor::new("error", vec![]),
    ])
    .unwrap()
}

#[test]
fn split() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![
        entry("RecipientIs=alice@testserver.com", SetState("local")),
        entry("All", SetState("remote")),
    ]);

    let mut m = mail("m1", None, &["alice@testserver.com", "john@remote.org"]);
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(m.state, MailState::processor("remote"));
    assert_eq!(m.recipients(), addresses(&["john@remote.org"]));

    let spawned = context.take_spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].state, MailState::processor("local"));
    assert_eq!(spawned[0].recipients(), addresses(&["alice@testserver.com"]));
    assert!(spawned[0].name.starts_with("m1-"));
    assert_eq!(spawned[0].name.len(), "m1-".len() + 6);
    assert_eq!(&*spawned[0].content().unwrap(), &*m.content().unwrap());
}

#[test]
fn unmatched_recipients_are_put_back() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![entry("RecipientIs=alice@testserver.com", Mark)]);

    let mut m = mail("m1", None, &["alice@testserver.com", "john@remote.org"]);
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(
        m.attributes["marked"],
        mailetd_common::re::serde_json::json!(["alice@testserver.com"])
    );
    assert_eq!(
        m.recipients(),
        addresses(&["alice@testserver.com", "john@remote.org"])
    );
    assert_eq!(m.state, MailState::Ghost);
    assert!(context.take_spawned().is_empty());
}

#[test]
fn ghosted_recipients_are_not_split() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![
        ProcessorEntry::new(
            "RecipientIs=alice@testserver.com",
            matchers::from_spec("RecipientIs=alice@testserver.com").unwrap(),
            mailets::from_config("Null", &mailetd_common::re::serde_json::Map::new()).unwrap(),
        ),
        entry("All", SetState("remote")),
    ]);

    let mut m = mail("m1", None, &["alice@testserver.com", "john@remote.org"]);
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(m.state, MailState::processor("remote"));
    assert_eq!(m.recipients(), addresses(&["john@remote.org"]));
    assert!(context.take_spawned().is_empty());
}

#[test]
fn failure_restores_recipients() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![entry("RecipientIs=alice@testserver.com", Fail)]);

    let mut m = mail("m1", None, &["alice@testserver.com", "john@remote.org"]);
    match pipeline.service(&mut m, &mut context) {
        Err(PipelineError::Mailet {
            processor, mailet, ..
        }) => {
            assert_eq!(processor, "root");
            assert_eq!(mailet, "Fail");
        }
        otherwise => panic!("{otherwise:?}"),
    }
    assert_eq!(m.state, MailState::root());
    assert_eq!(
        m.recipients(),
        addresses(&["alice@testserver.com", "john@remote.org"])
    );
}

#[test]
fn deferral_stops_the_processor() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![entry("All", Defer), entry("All", SetState("remote"))]);

    let mut m = mail("m1", None, &["john@remote.org"]);
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(m.state, MailState::root());
    assert_eq!(m.take_deferred(), Some(std::time::Duration::from_secs(60)));
}

#[test]
fn postmaster_alias_is_implicit() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![]);

    let mut m = mail("m1", None, &["postmaster@testserver.com"]);
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(m.recipients(), addresses(&["admin@testserver.com"]));
    assert_eq!(m.state, MailState::Ghost);
}

#[test]
fn routing() {
    let services = services();
    let mut context = MailetContext::new(&services);
    let pipeline = pipeline(vec![]);
    assert!(pipeline.contains("local"));
    assert!(!pipeline.contains("ghost"));

    let mut m = mail("m1", None, &["john@remote.org"]);
    m.state = MailState::processor("nowhere");
    assert!(matches!(
        pipeline.service(&mut m, &mut context),
        Err(PipelineError::UnknownProcessor(name)) if name == "nowhere"
    ));

    m.state = MailState::Ghost;
    pipeline.service(&mut m, &mut context).unwrap();
    assert_eq!(m.state, MailState::Ghost);
}

#[test]
fn validation() {
    let processors = |names: &[&str]| {
        names
            .iter()
            .map(|name| Processor::new(*name, vec![]))
            .collect::<Vec<_>>()
    };

    assert!(Pipeline::new(processors(&["root", "error"])).is_ok());
    assert!(Pipeline::new(processors(&["root"])).is_err());
    assert!(Pipeline::new(processors(&["error"])).is_err());
    assert!(Pipeline::new(processors(&["root", "error", "root"])).is_err());
    assert!(Pipeline::new(processors(&["root", "error", "ghost"])).is_err());

    assert!(Pipeline::new(vec![
        Processor::new("root", vec![entry("All", SetState("nowhere"))]),
        Processor::new("error", vec![]),
    ])
    .is_err());
    assert!(Pipeline::new(vec![
        Processor::new("root", vec![entry("All", SetState("ghost"))]),
        Processor::new("error", vec![]),
    ])
    .is_ok());
}

#[test]
fn from_config() {
    let services = services();
    let pipeline = Pipeline::from_config(&services.config, &services).unwrap();
    for name in ["root", "transport", "bounces", "error"] {
        assert!(pipeline.contains(name), "{name}");
    }

    let sample = Config::from_toml(include_str!("../../../config/mailetd.toml")).unwrap();
    let pipeline = Pipeline::from_config(&sample, &services).unwrap();
    assert!(pipeline.contains("bounces"));

    let mut broken = config();
    broken.app.processors[0].mailets[0].params.insert(
        "processor".to_string(),
        mailetd_common::re::serde_json::json!("nowhere"),
    );
    assert!(Pipeline::from_config(&broken, &services).is_err());

    let mut broken = config();
    broken.app.processors[3].mailets[0].params.insert(
        "repository".to_string(),
        mailetd_common::re::serde_json::json!("missing"),
    );
    assert!(Pipeline::from_config(&broken, &services).is_err());
}
