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
use super::{Matcher, MailetContext};
use mailetd_common::{re::anyhow, Address, Mail};
use mailetd_config::re::ipnet;

/// build a matcher from `Name` or `Name=condition`
///
/// # Errors
///
/// * the matcher is unknown
/// * the condition is missing or invalid
pub fn from_spec(spec: &str) -> anyhow::Result<Box<dyn Matcher>> {
    let (name, condition) = match spec.split_once('=') {
        Some((name, condition)) => (name.trim(), Some(condition.trim())),
        None => (spec.trim(), None),
    };
    let required = || {
        condition
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("matcher '{}' requires a condition", name))
    };

    let matcher: Box<dyn Matcher> = match name {
        "All" => Box::new(All),
        "RecipientIs" => Box::new(RecipientIs(parse_addresses(required()?)?)),
        "RecipientIsLocal" => Box::new(RecipientIsLocal),
        "RecipientIsRegex" => Box::new(RecipientIsRegex(regex::Regex::new(required()?)?)),
        "SenderIs" => Box::new(SenderIs(parse_addresses(required()?)?)),
        "SenderIsNull" => Box::new(SenderIsNull),
        "RemoteAddrInNetwork" => Box::new(RemoteAddrInNetwork(
            required()?
                .split(',')
                .map(|n| {
                    n.trim()
                        .parse::<ipnet::IpNet>()
                        .map_err(|e| anyhow::anyhow!("'{}' is not a network: {}", n, e))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
        )),
        "HasMailAttribute" => Box::new(HasMailAttribute(required()?.to_string())),
        "SizeGreaterThan" => Box::new(SizeGreaterThan(parse_size(required()?)?)),
        unknown => anyhow::bail!("unknown matcher '{}'", unknown),
    };
    Ok(matcher)
}

fn parse_addresses(condition: &str) -> anyhow::Result<Vec<Address>> {
    condition
        .split(',')
        .map(|a| a.trim().parse::<Address>())
        .collect()
}

/// `1000`, `10k` or `5m`
fn parse_size(condition: &str) -> anyhow::Result<u64> {
    let lower = condition.to_ascii_lowercase();
    let (digits, factor) = match lower.as_bytes().last() {
        Some(b'k') => (&lower[..lower.len() - 1], 1024),
        Some(b'm') => (&lower[..lower.len() - 1], 1024 * 1024),
        _ => (lower.as_str(), 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * factor)
        .map_err(|e| anyhow::anyhow!("'{}' is not a size: {}", condition, e))
}

fn everyone_if(mail: &Mail, condition: bool) -> Vec<Address> {
    if condition {
        mail.recipients().to_vec()
    } else {
        vec![]
    }
}

/// every recipient
pub struct All;

impl Matcher for All {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(mail.recipients().to_vec())
    }
}

/// the recipients in the list
pub struct RecipientIs(Vec<Address>);

impl Matcher for RecipientIs {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(mail
            .recipients()
            .iter()
            .filter(|r| self.0.contains(r))
            .cloned()
            .collect())
    }
}

/// the recipients which are users of a local domain
pub struct RecipientIsLocal;

impl Matcher for RecipientIsLocal {
    fn match_mail(&self, mail: &Mail, context: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        let mut matched = vec![];
        for rcpt in mail.recipients() {
            if context.services.is_local_domain(rcpt.domain())
                && context.services.is_local_user(rcpt)?
            {
                matched.push(rcpt.clone());
            }
        }
        Ok(matched)
    }
}

/// the recipients whose address matches the expression
pub struct RecipientIsRegex(regex::Regex);

impl Matcher for RecipientIsRegex {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(mail
            .recipients()
            .iter()
            .filter(|r| self.0.is_match(r.full()))
            .cloned()
            .collect())
    }
}

/// every recipient if the sender is in the list
pub struct SenderIs(Vec<Address>);

impl Matcher for SenderIs {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(everyone_if(
            mail,
            mail.sender.as_ref().map_or(false, |s| self.0.contains(s)),
        ))
    }
}

/// every recipient of a bounce
pub struct SenderIsNull;

impl Matcher for SenderIsNull {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(everyone_if(mail, mail.sender.is_none()))
    }
}

/// every recipient if the client address is in one of the networks
pub struct RemoteAddrInNetwork(Vec<ipnet::IpNet>);

impl Matcher for RemoteAddrInNetwork {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(everyone_if(
            mail,
            self.0.iter().any(|net| net.contains(&mail.remote_addr)),
        ))
    }
}

/// every recipient if the attribute is set
pub struct HasMailAttribute(String);

impl Matcher for HasMailAttribute {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(everyone_if(mail, mail.attributes.contains_key(&self.0)))
    }
}

/// every recipient if the content is bigger than the limit, in bytes
pub struct SizeGreaterThan(u64);

impl Matcher for SizeGreaterThan {
    fn match_mail(&self, mail: &Mail, _: &MailetContext<'_>) -> anyhow::Result<Vec<Address>> {
        Ok(everyone_if(mail, mail.size() > self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::{from_spec, parse_size};
    use crate::{processor::MailetContext, processor::tests::services};
    use mailetd_common::{Address, Mail};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn mail() -> Mail {
        let mut mail = Mail::new(
            "m1",
            Some(addr("sender@remote.org")),
            [
                addr("alice@testserver.com"),
                addr("nobody@testserver.com"),
                addr("someone@remote.org"),
            ],
            vec![b'x'; 2048],
        );
        mail.remote_addr = "10.1.2.3".parse().unwrap();
        mail
    }

    fn run(spec: &str, mail: &Mail) -> Vec<String> {
        let services = services();
        let context = MailetContext::new(&services);
        from_spec(spec)
            .unwrap()
            .match_mail(mail, &context)
            .unwrap()
            .into_iter()
            .map(|a| a.full().to_string())
            .collect()
    }

    #[test]
    fn recipients() {
        let mail = mail();
        assert_eq!(run("All", &mail).len(), 3);
        assert_eq!(
            run("RecipientIs=someone@remote.org, other@remote.org", &mail),
            vec!["someone@remote.org"]
        );
        assert_eq!(run("RecipientIsLocal", &mail), vec!["alice@testserver.com"]);
        assert_eq!(
            run("RecipientIsRegex=^.*@testserver\\.com$", &mail),
            vec!["alice@testserver.com", "nobody@testserver.com"]
        );
    }

    #[test]
    fn whole_mail() {
        let mut mail = mail();
        assert_eq!(run("SenderIs=sender@remote.org", &mail).len(), 3);
        assert!(run("SenderIs=other@remote.org", &mail).is_empty());
        assert!(run("SenderIsNull", &mail).is_empty());
        assert_eq!(run("RemoteAddrInNetwork=192.168.0.0/16,10.0.0.0/8", &mail).len(), 3);
        assert!(run("RemoteAddrInNetwork=192.168.0.0/16", &mail).is_empty());
        assert_eq!(run("SizeGreaterThan=1k", &mail).len(), 3);
        assert!(run("SizeGreaterThan=2k", &mail).is_empty());
        assert!(run("HasMailAttribute=flag", &mail).is_empty());

        mail.sender = None;
        mail.attributes
            .insert("flag".to_string(), mailetd_common::re::serde_json::Value::Bool(true));
        assert_eq!(run("SenderIsNull", &mail).len(), 3);
        assert_eq!(run("HasMailAttribute=flag", &mail).len(), 3);
    }

    #[test]
    fn invalid() {
        for spec in [
            "Unknown",
            "RecipientIs",
            "RecipientIs=",
            "RecipientIs=not an address",
            "RecipientIsRegex=(",
            "RemoteAddrInNetwork=10.0.0.0",
            "SizeGreaterThan=big",
        ] {
            assert!(from_spec(spec).is_err(), "{spec}");
        }
        assert_eq!(parse_size("10").unwrap(), 10);
        assert_eq!(parse_size("5M").unwrap(), 5 * 1024 * 1024);
    }
}
