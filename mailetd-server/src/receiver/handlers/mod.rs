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
use super::dispatcher::CommandHandler;
use mailetd_common::CodeID;

mod auth;
mod data;
mod helo;
mod mail;
mod misc;
mod rcpt;

pub use auth::AuthCmdHandler;
pub use data::{on_data_line, on_line_too_long, DataCmdHandler};
pub use helo::HeloCmdHandler;
pub use mail::MailCmdHandler;
pub use misc::{
    ExpnCmdHandler, HelpCmdHandler, NoopCmdHandler, QuitCmdHandler, RsetCmdHandler,
    VrfyCmdHandler,
};
pub use rcpt::RcptCmdHandler;

/// the handlers of the commands of RFC 5321 and RFC 4954
#[must_use]
pub fn core_handlers() -> Vec<std::sync::Arc<dyn CommandHandler>> {
    vec![
        std::sync::Arc::new(HeloCmdHandler),
        std::sync::Arc::new(MailCmdHandler),
        std::sync::Arc::new(RcptCmdHandler),
        std::sync::Arc::new(DataCmdHandler),
        std::sync::Arc::new(AuthCmdHandler),
        std::sync::Arc::new(RsetCmdHandler),
        std::sync::Arc::new(NoopCmdHandler),
        std::sync::Arc::new(QuitCmdHandler),
        std::sync::Arc::new(HelpCmdHandler),
        std::sync::Arc::new(VrfyCmdHandler),
        std::sync::Arc::new(ExpnCmdHandler),
    ]
}

/// `KEY` or `KEY=VALUE`, the key is upper-cased
pub type Parameter = (String, Option<String>);

/// Split the argument of MAIL and RCPT: `<prefix>:<path> [parameters]`.
///
/// The path is returned without its brackets nor source route, `None`
/// for the null path `<>`.
pub fn parse_path_argument(
    argument: Option<&str>,
    prefix: &str,
) -> Result<(Option<String>, Vec<Parameter>), CodeID> {
    let argument = argument.ok_or(CodeID::SyntaxErrorParams)?;

    let rest = match argument.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &argument[prefix.len()..],
        _ => return Err(CodeID::SyntaxErrorParams),
    };
    let rest = rest
        .strip_prefix(':')
        .ok_or(CodeID::SyntaxErrorParams)?
        .trim_start();

    let rest = rest.strip_prefix('<').ok_or(CodeID::SyntaxErrorParams)?;
    let (path, params) = rest.split_once('>').ok_or(CodeID::SyntaxErrorParams)?;
    if !params.is_empty() && !params.starts_with(' ') {
        return Err(CodeID::SyntaxErrorParams);
    }

    // source route: <@a,@b:user@c>
    let path = match path.strip_prefix('@') {
        Some(route) => route
            .split_once(':')
            .map(|(_, path)| path)
            .ok_or(CodeID::SyntaxErrorParams)?,
        None => path,
    };

    let params = params
        .split_whitespace()
        .map(|p| match p.split_once('=') {
            Some((key, value)) => (key.to_ascii_uppercase(), Some(value.to_string())),
            None => (p.to_ascii_uppercase(), None),
        })
        .collect();

    Ok((
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        },
        params,
    ))
}

#[cfg(test)]
mod tests {
    use super::parse_path_argument;
    use mailetd_common::CodeID;

    #[test]
    fn path() {
        assert_eq!(
            parse_path_argument(Some("FROM:<a@b.com>"), "FROM"),
            Ok((Some("a@b.com".to_string()), vec![]))
        );
        assert_eq!(
            parse_path_argument(Some("from: <>"), "FROM"),
            Ok((None, vec![]))
        );
        assert_eq!(
            parse_path_argument(Some("TO:<@relay.org,@other.org:a@b.com>"), "TO"),
            Ok((Some("a@b.com".to_string()), vec![]))
        );
        assert_eq!(
            parse_path_argument(Some("FROM:<a@b.com> size=100 BODY=8BITMIME SMTPUTF8"), "FROM"),
            Ok((
                Some("a@b.com".to_string()),
                vec![
                    ("SIZE".to_string(), Some("100".to_string())),
                    ("BODY".to_string(), Some("8BITMIME".to_string())),
                    ("SMTPUTF8".to_string(), None)
                ]
            ))
        );
    }

    #[test]
    fn invalid() {
        for argument in [
            None,
            Some("TO:<a@b.com>"),
            Some("FROM a@b.com"),
            Some("FROM:a@b.com"),
            Some("FROM:<a@b.com"),
            Some("FROM:<a@b.com>SIZE=1"),
            Some("FR"),
        ] {
            assert_eq!(
                parse_path_argument(argument, "FROM"),
                Err(CodeID::SyntaxErrorParams),
                "{argument:?}"
            );
        }
    }
}
