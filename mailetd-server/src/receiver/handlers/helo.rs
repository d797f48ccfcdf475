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
use crate::{
    hooks::{hook_reply, run_hooks, HookReplies},
    receiver::{dispatcher::CommandHandler, session::Helo, Session},
};
use mailetd_common::{CodeID, HookReturnCode, Reply, Request, StateSMTP};
use mailetd_config::AuthMode;

/// HELO and EHLO
pub struct HeloCmdHandler;

/// a domain name or an address literal
fn is_valid_helo(helo: &str) -> bool {
    if let Some(literal) = helo.strip_prefix('[') {
        return literal.strip_suffix(']').map_or(false, |l| {
            let l = l.strip_prefix("IPv6:").unwrap_or(l);
            l.parse::<std::net::IpAddr>().is_ok()
        });
    }
    !helo.is_empty()
        && helo
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
}

impl CommandHandler for HeloCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["HELO", "EHLO"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        let helo = match request.argument() {
            Some(helo) if is_valid_helo(helo) => helo,
            _ => return Some(session.reply(CodeID::SyntaxErrorParams)),
        };

        let context = session.context().clone();
        let result = run_hooks(&context.hooks.helo, &context.hooks.result, session, "helo", |h| {
            h.do_helo(session, helo)
        });
        if matches!(
            result.code(),
            HookReturnCode::Deny | HookReturnCode::DenySoft
        ) {
            return hook_reply(
                &result,
                HookReplies {
                    ok: session.reply(CodeID::Ok),
                    deny: session.reply(CodeID::Denied),
                    deny_soft: session.reply(CodeID::DeniedSoft),
                },
            );
        }

        let extended = request.verb() == "EHLO";
        session.helo = Some(Helo {
            domain: helo.to_string(),
            extended,
        });
        session.stage = StateSMTP::Helo;

        let config = session.config();
        let greeting = format!("{} Hello {}", config.server.domain, helo);
        if !extended {
            return Some(Reply::new(250, greeting));
        }

        let mut reply = Reply::multiline(
            250,
            vec![
                greeting,
                "PIPELINING".to_string(),
                "8BITMIME".to_string(),
                "ENHANCEDSTATUSCODES".to_string(),
                format!("SIZE {}", config.server.smtp.message_size_max),
            ],
        );
        let auth = &config.server.smtp.auth;
        if auth.mode != AuthMode::Disabled && !auth.mechanisms.is_empty() {
            reply.push_line(format!(
                "AUTH {}",
                auth.mechanisms
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            ));
        }
        Some(reply)
    }
}
