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
use super::parse_path_argument;
use crate::{
    hooks::{hook_reply, run_hooks, HookReplies},
    receiver::{dispatcher::CommandHandler, Session},
};
use mailetd_common::{Address, CodeID, HookReturnCode, Reply, Request, StateSMTP};

/// RCPT TO
pub struct RcptCmdHandler;

impl RcptCmdHandler {
    fn recipient(session: &Session, path: &str) -> Result<Address, CodeID> {
        // RFC 5321 4.5.1, <postmaster> without domain
        if path.eq_ignore_ascii_case("postmaster") {
            return Address::new("postmaster", &session.config().server.domain)
                .map_err(|_| CodeID::SyntaxErrorParams);
        }
        path.parse::<Address>()
            .map_err(|_| CodeID::SyntaxErrorParams)
    }
}

impl CommandHandler for RcptCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["RCPT"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        if !matches!(session.stage, StateSMTP::MailFrom | StateSMTP::RcptTo) {
            return Some(session.reply(CodeID::BadSequence));
        }

        let rcpt = match parse_path_argument(request.argument(), "TO").and_then(|(path, params)| {
            if params
                .iter()
                .any(|(key, _)| !matches!(key.as_str(), "NOTIFY" | "ORCPT"))
            {
                return Err(CodeID::ParameterUnimplemented);
            }
            Self::recipient(session, &path.ok_or(CodeID::SyntaxErrorParams)?)
        }) {
            Ok(rcpt) => rcpt,
            Err(id) => return Some(session.reply(id)),
        };

        if session.transaction.recipients.contains(&rcpt) {
            return Some(session.reply(CodeID::RecipientOk));
        }
        if session.transaction.recipients.len() >= session.config().server.smtp.rcpt_count_max {
            return Some(session.reply(CodeID::TooManyRecipients));
        }

        let context = session.context().clone();
        let sender = session.transaction.sender.clone();
        let result = run_hooks(&context.hooks.rcpt, &context.hooks.result, session, "rcpt", |h| {
            h.do_rcpt(session, sender.as_ref(), &rcpt)
        });
        let reply = hook_reply(
            &result,
            HookReplies {
                ok: session.reply(CodeID::RecipientOk),
                deny: session.reply(CodeID::RecipientRejected),
                deny_soft: session.reply(CodeID::DeniedSoft),
            },
        );
        if matches!(
            result.code(),
            HookReturnCode::Deny | HookReturnCode::DenySoft
        ) {
            return reply;
        }

        session.transaction.add_recipient(rcpt);
        session.stage = StateSMTP::RcptTo;
        Some(reply.unwrap_or_else(|| session.reply(CodeID::RecipientOk)))
    }
}
