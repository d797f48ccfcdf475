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

/// MAIL FROM
pub struct MailCmdHandler;

impl MailCmdHandler {
    fn check_parameters(
        session: &Session,
        params: &[super::Parameter],
    ) -> Result<Option<usize>, CodeID> {
        let mut declared_size = None;
        for (key, value) in params {
            match (key.as_str(), value.as_deref()) {
                ("SIZE", Some(size)) => {
                    let size = size
                        .parse::<usize>()
                        .map_err(|_| CodeID::SyntaxErrorParams)?;
                    if size > session.config().server.smtp.message_size_max {
                        return Err(CodeID::MessageTooBig);
                    }
                    declared_size = Some(size);
                }
                ("BODY", Some(body))
                    if body.eq_ignore_ascii_case("7BIT") || body.eq_ignore_ascii_case("8BITMIME") => {}
                ("AUTH", Some(_)) | ("SMTPUTF8", None) => {}
                ("SIZE" | "BODY" | "AUTH" | "SMTPUTF8", _) => return Err(CodeID::SyntaxErrorParams),
                _ => return Err(CodeID::ParameterUnimplemented),
            }
        }
        Ok(declared_size)
    }
}

impl CommandHandler for MailCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["MAIL"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        if session.stage != StateSMTP::Helo {
            return Some(session.reply(CodeID::BadSequence));
        }

        let (path, params) = match parse_path_argument(request.argument(), "FROM") {
            Ok(argument) => argument,
            Err(id) => return Some(session.reply(id)),
        };
        let sender = match path.map(|p| p.parse::<Address>()).transpose() {
            Ok(sender) => sender,
            Err(_) => return Some(session.reply(CodeID::SyntaxErrorParams)),
        };
        let declared_size = match Self::check_parameters(session, &params) {
            Ok(size) => size,
            Err(id) => return Some(session.reply(id)),
        };

        let context = session.context().clone();
        let result = run_hooks(&context.hooks.mail, &context.hooks.result, session, "mail", |h| {
            h.do_mail(session, sender.as_ref())
        });
        let reply = hook_reply(
            &result,
            HookReplies {
                ok: session.reply(CodeID::SenderOk),
                deny: session.reply(CodeID::SenderRejected),
                deny_soft: session.reply(CodeID::DeniedSoft),
            },
        );
        if matches!(
            result.code(),
            HookReturnCode::Deny | HookReturnCode::DenySoft
        ) {
            return reply;
        }

        session.transaction.sender = sender;
        session.transaction.declared_size = declared_size;
        session.stage = StateSMTP::MailFrom;
        Some(reply.unwrap_or_else(|| session.reply(CodeID::SenderOk)))
    }
}
