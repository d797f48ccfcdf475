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
    log_channels,
    receiver::{dispatcher::CommandHandler, Session},
};
use mailetd_common::{
    re::{log, serde_json},
    CodeID, HookReturnCode, Mail, Reply, Request, StateSMTP,
};

/// attribute holding the HELO/EHLO argument
pub const ATTRIBUTE_HELO: &str = "mailetd.helo";
/// attribute holding the authenticated user
pub const ATTRIBUTE_AUTH_USER: &str = "mailetd.auth.user";

/// DATA
pub struct DataCmdHandler;

impl CommandHandler for DataCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["DATA"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        if request.argument().is_some() {
            return Some(session.reply(CodeID::SyntaxErrorParams));
        }
        if session.stage != StateSMTP::RcptTo {
            return Some(session.reply(CodeID::BadSequence));
        }

        session.stage = StateSMTP::Data;
        Some(session.reply(CodeID::DataStart))
    }
}

/// a line of content, the reply is produced on the terminator
pub fn on_data_line(session: &mut Session, line: &[u8]) -> Option<Reply> {
    if line == b"." {
        return Some(complete_message(session));
    }

    let line = line.strip_prefix(b".").unwrap_or(line);
    let message_size_max = session.config().server.smtp.message_size_max;
    let transaction = &mut session.transaction;

    if transaction.rejection.is_none() {
        if transaction.body.len() + line.len() + 2 > message_size_max {
            transaction.rejection = Some(CodeID::MessageTooBig);
            transaction.body = Vec::new();
        } else {
            transaction.body.extend_from_slice(line);
            transaction.body.extend_from_slice(b"\r\n");
        }
    }
    None
}

/// a line of content exceeded the limit, the message will be rejected
pub fn on_line_too_long(session: &mut Session) {
    let transaction = &mut session.transaction;
    if transaction.rejection.is_none() {
        transaction.rejection = Some(CodeID::LineTooLong);
        transaction.body = Vec::new();
    }
}

fn received_header(session: &Session, name: &str) -> String {
    let (helo, protocol) = session.helo.as_ref().map_or(("unknown", "SMTP"), |helo| {
        (
            helo.domain.as_str(),
            match (helo.extended, session.is_authenticated()) {
                (true, true) => "ESMTPA",
                (true, false) => "ESMTP",
                (false, _) => "SMTP",
            },
        )
    });

    let date = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default();

    let recipient = match session.transaction.recipients.as_slice() {
        [single] => format!("\r\n\tfor <{}>", single),
        _ => String::new(),
    };

    format!(
        "Received: from {} ({})\r\n\tby {} (mailetd) with {} id {}{};\r\n\t{}\r\n",
        helo,
        session.client_addr.ip(),
        session.config().server.domain,
        protocol,
        name,
        recipient,
        date
    )
}

fn complete_message(session: &mut Session) -> Reply {
    let rejection = session.transaction.rejection;
    if let Some(id) = rejection {
        session.reset_transaction();
        return session.reply(id);
    }

    let name = Mail::generate_name();
    let mut content = received_header(session, &name).into_bytes();

    let transaction = std::mem::take(&mut session.transaction);
    session.reset_transaction();
    content.extend(transaction.body);

    let mut mail = Mail::new(name, transaction.sender, transaction.recipients, content);
    mail.remote_addr = session.client_addr.ip();
    mail.remote_host = session.client_addr.ip().to_string();
    if let Some(helo) = &session.helo {
        mail.attributes.insert(
            ATTRIBUTE_HELO.to_string(),
            serde_json::Value::String(helo.domain.clone()),
        );
    }
    if let Some(user) = &session.user {
        mail.attributes.insert(
            ATTRIBUTE_AUTH_USER.to_string(),
            serde_json::Value::String(user.clone()),
        );
    }

    let context = session.context().clone();
    let result = run_hooks(
        &context.hooks.message,
        &context.hooks.result,
        session,
        "message",
        |h| h.on_message(session, &mut mail),
    );
    let reply = hook_reply(
        &result,
        HookReplies {
            ok: session.reply(CodeID::MessageQueued),
            deny: session.reply(CodeID::MessageRejected),
            deny_soft: session.reply(CodeID::DeniedSoft),
        },
    );
    if matches!(
        result.code(),
        HookReturnCode::Deny | HookReturnCode::DenySoft
    ) {
        log::info!(
            target: log_channels::RECEIVER,
            "[{}] message '{}' rejected by a hook",
            session.client_addr,
            mail.name
        );
        return reply.unwrap_or_else(|| session.reply(CodeID::MessageRejected));
    }

    match context.queue.enqueue(&mail, None) {
        Ok(()) => {
            log::info!(
                target: log_channels::RECEIVER,
                "[{}] message '{}' queued for {} recipient(s), {} bytes",
                session.client_addr,
                mail.name,
                mail.recipients().len(),
                mail.size()
            );
            reply.unwrap_or_else(|| session.reply(CodeID::MessageQueued))
        }
        Err(error) => {
            log::error!(
                target: log_channels::RECEIVER,
                "[{}] cannot queue message '{}': {}",
                session.client_addr,
                mail.name,
                error
            );
            session.reply(CodeID::LocalError)
        }
    }
}
