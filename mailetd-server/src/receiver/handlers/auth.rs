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
    receiver::{
        dispatcher::CommandHandler,
        session::LineHandler,
        Session,
    },
};
use mailetd_common::{
    re::{base64, log},
    CodeID, HookReturnCode, Mechanism, Reply, Request, StateSMTP,
};
use mailetd_config::AuthMode;

/// "Username:"
const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// "Password:"
const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// AUTH, SASL PLAIN (RFC 4616) and LOGIN
pub struct AuthCmdHandler;

impl CommandHandler for AuthCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["AUTH"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        let auth = &session.config().server.smtp.auth;
        if auth.mode == AuthMode::Disabled {
            return Some(session.reply(CodeID::Unimplemented));
        }
        if session.is_authenticated() {
            return Some(session.reply(CodeID::AuthAlreadyDone));
        }
        if session.stage != StateSMTP::Helo {
            return Some(session.reply(CodeID::BadSequence));
        }

        let (mechanism, initial_response) = match request.argument() {
            Some(argument) => match argument.split_once(' ') {
                Some((mechanism, initial)) => (mechanism, Some(initial.trim())),
                None => (argument, None),
            },
            None => return Some(session.reply(CodeID::SyntaxErrorParams)),
        };

        let mechanism = match mechanism.parse::<Mechanism>() {
            Ok(mechanism) if auth.mechanisms.contains(&mechanism) => mechanism,
            _ => return Some(session.reply(CodeID::AuthMechNotSupported)),
        };

        log::debug!(
            target: log_channels::AUTH,
            "[{}] AUTH {} started",
            session.client_addr,
            mechanism
        );

        Some(match (mechanism, initial_response) {
            (Mechanism::Plain, Some(initial)) => Box::new(PlainResponse).on_line(session, initial),
            (Mechanism::Plain, None) => {
                session.push_line_handler(Box::new(PlainResponse));
                Reply::new(334, "")
            }
            (Mechanism::Login, Some(initial)) => Box::new(LoginUsername).on_line(session, initial),
            (Mechanism::Login, None) => {
                session.push_line_handler(Box::new(LoginUsername));
                Reply::new(334, LOGIN_USERNAME_CHALLENGE)
            }
        })
    }
}

/// decode a client response, `=` stands for an empty one
fn decode_response(session: &Session, line: &str) -> Result<Vec<u8>, Reply> {
    match line.trim() {
        "*" => Err(session.reply(CodeID::AuthClientCanceled)),
        "=" => Ok(vec![]),
        encoded => base64::decode(encoded).map_err(|_| session.reply(CodeID::AuthErrorDecode64)),
    }
}

/// `[authzid] NUL authcid NUL passwd`
fn parse_plain(decoded: &[u8]) -> Option<(String, String)> {
    let parts = decoded
        .split(|b| *b == 0)
        .map(|p| std::str::from_utf8(p).ok())
        .collect::<Option<Vec<_>>>()?;

    // the authorization identity is not used for the credential check
    let (authcid, password) = match parts.as_slice() {
        [_, authcid, password] | [authcid, password] => (*authcid, *password),
        _ => return None,
    };

    if authcid.is_empty() {
        return None;
    }
    Some((authcid.to_string(), password.to_string()))
}

fn authenticate(session: &mut Session, user: &str, password: &str) -> Reply {
    let context = session.context().clone();
    let result = run_hooks(&context.hooks.auth, &context.hooks.result, session, "auth", |h| {
        h.do_auth(session, user, password)
    });

    let reply = hook_reply(
        &result,
        HookReplies {
            ok: session.reply(CodeID::AuthSucceeded),
            deny: session.reply(CodeID::AuthInvalidCredentials),
            deny_soft: session.reply(CodeID::AuthTemporaryFailure),
        },
    )
    .unwrap_or_else(|| session.reply(CodeID::AuthInvalidCredentials));

    if result.code() == HookReturnCode::Ok {
        log::info!(
            target: log_channels::AUTH,
            "[{}] authenticated as '{}'",
            session.client_addr,
            user
        );
        session.user = Some(user.to_string());
    } else {
        log::warn!(
            target: log_channels::AUTH,
            "[{}] authentication failed for '{}'",
            session.client_addr,
            user
        );
    }
    reply
}

struct PlainResponse;

impl LineHandler for PlainResponse {
    fn on_line(self: Box<Self>, session: &mut Session, line: &str) -> Reply {
        let decoded = match decode_response(session, line) {
            Ok(decoded) => decoded,
            Err(reply) => return reply,
        };
        match parse_plain(&decoded) {
            Some((user, password)) => authenticate(session, &user, &password),
            None => session.reply(CodeID::AuthInvalidCredentials),
        }
    }
}

struct LoginUsername;

impl LineHandler for LoginUsername {
    fn on_line(self: Box<Self>, session: &mut Session, line: &str) -> Reply {
        let user = match decode_response(session, line)
            .map(|d| String::from_utf8(d).map_err(|_| session.reply(CodeID::AuthErrorDecode64)))
        {
            Ok(Ok(user)) => user,
            Ok(Err(reply)) | Err(reply) => return reply,
        };
        session.push_line_handler(Box::new(LoginPassword { user }));
        Reply::new(334, LOGIN_PASSWORD_CHALLENGE)
    }
}

struct LoginPassword {
    user: String,
}

impl LineHandler for LoginPassword {
    fn on_line(self: Box<Self>, session: &mut Session, line: &str) -> Reply {
        let password = match decode_response(session, line)
            .map(|d| String::from_utf8(d).map_err(|_| session.reply(CodeID::AuthErrorDecode64)))
        {
            Ok(Ok(password)) => password,
            Ok(Err(reply)) | Err(reply) => return reply,
        };
        authenticate(session, &self.user, &password)
    }
}
