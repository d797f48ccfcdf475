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
use crate::{log_channels, receiver::Session};
use mailetd_common::{
    re::log, Address, CodeID, HookResult, HookReturnCode, Mail, Reply,
};
use mailetd_config::AuthMode;

/// Called on HELO and EHLO
pub trait HeloHook: Send + Sync {
    ///
    fn do_helo(&self, session: &Session, helo: &str) -> HookResult;
}

/// Called on MAIL FROM, `sender` is `None` for `<>`
pub trait MailHook: Send + Sync {
    ///
    fn do_mail(&self, session: &Session, sender: Option<&Address>) -> HookResult;
}

/// Called on RCPT TO
pub trait RcptHook: Send + Sync {
    ///
    fn do_rcpt(&self, session: &Session, sender: Option<&Address>, rcpt: &Address) -> HookResult;
}

/// Called with the credentials decoded by the AUTH exchange
pub trait AuthHook: Send + Sync {
    ///
    fn do_auth(&self, session: &Session, user: &str, password: &str) -> HookResult;
}

/// Called once the message is received, before it is queued
pub trait MessageHook: Send + Sync {
    ///
    fn on_message(&self, session: &Session, mail: &mut Mail) -> HookResult;
}

/// Observe, and possibly rewrite, the result of every other hook
pub trait HookResultHook: Send + Sync {
    ///
    fn on_hook_result(&self, session: &Session, hook: &str, result: HookResult) -> HookResult;
}

/// Hooks called by the command handlers, in registration order
#[derive(Default, Clone)]
pub struct Hooks {
    ///
    pub helo: Vec<std::sync::Arc<dyn HeloHook>>,
    ///
    pub mail: Vec<std::sync::Arc<dyn MailHook>>,
    ///
    pub rcpt: Vec<std::sync::Arc<dyn RcptHook>>,
    ///
    pub auth: Vec<std::sync::Arc<dyn AuthHook>>,
    ///
    pub message: Vec<std::sync::Arc<dyn MessageHook>>,
    ///
    pub result: Vec<std::sync::Arc<dyn HookResultHook>>,
}

impl Hooks {
    /// the hooks enforcing the server's policy: identity of the sender,
    /// relaying, existence of the local recipients, credentials checked
    /// against the users repository.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self {
            mail: vec![std::sync::Arc::new(SenderIdentityHook)],
            rcpt: vec![
                std::sync::Arc::new(AuthRequiredToRelayHook),
                std::sync::Arc::new(ValidRcptHook),
            ],
            auth: vec![std::sync::Arc::new(UsersRepositoryAuthHook)],
            result: vec![std::sync::Arc::new(LogHookResult)],
            ..Self::default()
        }
    }
}

/// Run `hooks` until one of them returns something else than DECLINED.
/// Each result goes through the result hooks first.
pub fn run_hooks<H: ?Sized>(
    hooks: &[std::sync::Arc<H>],
    result_hooks: &[std::sync::Arc<dyn HookResultHook>],
    session: &Session,
    name: &str,
    mut call: impl FnMut(&H) -> HookResult,
) -> HookResult {
    for hook in hooks {
        let result = result_hooks
            .iter()
            .fold(call(hook.as_ref()), |result, r| {
                r.on_hook_result(session, name, result)
            });
        if result.is_decisive() {
            return result;
        }
    }
    HookResult::declined()
}

/// Default replies of a command, used when the hook does not provide one
pub struct HookReplies {
    ///
    pub ok: Reply,
    ///
    pub deny: Reply,
    ///
    pub deny_soft: Reply,
}

/// the reply for a decisive result, `None` if every hook declined
#[must_use]
pub fn hook_reply(result: &HookResult, replies: HookReplies) -> Option<Reply> {
    let default = match result.code() {
        HookReturnCode::Ok => replies.ok,
        HookReturnCode::Deny => replies.deny,
        HookReturnCode::DenySoft => replies.deny_soft,
        HookReturnCode::Declined => return None,
    };

    Some(match (result.smtp_code(), result.description()) {
        (Some(code), Some(description)) => Reply::new(code, description),
        (Some(code), None) => Reply::multiline(code, default.lines().to_vec()),
        (None, Some(description)) => Reply::new(default.code(), description),
        (None, None) => default,
    })
}

fn deny_with(session: &Session, result: HookResult, id: CodeID) -> HookResult {
    let reply = session.reply(id);
    result.with_reply(reply.code(), reply.text())
}

/// A sender of a local domain must be the authenticated user
pub struct SenderIdentityHook;

impl MailHook for SenderIdentityHook {
    fn do_mail(&self, session: &Session, sender: Option<&Address>) -> HookResult {
        let (sender, user) = match (sender, &session.user) {
            (Some(sender), Some(user)) => (sender, user),
            _ => return HookResult::declined(),
        };
        let services = &session.context().services;

        if !session.config().server.smtp.verify_identity
            || !services.is_local_domain(sender.domain())
            || user == sender.local_part()
            || user.eq_ignore_ascii_case(sender.full())
        {
            return HookResult::declined();
        }

        log::warn!(
            target: log_channels::HOOKS,
            "user '{}' tried to send as '{}'",
            user,
            sender
        );
        deny_with(session, HookResult::deny(), CodeID::IdentityMismatch)
    }
}

/// Relaying to a remote domain requires an authenticated user or an
/// authorized network
pub struct AuthRequiredToRelayHook;

impl RcptHook for AuthRequiredToRelayHook {
    fn do_rcpt(&self, session: &Session, _: Option<&Address>, rcpt: &Address) -> HookResult {
        if session.context().services.is_local_domain(rcpt.domain()) || session.is_relay_allowed() {
            return HookResult::declined();
        }

        log::info!(
            target: log_channels::HOOKS,
            "relaying to '{}' denied for {}",
            rcpt,
            session.client_addr
        );
        match session.config().server.smtp.auth.mode {
            AuthMode::Required => deny_with(session, HookResult::deny(), CodeID::AuthRequired),
            AuthMode::Announce | AuthMode::Disabled => {
                deny_with(session, HookResult::deny(), CodeID::RelayDenied)
            }
        }
    }
}

/// A recipient of a local domain must be a user, an alias or the postmaster
pub struct ValidRcptHook;

impl RcptHook for ValidRcptHook {
    fn do_rcpt(&self, session: &Session, _: Option<&Address>, rcpt: &Address) -> HookResult {
        let services = &session.context().services;
        if !services.is_local_domain(rcpt.domain()) {
            return HookResult::declined();
        }

        match services.is_local_user(rcpt) {
            Ok(true) => HookResult::declined(),
            Ok(false) => deny_with(session, HookResult::deny(), CodeID::UnknownUser),
            Err(error) => {
                log::error!(
                    target: log_channels::HOOKS,
                    "cannot check recipient '{}': {}",
                    rcpt,
                    error
                );
                deny_with(session, HookResult::deny_soft(), CodeID::DeniedSoft)
            }
        }
    }
}

/// Check the credentials against the users repository
pub struct UsersRepositoryAuthHook;

impl AuthHook for UsersRepositoryAuthHook {
    fn do_auth(&self, session: &Session, user: &str, password: &str) -> HookResult {
        match session
            .context()
            .services
            .users
            .authenticate(user, password)
        {
            Ok(true) => HookResult::ok(),
            Ok(false) => HookResult::declined(),
            Err(error) => {
                log::error!(
                    target: log_channels::HOOKS,
                    "users repository failed: {}",
                    error
                );
                HookResult::deny_soft()
            }
        }
    }
}

/// Log the decisive results
pub struct LogHookResult;

impl HookResultHook for LogHookResult {
    fn on_hook_result(&self, session: &Session, hook: &str, result: HookResult) -> HookResult {
        if result.is_decisive() {
            log::debug!(
                target: log_channels::HOOKS,
                "[{}] hook '{}' returned {}",
                session.client_addr,
                hook,
                result.code()
            );
        }
        result
    }
}
