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
use crate::receiver::{dispatcher::CommandHandler, Session};
use mailetd_common::{CodeID, Reply, Request};

/// RSET, the transaction has already been dropped by the dispatcher
pub struct RsetCmdHandler;

impl CommandHandler for RsetCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["RSET"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        Some(session.reply(if request.argument().is_some() {
            CodeID::SyntaxErrorParams
        } else {
            CodeID::Ok
        }))
    }
}

/// NOOP
pub struct NoopCmdHandler;

impl CommandHandler for NoopCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["NOOP"]
    }

    fn on_command(&self, session: &mut Session, _: &Request) -> Option<Reply> {
        Some(session.reply(CodeID::Ok))
    }
}

/// QUIT
pub struct QuitCmdHandler;

impl CommandHandler for QuitCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["QUIT"]
    }

    fn on_command(&self, session: &mut Session, _: &Request) -> Option<Reply> {
        session.stop = true;
        Some(session.reply(CodeID::Closing))
    }
}

/// HELP
pub struct HelpCmdHandler;

impl CommandHandler for HelpCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["HELP"]
    }

    fn on_command(&self, session: &mut Session, _: &Request) -> Option<Reply> {
        Some(session.reply(CodeID::Help))
    }
}

/// VRFY, never discloses the users
pub struct VrfyCmdHandler;

impl CommandHandler for VrfyCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["VRFY"]
    }

    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply> {
        Some(session.reply(if request.argument().is_none() {
            CodeID::SyntaxErrorParams
        } else {
            CodeID::CannotVerify
        }))
    }
}

/// EXPN
pub struct ExpnCmdHandler;

impl CommandHandler for ExpnCmdHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["EXPN"]
    }

    fn on_command(&self, session: &mut Session, _: &Request) -> Option<Reply> {
        Some(session.reply(CodeID::Unimplemented))
    }
}
