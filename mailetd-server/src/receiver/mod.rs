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
use crate::{hooks::Hooks, log_channels, services::Services, spool::MailQueue};
use mailetd_common::{
    re::{anyhow, log},
    CodeID, Reply, Request, StateSMTP,
};

mod connection;
mod dispatcher;
mod handlers;
mod io;
mod session;

pub use connection::Connection;
pub use dispatcher::{CommandDispatcher, CommandHandler, DispatcherBuilder};
pub use handlers::{
    core_handlers, parse_path_argument, AuthCmdHandler, DataCmdHandler, ExpnCmdHandler,
    HeloCmdHandler, HelpCmdHandler, MailCmdHandler, NoopCmdHandler, QuitCmdHandler,
    RcptCmdHandler, RsetCmdHandler, VrfyCmdHandler,
};
pub use io::{AbstractIO, ReadError};
pub use session::{Helo, LineHandler, Session, Transaction};

#[cfg(test)]
mod tests;

/// boilerplate for the tests
#[cfg(test)]
pub mod test_helpers;

/// What a session needs besides its connection
pub struct ReceiverContext {
    /// collaborators shared with the processing pipeline
    pub services: std::sync::Arc<Services>,
    /// hooks called by the command handlers
    pub hooks: Hooks,
    /// where the received mails are written
    pub queue: std::sync::Arc<MailQueue>,
}

fn on_line(session: &mut Session, dispatcher: &CommandDispatcher, line: &[u8]) -> Option<Reply> {
    if let Some(handler) = session.take_line_handler() {
        return Some(handler.on_line(session, &String::from_utf8_lossy(line)));
    }

    if session.stage == StateSMTP::Data {
        return handlers::on_data_line(session, line);
    }

    let line = String::from_utf8_lossy(line);
    log::trace!(
        target: log_channels::RECEIVER,
        "[{}] buffer=\"{}\"",
        session.client_addr,
        line
    );
    Some(match Request::decode(&line) {
        Ok(request) => dispatcher.dispatch(session, &request),
        Err(id) => session.reply(id),
    })
}

/// Receives the incomings mail of a connection
///
/// # Errors
///
/// * server failed to send a message
/// * the client made too many errors
pub async fn handle_connection<S>(
    conn: &mut Connection<S>,
    context: std::sync::Arc<ReceiverContext>,
    dispatcher: &CommandDispatcher,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let mut session = Session::new(context, conn.client_addr);
    let timeout = conn.config.server.smtp.timeout_client;

    conn.send_code(CodeID::Greetings).await?;
    session.stage = StateSMTP::Ready;

    while conn.is_alive && !session.stop {
        let line = match conn.read(timeout).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::info!(
                    target: log_channels::RECEIVER,
                    "[{}] connection closed by the client",
                    conn.client_addr
                );
                break;
            }
            Err(ReadError::Timeout) => {
                log::info!(
                    target: log_channels::RECEIVER,
                    "[{}] idle for {:?}, closing",
                    conn.client_addr,
                    timeout
                );
                conn.send_code(CodeID::Timeout).await?;
                break;
            }
            Err(ReadError::LineTooLong) if session.stage == StateSMTP::Data => {
                handlers::on_line_too_long(&mut session);
                continue;
            }
            Err(ReadError::LineTooLong) => {
                session.take_line_handler();
                conn.send_code(CodeID::LineTooLong).await?;
                continue;
            }
            Err(ReadError::Io(error)) => return Err(error.into()),
        };

        if let Some(reply) = on_line(&mut session, dispatcher, &line) {
            conn.send_reply(&reply).await?;
        }
    }

    if conn.is_alive {
        conn.shutdown().await?;
    }
    Ok(())
}
