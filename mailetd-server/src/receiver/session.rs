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
use super::ReceiverContext;
use mailetd_common::{Address, CodeID, Reply, StateSMTP};
use mailetd_config::Config;

/// What the client announced with HELO or EHLO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    /// domain (or address literal) given by the client
    pub domain: String,
    /// EHLO was used
    pub extended: bool,
}

/// The envelope and content being received
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    /// reverse path, `None` for `<>`
    pub sender: Option<Address>,
    /// accepted recipients, without duplicate
    pub recipients: Vec<Address>,
    /// `SIZE=` parameter of MAIL FROM
    pub declared_size: Option<usize>,
    /// received content, dot-unstuffed
    pub body: Vec<u8>,
    /// reason to reject the content once the terminator is received
    pub rejection: Option<CodeID>,
}

impl Transaction {
    /// add a recipient, return false if it was already there
    pub fn add_recipient(&mut self, recipient: Address) -> bool {
        if self.recipients.contains(&recipient) {
            false
        } else {
            self.recipients.push(recipient);
            true
        }
    }
}

/// Continuation consuming the next line of the client instead of the
/// command dispatcher (SASL exchanges). A continuation is used once.
pub trait LineHandler: Send {
    /// handle the line, the continuation may install another one
    fn on_line(self: Box<Self>, session: &mut Session, line: &str) -> Reply;
}

/// State of a SMTP session
pub struct Session {
    context: std::sync::Arc<ReceiverContext>,
    /// where the session is in the protocol
    pub stage: StateSMTP,
    /// peer socket address
    pub client_addr: std::net::SocketAddr,
    /// set by HELO/EHLO
    pub helo: Option<Helo>,
    /// set by a successful AUTH
    pub user: Option<String>,
    /// the envelope being built
    pub transaction: Transaction,
    /// the connection must be closed once the reply is sent
    pub stop: bool,
    line_handler: Option<Box<dyn LineHandler>>,
}

impl Session {
    ///
    #[must_use]
    pub fn new(context: std::sync::Arc<ReceiverContext>, client_addr: std::net::SocketAddr) -> Self {
        Self {
            context,
            stage: StateSMTP::Connect,
            client_addr,
            helo: None,
            user: None,
            transaction: Transaction::default(),
            stop: false,
            line_handler: None,
        }
    }

    ///
    #[must_use]
    pub fn context(&self) -> &std::sync::Arc<ReceiverContext> {
        &self.context
    }

    ///
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.context.services.config
    }

    /// the configured reply for `id`
    #[must_use]
    pub fn reply(&self, id: CodeID) -> Reply {
        self.config().reply(id)
    }

    /// drop the envelope, go back to the state following HELO (or before it)
    pub fn reset_transaction(&mut self) {
        self.transaction = Transaction::default();
        if matches!(
            self.stage,
            StateSMTP::Helo | StateSMTP::MailFrom | StateSMTP::RcptTo | StateSMTP::Data
        ) {
            self.stage = if self.helo.is_some() {
                StateSMTP::Helo
            } else {
                StateSMTP::Ready
            };
        }
    }

    ///
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// the client authenticated or connects from an authorized network
    #[must_use]
    pub fn is_relay_allowed(&self) -> bool {
        self.is_authenticated()
            || self
                .config()
                .server
                .smtp
                .authorized_networks
                .iter()
                .any(|net| net.contains(&self.client_addr.ip()))
    }

    /// the next line will be given to `handler`
    pub fn push_line_handler(&mut self, handler: Box<dyn LineHandler>) {
        self.line_handler = Some(handler);
    }

    /// remove the pending continuation
    pub fn take_line_handler(&mut self) -> Option<Box<dyn LineHandler>> {
        self.line_handler.take()
    }
}

#[cfg(test)]
mod tests {
    use super::{Helo, Session};
    use crate::receiver::test_helpers::{get_regular_config, test_context};
    use mailetd_common::StateSMTP;

    #[test]
    fn reset() {
        let context = test_context(get_regular_config()).unwrap();
        let mut session = Session::new(context, "10.1.2.3:1025".parse().unwrap());

        session.stage = StateSMTP::Ready;
        session.reset_transaction();
        assert_eq!(session.stage, StateSMTP::Ready);

        session.helo = Some(Helo {
            domain: "foo".to_string(),
            extended: false,
        });
        session.stage = StateSMTP::RcptTo;
        session.transaction.sender = Some("a@b.com".parse().unwrap());
        assert!(session.transaction.add_recipient("b@c.com".parse().unwrap()));
        assert!(!session.transaction.add_recipient("b@C.COM".parse().unwrap()));
        session.reset_transaction();
        assert_eq!(session.stage, StateSMTP::Helo);
        assert!(session.transaction.sender.is_none());
        assert!(session.transaction.recipients.is_empty());
    }

    #[test]
    fn relay() {
        let context = test_context(get_regular_config()).unwrap();

        let mut session = Session::new(context.clone(), "10.1.2.3:1025".parse().unwrap());
        assert!(!session.is_relay_allowed());
        session.user = Some("alice".to_string());
        assert!(session.is_relay_allowed());

        let session = Session::new(context.clone(), "127.0.0.1:1025".parse().unwrap());
        assert!(session.is_relay_allowed());
        let session = Session::new(context, "[::1]:1025".parse().unwrap());
        assert!(session.is_relay_allowed());
    }
}
