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
use super::{handlers, Session};
use crate::log_channels;
use mailetd_common::{
    re::{anyhow, log},
    CodeID, Reply, Request,
};
use mailetd_config::Config;

/// verbs every dispatcher must handle
const MANDATORY_VERBS: [&str; 3] = ["MAIL", "RCPT", "QUIT"];

/// Handle the commands of one or more verbs
pub trait CommandHandler: Send + Sync {
    /// the upper-cased verbs handled
    fn verbs(&self) -> &'static [&'static str];

    /// `None` lets the next handler registered for the verb respond
    fn on_command(&self, session: &mut Session, request: &Request) -> Option<Reply>;
}

/// Route each request to the handlers registered for its verb, the first
/// handler producing a reply wins.
pub struct CommandDispatcher {
    handlers: std::collections::HashMap<String, Vec<std::sync::Arc<dyn CommandHandler>>>,
}

/// Register the handlers of a [`CommandDispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: std::collections::HashMap<String, Vec<std::sync::Arc<dyn CommandHandler>>>,
    disabled: Vec<String>,
}

impl DispatcherBuilder {
    /// add a handler after the ones already registered for its verbs
    #[must_use]
    pub fn register(mut self, handler: std::sync::Arc<dyn CommandHandler>) -> Self {
        for verb in handler.verbs() {
            let registered = self.handlers.entry(verb.to_ascii_uppercase()).or_default();
            if !registered.is_empty() {
                log::warn!(
                    target: log_channels::DISPATCHER,
                    "verb '{}' has {} handlers, they are tried in registration order",
                    verb,
                    registered.len() + 1
                );
            }
            registered.push(handler.clone());
        }
        self
    }

    /// remove every handler of these verbs
    #[must_use]
    pub fn disable(mut self, verbs: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.disabled
            .extend(verbs.into_iter().map(|v| v.as_ref().to_ascii_uppercase()));
        self
    }

    ///
    /// # Errors
    ///
    /// * MAIL, RCPT or QUIT has no handler
    pub fn build(mut self) -> anyhow::Result<CommandDispatcher> {
        for verb in &self.disabled {
            if self.handlers.remove(verb).is_some() {
                log::info!(target: log_channels::DISPATCHER, "command '{}' disabled", verb);
            }
        }

        for verb in MANDATORY_VERBS {
            if !self.handlers.contains_key(verb) {
                anyhow::bail!("no handler for the mandatory command '{}'", verb);
            }
        }

        Ok(CommandDispatcher {
            handlers: self.handlers,
        })
    }
}

impl CommandDispatcher {
    ///
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// the core SMTP commands minus the ones disabled in the configuration
    ///
    /// # Errors
    ///
    /// * a mandatory command has been disabled
    pub fn core(config: &Config) -> anyhow::Result<Self> {
        handlers::core_handlers()
            .into_iter()
            .fold(Self::builder(), DispatcherBuilder::register)
            .disable(&config.server.smtp.disabled_commands)
            .build()
    }

    /// the verbs with at least one handler, sorted
    #[must_use]
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs = self.handlers.keys().map(String::as_str).collect::<Vec<_>>();
        verbs.sort_unstable();
        verbs
    }

    /// produce the reply of `request`
    pub fn dispatch(&self, session: &mut Session, request: &Request) -> Reply {
        if matches!(request.verb(), "HELO" | "EHLO" | "RSET") {
            session.reset_transaction();
        }
        let stage = session.stage;

        let reply = self
            .handlers
            .get(request.verb())
            .and_then(|handlers| {
                handlers
                    .iter()
                    .find_map(|handler| handler.on_command(session, request))
            })
            .unwrap_or_else(|| session.reply(CodeID::UnrecognizedCommand));

        if reply.is_closing() {
            session.stop = true;
        }
        if session.stage != stage {
            log::trace!(
                target: log_channels::TRANSACTION,
                "[{}] {} => {}, stage {} => {}",
                session.client_addr,
                request.verb(),
                reply.code(),
                stage,
                session.stage
            );
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandDispatcher, CommandHandler};
    use crate::receiver::{
        test_helpers::{get_regular_config, test_context},
        Session,
    };
    use mailetd_common::{Reply, Request};

    struct Fixed {
        verbs: &'static [&'static str],
        reply: Option<u16>,
    }

    impl CommandHandler for Fixed {
        fn verbs(&self) -> &'static [&'static str] {
            self.verbs
        }

        fn on_command(&self, _: &mut Session, _: &Request) -> Option<Reply> {
            self.reply.map(|code| Reply::new(code, "fixed"))
        }
    }

    fn mandatory() -> std::sync::Arc<Fixed> {
        std::sync::Arc::new(Fixed {
            verbs: &["MAIL", "RCPT", "QUIT"],
            reply: Some(221),
        })
    }

    #[test]
    fn first_reply_wins() {
        let dispatcher = CommandDispatcher::builder()
            .register(mandatory())
            .register(std::sync::Arc::new(Fixed {
                verbs: &["XTEST"],
                reply: None,
            }))
            .register(std::sync::Arc::new(Fixed {
                verbs: &["XTEST"],
                reply: Some(250),
            }))
            .register(std::sync::Arc::new(Fixed {
                verbs: &["XTEST"],
                reply: Some(251),
            }))
            .build()
            .unwrap();

        let mut session = Session::new(
            test_context(get_regular_config()).unwrap(),
            "127.0.0.1:25".parse().unwrap(),
        );

        assert_eq!(
            dispatcher.dispatch(&mut session, &Request::new("xtest", None)),
            Reply::new(250, "fixed")
        );
        assert!(!session.stop);
        assert_eq!(
            dispatcher
                .dispatch(&mut session, &Request::new("FOO", None))
                .code(),
            500
        );
        assert_eq!(
            dispatcher
                .dispatch(&mut session, &Request::new("QUIT", None))
                .code(),
            221
        );
        assert!(session.stop);
        assert_eq!(dispatcher.verbs(), vec!["MAIL", "QUIT", "RCPT", "XTEST"]);
    }

    #[test]
    fn mandatory_verbs() {
        assert!(CommandDispatcher::builder().build().is_err());
        assert!(CommandDispatcher::builder()
            .register(mandatory())
            .disable(["rcpt"])
            .build()
            .is_err());
    }

    #[test]
    fn disabled_from_config() {
        let mut config = get_regular_config();
        config.server.smtp.disabled_commands = vec!["vrfy".to_string()];
        let dispatcher = CommandDispatcher::core(&config).unwrap();
        assert!(!dispatcher.verbs().contains(&"VRFY"));
        assert!(dispatcher.verbs().contains(&"EXPN"));
    }
}
