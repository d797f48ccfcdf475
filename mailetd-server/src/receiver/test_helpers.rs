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
use super::{connection::Connection, dispatcher::CommandDispatcher, handle_connection, ReceiverContext};
use crate::{hooks::Hooks, services::Services, spool::MailQueue};
use mailetd_common::{
    re::anyhow, MailRepository, MemoryMailRepository, MemoryRecipientRewriteTable,
    MemoryUsersRepository, RepositoryDeliveryAgent,
};
use mailetd_config::Config;

/// A type implementing AsyncRead+AsyncWrite to emulate sockets
pub struct Mock {
    read_cursor: std::io::Cursor<Vec<u8>>,
    written: Vec<u8>,
}

impl Mock {
    /// Create an new instance, `read` is what the client sends
    #[must_use]
    pub fn new(read: Vec<u8>) -> Self {
        Self {
            read_cursor: std::io::Cursor::new(read),
            written: vec![],
        }
    }

    /// what the server wrote so far
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl tokio::io::AsyncRead for Mock {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let n = std::io::Read::read(&mut self.read_cursor, buf.initialize_unfilled())?;
        buf.advance(n);
        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for Mock {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.written.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// configuration used by the receiver's tests: `testserver.com`, no error
/// throttling, users `alice` and `bob`.
#[must_use]
pub fn get_regular_config() -> Config {
    let mut config = Config::default();
    config.server.domain = "testserver.com".to_string();
    config.server.smtp.local_domains = vec!["testserver.com".to_string()];
    config.server.smtp.error.soft_count = -1;
    config.server.smtp.error.hard_count = -1;
    config.app.users = [("alice", "secret"), ("bob", "hunter2")]
        .into_iter()
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .collect();
    config
}

/// services, hooks and queue kept in memory
///
/// # Errors
///
/// * the configuration is invalid
pub fn test_context(config: Config) -> anyhow::Result<std::sync::Arc<ReceiverContext>> {
    let config = std::sync::Arc::new(config);

    let repositories = ["error", "inbox", "outgoing"]
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                std::sync::Arc::new(MemoryMailRepository::default())
                    as std::sync::Arc<dyn MailRepository>,
            )
        })
        .collect::<std::collections::BTreeMap<_, _>>();

    let services = Services::new(
        config.clone(),
        std::sync::Arc::new(MemoryUsersRepository::new(config.app.users.clone())),
        std::sync::Arc::new(MemoryRecipientRewriteTable::new(config.app.mappings.clone())),
        std::sync::Arc::new(RepositoryDeliveryAgent::new(repositories["outgoing"].clone())),
        repositories,
    )?;

    let queue = MailQueue::open(
        std::sync::Arc::new(MemoryMailRepository::default()),
        config.server.queues.lease,
    )?;

    Ok(std::sync::Arc::new(ReceiverContext {
        services: std::sync::Arc::new(services),
        hooks: Hooks::with_builtin(),
        queue: std::sync::Arc::new(queue),
    }))
}

/// run a whole session with `smtp_input` and compare the transcript with `expected_output`
///
/// # Errors
///
/// * the session failed
///
/// # Panics
///
/// * the transcript is not the one expected
pub async fn test_receiver_inner(
    address: &str,
    context: std::sync::Arc<ReceiverContext>,
    smtp_input: &[u8],
    expected_output: &[u8],
) -> anyhow::Result<()> {
    let config = context.services.config.clone();
    let dispatcher = CommandDispatcher::core(&config)?;

    let mut conn = Connection::new(
        address.parse()?,
        config,
        Mock::new(smtp_input.to_vec()),
    );
    let result = handle_connection(&mut conn, context, &dispatcher).await;
    let mock = conn.into_inner();

    pretty_assertions::assert_eq!(
        std::str::from_utf8(expected_output),
        std::str::from_utf8(mock.written()),
    );

    result
}

/// should only be on test
#[macro_export]
macro_rules! test_receiver {
    ($input:expr, $output:expr) => {
        test_receiver! {
            with_config => $crate::receiver::test_helpers::get_regular_config(),
            $input,
            $output
        }
    };
    (with_config => $config:expr, $input:expr, $output:expr) => {
        test_receiver! {
            with_context => $crate::receiver::test_helpers::test_context($config).unwrap(),
            $input,
            $output
        }
    };
    (with_context => $context:expr, $input:expr, $output:expr) => {
        test_receiver! {
            from => "127.0.0.1:53000",
            with_context => $context,
            $input,
            $output
        }
    };
    (from => $address:expr, with_context => $context:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_helpers::test_receiver_inner(
            $address,
            $context,
            $input.as_bytes(),
            $output.as_bytes(),
        )
        .await
    };
}
