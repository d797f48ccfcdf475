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
    log_channels,
    receiver::{handle_connection, CommandDispatcher, Connection, ReceiverContext},
};
use mailetd_common::{
    re::{anyhow, log},
    CodeID,
};

#[derive(Default)]
struct Counters {
    total: i64,
    per_ip: std::collections::HashMap<std::net::IpAddr, i64>,
}

/// Global and per-IP limits on the number of opened sessions, `-1` means
/// no limit
pub struct ConnectionLimiter {
    max: i64,
    max_per_ip: i64,
    counters: std::sync::Mutex<Counters>,
}

/// Hold a slot of the [`ConnectionLimiter`], released on drop
pub struct ConnectionGuard {
    limiter: std::sync::Arc<ConnectionLimiter>,
    ip: std::net::IpAddr,
}

impl ConnectionLimiter {
    ///
    #[must_use]
    pub fn new(max: i64, max_per_ip: i64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            max,
            max_per_ip,
            counters: std::sync::Mutex::new(Counters::default()),
        })
    }

    /// take a slot for `ip`, `None` if a limit is reached
    #[must_use]
    pub fn acquire(self: &std::sync::Arc<Self>, ip: std::net::IpAddr) -> Option<ConnectionGuard> {
        let mut counters = self.counters.lock().ok()?;
        let for_ip = counters.per_ip.get(&ip).copied().unwrap_or(0);
        if (self.max != -1 && counters.total >= self.max)
            || (self.max_per_ip != -1 && for_ip >= self.max_per_ip)
        {
            return None;
        }
        counters.total += 1;
        counters.per_ip.insert(ip, for_ip + 1);
        Some(ConnectionGuard {
            limiter: self.clone(),
            ip,
        })
    }

    /// number of opened sessions
    #[must_use]
    pub fn count(&self) -> i64 {
        self.counters.lock().map_or(0, |c| c.total)
    }

    /// number of opened sessions from `ip`
    #[must_use]
    pub fn count_for(&self, ip: std::net::IpAddr) -> i64 {
        self.counters
            .lock()
            .map_or(0, |c| c.per_ip.get(&ip).copied().unwrap_or(0))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Ok(mut counters) = self.limiter.counters.lock() {
            counters.total -= 1;
            if let Some(count) = counters.per_ip.get_mut(&self.ip) {
                *count -= 1;
                if *count <= 0 {
                    counters.per_ip.remove(&self.ip);
                }
            }
        }
    }
}

/// TCP/IP server
pub struct Server {
    listeners: Vec<tokio::net::TcpListener>,
    context: std::sync::Arc<ReceiverContext>,
    dispatcher: std::sync::Arc<CommandDispatcher>,
    limiter: std::sync::Arc<ConnectionLimiter>,
}

impl Server {
    /// Create a server with the sockets already bound
    ///
    /// # Errors
    ///
    /// * cannot convert sockets to [`tokio::net::TcpListener`]
    pub fn new(
        context: std::sync::Arc<ReceiverContext>,
        dispatcher: std::sync::Arc<CommandDispatcher>,
        sockets: Vec<std::net::TcpListener>,
    ) -> anyhow::Result<Self> {
        let config = &context.services.config;
        let limiter = ConnectionLimiter::new(
            config.server.client_count_max,
            config.server.client_count_max_per_ip,
        );
        Ok(Self {
            listeners: sockets
                .into_iter()
                .map(|socket| {
                    socket.set_nonblocking(true)?;
                    tokio::net::TcpListener::from_std(socket)
                })
                .collect::<std::io::Result<Vec<_>>>()?,
            context,
            dispatcher,
            limiter,
        })
    }

    /// Get the local address of the tcp listeners
    ///
    /// # Errors
    ///
    /// * a socket has no local address
    pub fn addr(&self) -> std::io::Result<Vec<std::net::SocketAddr>> {
        self.listeners
            .iter()
            .map(tokio::net::TcpListener::local_addr)
            .collect()
    }

    ///
    #[must_use]
    pub fn limiter(&self) -> &std::sync::Arc<ConnectionLimiter> {
        &self.limiter
    }

    /// Accept the clients on every listener, each session runs in its own task
    ///
    /// # Errors
    ///
    /// * an accept loop panicked
    pub async fn listen_and_serve(self) -> anyhow::Result<()> {
        let Self {
            listeners,
            context,
            dispatcher,
            limiter,
        } = self;

        let loops = listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(Self::accept_loop(
                    listener,
                    context.clone(),
                    dispatcher.clone(),
                    limiter.clone(),
                ))
            })
            .collect::<Vec<_>>();

        for accept_loop in loops {
            accept_loop.await?;
        }
        Ok(())
    }

    async fn accept_loop(
        listener: tokio::net::TcpListener,
        context: std::sync::Arc<ReceiverContext>,
        dispatcher: std::sync::Arc<CommandDispatcher>,
        limiter: std::sync::Arc<ConnectionLimiter>,
    ) {
        loop {
            let (stream, client_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    log::warn!(target: log_channels::SERVER, "accept failed: {}", error);
                    continue;
                }
            };
            log::info!(target: log_channels::SERVER, "Connection from: {}", client_addr);

            match limiter.acquire(client_addr.ip()) {
                Some(guard) => {
                    tokio::spawn(Self::run_session(
                        stream,
                        client_addr,
                        context.clone(),
                        dispatcher.clone(),
                        guard,
                    ));
                }
                None => {
                    log::warn!(
                        target: log_channels::SERVER,
                        "Connection from {} refused, too many clients",
                        client_addr
                    );
                    let reply = context.services.config.reply(CodeID::ConnectionMaxReached);
                    tokio::spawn(Self::refuse(stream, reply.encode()));
                }
            }
        }
    }

    async fn refuse(mut stream: tokio::net::TcpStream, reply: String) {
        if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut stream, reply.as_bytes()).await {
            log::warn!(target: log_channels::SERVER, "{}", e);
        }
        if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
            log::warn!(target: log_channels::SERVER, "{}", e);
        }
    }

    async fn run_session(
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
        context: std::sync::Arc<ReceiverContext>,
        dispatcher: std::sync::Arc<CommandDispatcher>,
        _guard: ConnectionGuard,
    ) {
        let begin = std::time::SystemTime::now();
        let mut conn = Connection::new(client_addr, context.services.config.clone(), stream);

        match handle_connection(&mut conn, context, &dispatcher).await {
            Ok(()) => log::info!(
                target: log_channels::SERVER,
                "{{ elapsed: {:?} }} Connection {} closed cleanly",
                begin.elapsed(),
                client_addr,
            ),
            Err(error) => log::warn!(
                target: log_channels::SERVER,
                "{{ elapsed: {:?} }} Connection {} closed with an error {}",
                begin.elapsed(),
                client_addr,
                error,
            ),
        }
    }
}
