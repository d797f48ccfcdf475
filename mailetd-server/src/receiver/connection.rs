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
use super::io::{AbstractIO, ReadError};
use crate::log_channels;
use mailetd_common::{
    re::{anyhow, log},
    CodeID, Reply,
};
use mailetd_config::Config;

/// Instance containing connection to the server's information
pub struct Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// connection timestamp
    pub timestamp: std::time::SystemTime,
    /// is still alive
    pub is_alive: bool,
    /// server's configuration
    pub config: std::sync::Arc<Config>,
    /// peer socket address
    pub client_addr: std::net::SocketAddr,
    /// number of error the client made so far
    pub error_count: i64,
    io: AbstractIO<S>,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub fn new(client_addr: std::net::SocketAddr, config: std::sync::Arc<Config>, stream: S) -> Self {
        let line_length_max = config.server.smtp.line_length_max;
        Self {
            timestamp: std::time::SystemTime::now(),
            is_alive: true,
            config,
            client_addr,
            error_count: 0,
            io: AbstractIO::new(stream, line_length_max),
        }
    }

    /// send the configured reply for `id`
    ///
    /// # Errors
    ///
    /// see [`Connection::send_reply`]
    pub async fn send_code(&mut self, id: CodeID) -> anyhow::Result<()> {
        let reply = self.config.reply(id);
        self.send_reply(&reply).await
    }

    /// send a reply to the client, counting the errors
    ///
    /// Past `soft_count` errors each error reply is delayed, past `hard_count`
    /// the client is told it made too many errors and the connection ends.
    ///
    /// # Errors
    ///
    /// * the client made too many errors
    /// * internal connection writer error
    pub async fn send_reply(&mut self, reply: &Reply) -> anyhow::Result<()> {
        if !reply.is_error() || reply.is_closing() {
            return self.send(&reply.encode()).await;
        }

        self.error_count += 1;
        let hard_error = self.config.server.smtp.error.hard_count;
        let soft_error = self.config.server.smtp.error.soft_count;

        if hard_error != -1 && self.error_count >= hard_error {
            let too_many = self.config.reply(CodeID::TooManyError);
            let mut response = Reply::multiline(too_many.code(), reply.lines().to_vec());
            for line in too_many.lines() {
                response.push_line(line.clone());
            }
            self.send(&response.encode()).await?;
            self.is_alive = false;

            anyhow::bail!("too many errors")
        }

        self.send(&reply.encode()).await?;

        if soft_error != -1 && self.error_count >= soft_error {
            tokio::time::sleep(self.config.server.smtp.error.delay).await;
        }
        Ok(())
    }

    /// Send a buffer
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        log::info!(target: log_channels::CONNECTION, "send=\"{:?}\"", reply);

        self.io.write_all(reply.as_bytes()).await?;
        Ok(())
    }

    /// read a line from the client, without its terminator
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * line too long
    /// * stream's error
    pub async fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        self.io.next_line(timeout).await
    }

    /// close the connection
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.is_alive = false;
        self.io.shutdown().await?;
        Ok(())
    }

    /// get back the stream
    pub fn into_inner(self) -> S {
        self.io.into_inner()
    }
}
