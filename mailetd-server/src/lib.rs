//! mailetd server: SMTP receiver, mail queue and processing pipeline

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

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

/// targets of the log records
pub mod log_channels {
    /// listener and connection limits
    pub const SERVER: &str = "server";
    /// replies and received messages
    pub const RECEIVER: &str = "receiver";
    /// bytes on the wire
    pub const CONNECTION: &str = "receiver::connection";
    /// state of the SMTP session
    pub const TRANSACTION: &str = "receiver::transaction";
    /// registration of the command handlers
    pub const DISPATCHER: &str = "server::dispatcher";
    /// results of the hooks
    pub const HOOKS: &str = "receiver::hooks";
    /// SASL exchanges
    pub const AUTH: &str = "receiver::auth";
    /// spool manager decisions
    pub const SPOOL: &str = "spool";
    /// mail queue
    pub const QUEUE: &str = "spool::queue";
    /// matchers and mailets
    pub const PROCESSOR: &str = "processor";
    /// startup and shutdown of the runtimes
    pub const RUNTIME: &str = "runtime";
}

/// extension points of the SMTP commands
pub mod hooks;
/// matchers, mailets and processors
pub mod processor;
/// SMTP session handling
pub mod receiver;
mod runtime;
mod server;
/// collaborators of the receiver and the processors
pub mod services;
/// durable mail queue
pub mod spool;
mod spool_manager;

pub use runtime::{open_spool, start_runtime};
pub use server::{ConnectionGuard, ConnectionLimiter, Server};
pub use spool_manager::SpoolManager;

/// re-exported module
pub mod re {
    pub use tokio;
}
