//! mailetd common definitions

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

mod address;
mod code;
mod delivery;
mod hook;
mod mail;
mod mail_repository;
mod mechanism;
mod reply;
mod request;
mod rrt;
mod state;
mod users;

pub use address::Address;
pub use code::CodeID;
pub use delivery::{DeliveryAgent, NoDeliveryAgent, RepositoryDeliveryAgent};
pub use hook::{HookResult, HookReturnCode};
pub use mail::{Body, Mail};
pub use mail_repository::{check_key, FileMailRepository, MailRepository, MemoryMailRepository};
pub use mechanism::Mechanism;
pub use reply::Reply;
pub use request::Request;
pub use rrt::{MemoryRecipientRewriteTable, RecipientRewriteTable, MAPPING_DEPTH_MAX};
pub use state::{MailState, StateSMTP, ERROR_PROCESSOR, GHOST, ROOT_PROCESSOR};
pub use users::{MemoryUsersRepository, UsersRepository};

/// re-exported module
pub mod re {
    pub use addr;
    pub use anyhow;
    pub use base64;
    pub use log;
    pub use serde_json;
    pub use strum;
}
