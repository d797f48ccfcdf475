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
use crate::{Address, MailState};

/// Content of a message
///
/// The content held by a repository is only read when needed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum Body {
    /// Nothing
    Empty,
    /// The raw representation of the message
    Raw(Vec<u8>),
    /// The raw representation is stored in a file
    Spooled(std::path::PathBuf),
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

/// A message moving through the processing pipeline: the envelope,
/// the content and the metadata attached by the processors.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Mail {
    /// unique key of the mail
    pub name: String,
    /// reverse path, `None` for the null sender `<>`
    pub sender: Option<Address>,
    recipients: Vec<Address>,
    /// user defined attributes
    pub attributes: std::collections::BTreeMap<String, serde_json::Value>,
    /// name of the next processor
    pub state: MailState,
    /// why the mail has been routed to the error processor
    pub error_message: Option<String>,
    /// last time the mail has been stored
    pub last_updated: std::time::SystemTime,
    /// name of the client which sent the mail
    pub remote_host: String,
    /// address of the client which sent the mail
    pub remote_addr: std::net::IpAddr,
    /// content of the message
    pub body: Body,
    #[serde(skip)]
    deferred: Option<std::time::Duration>,
}

impl Mail {
    /// build a mail in the root state
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sender: Option<Address>,
        recipients: impl IntoIterator<Item = Address>,
        body: Vec<u8>,
    ) -> Self {
        let mut mail = Self {
            name: name.into(),
            sender,
            recipients: vec![],
            attributes: std::collections::BTreeMap::new(),
            state: MailState::root(),
            error_message: None,
            last_updated: std::time::SystemTime::now(),
            remote_host: "localhost".to_string(),
            remote_addr: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            body: Body::Raw(body),
            deferred: None,
        };
        mail.set_recipients(recipients);
        mail
    }

    /// produce a unique mail name
    ///
    /// format: {timestamp}.{random}.{process id}
    #[must_use]
    pub fn generate_name() -> String {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let random = std::iter::repeat_with(fastrand::alphanumeric)
            .take(8)
            .collect::<String>();
        format!("{timestamp}.{random}.{}", std::process::id())
    }

    /// deserialize a mail written with serde.
    ///
    /// # Errors
    /// * Failed to read the file
    /// * Failed deserialize to the Mail struct.
    pub fn from_file<P>(file: P) -> anyhow::Result<Self>
    where
        P: AsRef<std::path::Path>,
    {
        Ok(serde_json::from_str(&std::fs::read_to_string(file)?)?)
    }

    /// recipients, in the order they have been added
    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// add a recipient, return false if it was already there
    pub fn add_recipient(&mut self, recipient: Address) -> bool {
        if self.recipients.contains(&recipient) {
            false
        } else {
            self.recipients.push(recipient);
            true
        }
    }

    /// remove a recipient, return false if it was not there
    pub fn remove_recipient(&mut self, recipient: &Address) -> bool {
        let len = self.recipients.len();
        self.recipients.retain(|r| r != recipient);
        len != self.recipients.len()
    }

    /// replace the recipients, duplicates are dropped
    pub fn set_recipients(&mut self, recipients: impl IntoIterator<Item = Address>) {
        self.recipients.clear();
        for i in recipients {
            self.add_recipient(i);
        }
    }

    /// take the recipients out of the mail
    pub fn take_recipients(&mut self) -> Vec<Address> {
        std::mem::take(&mut self.recipients)
    }

    /// ask the spool to process the mail again in `delay`, in the same state
    pub fn defer(&mut self, delay: std::time::Duration) {
        self.deferred = Some(delay);
    }

    /// has the mail been deferred by a mailet
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// consume the deferral
    pub fn take_deferred(&mut self) -> Option<std::time::Duration> {
        self.deferred.take()
    }

    /// read the content of the message
    ///
    /// # Errors
    ///
    /// * the spooled content cannot be read
    pub fn content(&self) -> anyhow::Result<std::borrow::Cow<'_, [u8]>> {
        match &self.body {
            Body::Empty => Ok(std::borrow::Cow::Borrowed(&[])),
            Body::Raw(raw) => Ok(std::borrow::Cow::Borrowed(raw)),
            Body::Spooled(path) => std::fs::read(path)
                .map(std::borrow::Cow::Owned)
                .map_err(|e| anyhow::anyhow!("cannot read content at '{}': {}", path.display(), e)),
        }
    }

    /// load the content in memory
    ///
    /// # Errors
    ///
    /// * the spooled content cannot be read
    pub fn materialize(&mut self) -> anyhow::Result<()> {
        if let Body::Spooled(_) = self.body {
            self.body = Body::Raw(self.content()?.into_owned());
        }
        Ok(())
    }

    /// size of the content in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.body {
            Body::Empty => 0,
            Body::Raw(raw) => raw.len() as u64,
            Body::Spooled(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or_default(),
        }
    }

    /// copy the mail under a new name, the content is loaded in memory
    ///
    /// # Errors
    ///
    /// * the spooled content cannot be read
    pub fn duplicate(&self, name: impl Into<String>) -> anyhow::Result<Self> {
        let mut copy = self.clone();
        copy.name = name.into();
        copy.materialize()?;
        Ok(copy)
    }
}
