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

/// Stage of an SMTP session
#[derive(
    Debug,
    Eq,
    PartialEq,
    Hash,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    strum::EnumIter,
    serde::Deserialize,
    serde::Serialize,
)]
#[serde(into = "String")]
#[serde(try_from = "String")]
#[allow(clippy::module_name_repetitions)]
pub enum StateSMTP {
    /// After TCP/IP socket has been accepted
    Connect,
    /// After the greeting has been sent
    Ready,
    /// After receiving HELO/EHLO command
    Helo,
    /// After receiving MAIL FROM command
    MailFrom,
    /// After receiving RCPT TO command
    RcptTo,
    /// After receiving DATA command, until the end of the message
    Data,
    /// After receiving QUIT command
    Stop,
}

impl std::fmt::Display for StateSMTP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Ready => "ready",
            Self::Helo => "helo",
            Self::MailFrom => "mail",
            Self::RcptTo => "rcpt",
            Self::Data => "data",
            Self::Stop => "stop",
        })
    }
}

impl From<StateSMTP> for String {
    fn from(state: StateSMTP) -> Self {
        format!("{}", state)
    }
}

impl std::str::FromStr for StateSMTP {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "ready" => Ok(Self::Ready),
            "helo" => Ok(Self::Helo),
            "mail" => Ok(Self::MailFrom),
            "rcpt" => Ok(Self::RcptTo),
            "data" => Ok(Self::Data),
            "stop" => Ok(Self::Stop),
            _ => Err(anyhow::anyhow!("not a valid SMTP state: '{}'", s)),
        }
    }
}

impl TryFrom<String> for StateSMTP {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}

/// name of the processor every new mail enters
pub const ROOT_PROCESSOR: &str = "root";
/// name of the processor receiving failed mails
pub const ERROR_PROCESSOR: &str = "error";
/// reserved name of the terminal state
pub const GHOST: &str = "ghost";

/// Routing tag of a mail inside the processing pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub enum MailState {
    /// the mail is waiting for the named processor
    Processor(String),
    /// terminal, the mail is removed from the spool
    Ghost,
}

impl MailState {
    /// state of a freshly received mail
    #[must_use]
    pub fn root() -> Self {
        Self::Processor(ROOT_PROCESSOR.to_string())
    }

    /// state of a mail which failed in a processor
    #[must_use]
    pub fn error() -> Self {
        Self::Processor(ERROR_PROCESSOR.to_string())
    }

    /// route to the processor `name`
    #[must_use]
    pub fn processor(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == GHOST {
            Self::Ghost
        } else {
            Self::Processor(name)
        }
    }

    /// is the mail finished
    #[must_use]
    pub const fn is_ghost(&self) -> bool {
        matches!(self, Self::Ghost)
    }

    /// name of the processor, if any
    #[must_use]
    pub fn processor_name(&self) -> Option<&str> {
        match self {
            Self::Processor(name) => Some(name),
            Self::Ghost => None,
        }
    }
}

impl Default for MailState {
    fn default() -> Self {
        Self::root()
    }
}

impl std::fmt::Display for MailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.processor_name().unwrap_or(GHOST))
    }
}

impl From<MailState> for String {
    fn from(state: MailState) -> Self {
        format!("{}", state)
    }
}

impl std::str::FromStr for MailState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            anyhow::bail!("not a valid mail state: '{}'", s)
        }
        Ok(Self::processor(s))
    }
}

impl TryFrom<String> for MailState {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}
