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
use crate::Reply;

/// Identifier of the replies the server can send, each of them can be
/// overridden in the configuration.
///
/// `{domain}` in the text is replaced by the domain of the server.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::EnumString,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub enum CodeID {
    //
    // Specials Messages
    //
    /// First message sent by the server
    Greetings,
    ///
    Help,
    ///
    Closing,
    ///
    DataStart,
    //
    // Transaction status
    //
    /// Accepted
    Ok,
    ///
    SenderOk,
    ///
    RecipientOk,
    ///
    MessageQueued,
    ///
    CannotVerify,
    ///
    Denied,
    ///
    DeniedSoft,
    ///
    RecipientRejected,
    ///
    SenderRejected,
    ///
    MessageRejected,
    ///
    RelayDenied,
    ///
    UnknownUser,
    ///
    IdentityMismatch,
    ///
    MessageTooBig,
    ///
    LocalError,
    //
    // Parsing Command
    //
    ///
    UnrecognizedCommand,
    ///
    SyntaxError,
    ///
    LineTooLong,
    ///
    SyntaxErrorParams,
    ///
    ParameterUnimplemented,
    ///
    Unimplemented,
    ///
    BadSequence,
    //
    // Auth extension
    //
    ///
    AuthSucceeded,
    ///
    AuthMechNotSupported,
    ///
    AuthInvalidCredentials,
    ///
    AuthTemporaryFailure,
    /// The policy of the server require the client to be authenticated to relay
    AuthRequired,
    ///
    AuthAlreadyDone,
    ///
    AuthClientCanceled,
    ///
    AuthErrorDecode64,
    //
    // Security mechanism
    //
    /// The number of connection maximum accepted as the same time as been reached
    ConnectionMaxReached,
    /// The threshold `error_count` has been passed, then server will shutdown the connection
    TooManyError,
    ///
    Timeout,
    ///
    TooManyRecipients,
}

impl CodeID {
    /// the reply sent when the configuration does not override it
    #[must_use]
    pub fn default_reply(self) -> Reply {
        match self {
            Self::Greetings => Reply::new(220, "{domain} Service ready"),
            Self::Help => Reply::enhanced(214, "2.0.0", "See RFC 5321 for the supported commands"),
            Self::Closing => Reply::enhanced(221, "2.0.0", "Service closing transmission channel"),
            Self::DataStart => Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            Self::Ok => Reply::enhanced(250, "2.0.0", "Ok"),
            Self::SenderOk => Reply::enhanced(250, "2.1.0", "Sender OK"),
            Self::RecipientOk => Reply::enhanced(250, "2.1.5", "Recipient OK"),
            Self::MessageQueued => Reply::enhanced(250, "2.6.0", "Message received, queued for delivery"),
            Self::CannotVerify => Reply::enhanced(
                252,
                "2.5.2",
                "Cannot VRFY user, but will accept message and attempt delivery",
            ),
            Self::Denied => Reply::enhanced(554, "5.7.1", "Requested action not taken"),
            Self::DeniedSoft => Reply::enhanced(451, "4.7.1", "Temporary failure, try again later"),
            Self::RecipientRejected => Reply::enhanced(550, "5.7.1", "Recipient rejected"),
            Self::SenderRejected => Reply::enhanced(550, "5.7.1", "Sender rejected"),
            Self::MessageRejected => Reply::enhanced(554, "5.6.0", "Message rejected"),
            Self::RelayDenied => Reply::enhanced(550, "5.7.1", "Relaying denied"),
            Self::UnknownUser => Reply::enhanced(550, "5.1.1", "Mailbox unavailable"),
            Self::IdentityMismatch => Reply::enhanced(
                503,
                "5.7.1",
                "Incorrect authentication for specified email address",
            ),
            Self::MessageTooBig => Reply::enhanced(
                552,
                "5.3.4",
                "Message size exceeds fixed maximum message size",
            ),
            Self::LocalError => Reply::enhanced(
                451,
                "4.3.0",
                "Requested action aborted: local error in processing",
            ),
            Self::UnrecognizedCommand => Reply::enhanced(500, "5.5.1", "Command unrecognized"),
            Self::SyntaxError => Reply::enhanced(500, "5.5.2", "Syntax error"),
            Self::LineTooLong => Reply::enhanced(500, "5.5.2", "Line too long"),
            Self::SyntaxErrorParams => Reply::enhanced(
                501,
                "5.5.4",
                "Syntax error in parameters or arguments",
            ),
            Self::ParameterUnimplemented => {
                Reply::enhanced(504, "5.5.4", "Command parameter not implemented")
            }
            Self::Unimplemented => Reply::enhanced(502, "5.5.1", "Command not implemented"),
            Self::BadSequence => Reply::enhanced(503, "5.5.1", "Bad sequence of commands"),
            Self::AuthSucceeded => Reply::enhanced(235, "2.7.0", "Authentication succeeded"),
            Self::AuthMechNotSupported => {
                Reply::enhanced(504, "5.5.4", "Mechanism is not supported")
            }
            Self::AuthInvalidCredentials => {
                Reply::enhanced(535, "5.7.8", "Authentication credentials invalid")
            }
            Self::AuthTemporaryFailure => {
                Reply::enhanced(454, "4.7.0", "Temporary authentication failure")
            }
            Self::AuthRequired => Reply::enhanced(530, "5.7.0", "Authentication required"),
            Self::AuthAlreadyDone => Reply::enhanced(503, "5.5.1", "Already authenticated"),
            Self::AuthClientCanceled => Reply::enhanced(501, "5.7.0", "Authentication canceled by client"),
            Self::AuthErrorDecode64 => Reply::enhanced(501, "5.5.2", "Invalid, not base64"),
            Self::ConnectionMaxReached => Reply::enhanced(
                421,
                "4.7.0",
                "{domain} Too many connections, try again later",
            ),
            Self::TooManyError => Reply::enhanced(421, "4.7.0", "{domain} Too many errors from the client"),
            Self::Timeout => Reply::enhanced(421, "4.4.2", "{domain} Idle timeout, closing connection"),
            Self::TooManyRecipients => Reply::enhanced(452, "4.5.3", "Too many recipients"),
        }
    }
}

impl From<CodeID> for String {
    fn from(value: CodeID) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CodeID {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
            .map_err(|_| anyhow::anyhow!("not a valid reply identifier: '{}'", value))
    }
}
