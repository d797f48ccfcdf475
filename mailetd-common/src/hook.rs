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

/// Decision of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HookReturnCode {
    /// accept, the following hooks are not run
    Ok,
    /// permanent rejection
    Deny,
    /// temporary rejection
    DenySoft,
    /// no opinion, the next hook decides
    Declined,
}

/// What a hook returns: a decision and optionally the reply to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    code: HookReturnCode,
    smtp_code: Option<u16>,
    description: Option<String>,
}

impl HookResult {
    const fn with_code(code: HookReturnCode) -> Self {
        Self {
            code,
            smtp_code: None,
            description: None,
        }
    }

    ///
    #[must_use]
    pub const fn ok() -> Self {
        Self::with_code(HookReturnCode::Ok)
    }

    ///
    #[must_use]
    pub const fn deny() -> Self {
        Self::with_code(HookReturnCode::Deny)
    }

    ///
    #[must_use]
    pub const fn deny_soft() -> Self {
        Self::with_code(HookReturnCode::DenySoft)
    }

    ///
    #[must_use]
    pub const fn declined() -> Self {
        Self::with_code(HookReturnCode::Declined)
    }

    /// override the reply code and text sent to the client
    #[must_use]
    pub fn with_reply(mut self, smtp_code: u16, description: impl Into<String>) -> Self {
        self.smtp_code = Some(smtp_code);
        self.description = Some(description.into());
        self
    }

    ///
    #[must_use]
    pub const fn code(&self) -> HookReturnCode {
        self.code
    }

    ///
    #[must_use]
    pub const fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    ///
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// does this result stop the hook chain
    #[must_use]
    pub const fn is_decisive(&self) -> bool {
        !matches!(self.code, HookReturnCode::Declined)
    }
}

#[cfg(test)]
mod tests {
    use super::{HookResult, HookReturnCode};

    #[test]
    fn decisive() {
        assert!(HookResult::ok().is_decisive());
        assert!(HookResult::deny().is_decisive());
        assert!(HookResult::deny_soft().is_decisive());
        assert!(!HookResult::declined().is_decisive());
    }

    #[test]
    fn display() {
        assert_eq!(HookReturnCode::DenySoft.to_string(), "DENY_SOFT");
    }

    #[test]
    fn reply() {
        let result = HookResult::deny().with_reply(550, "5.7.1 no thanks");
        assert_eq!(result.smtp_code(), Some(550));
        assert_eq!(result.description(), Some("5.7.1 no thanks"));
    }
}
