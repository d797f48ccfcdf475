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

/// A mailbox address, `local-part@domain`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, Eq)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    #[serde(skip)]
    at_sign: usize,
    full: String,
}

impl TryFrom<String> for Address {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Err(error) = addr::parse_email_address(&value) {
            anyhow::bail!("'{}' is not a valid address: {}", value, error)
        }
        match value.rfind('@') {
            Some(at_sign) => Ok(Self {
                at_sign,
                full: value,
            }),
            None => anyhow::bail!("'{}' is not a valid address: missing '@'", value),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.full
    }
}

// the domain part is case insensitive, the local part is not (RFC 5321 2.4)
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.local_part() == other.local_part()
            && self.domain().eq_ignore_ascii_case(other.domain())
    }
}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.local_part().hash(state);
        self.domain().to_ascii_lowercase().hash(state);
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

impl Address {
    /// get the full email address.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// get the user of the address.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    /// get the fqdn of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.full[self.at_sign + 1..]
    }

    /// build `local_part@domain`
    ///
    /// # Errors
    ///
    /// * the result is not a valid address
    pub fn new(local_part: &str, domain: &str) -> anyhow::Result<Self> {
        Self::try_from(format!("{local_part}@{domain}"))
    }

    /// is the local part `postmaster`, regardless of the case
    #[must_use]
    pub fn is_postmaster(&self) -> bool {
        self.local_part().eq_ignore_ascii_case("postmaster")
    }
}
