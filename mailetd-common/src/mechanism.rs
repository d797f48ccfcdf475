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

/// List of supported SASL Mechanism
/// See https://www.iana.org/assignments/sasl-mechanisms/sasl-mechanisms.xhtml
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub enum Mechanism {
    /// Common, but for interoperability
    Plain,
    /// Obsolete
    Login,
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        })
    }
}

impl From<Mechanism> for String {
    fn from(this: Mechanism) -> Self {
        format!("{}", this)
    }
}

impl std::str::FromStr for Mechanism {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "LOGIN" => Ok(Self::Login),
            _ => anyhow::bail!("not a valid AUTH Mechanism: '{}'", s),
        }
    }
}

impl TryFrom<String> for Mechanism {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&s)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::str::FromStr;

    #[test]
    fn error() {
        assert_eq!(
            format!("{}", Mechanism::from_str("foobar").unwrap_err()),
            "not a valid AUTH Mechanism: 'foobar'"
        );
    }

    #[test]
    fn same() {
        for s in <Mechanism as strum::IntoEnumIterator>::iter() {
            assert_eq!(Mechanism::from_str(&format!("{}", s)).unwrap(), s);
            let str: String = s.into();
            assert_eq!(str, format!("{}", s));
        }
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(Mechanism::from_str("plain").unwrap(), Mechanism::Plain);
    }
}
