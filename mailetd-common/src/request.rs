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
use crate::CodeID;

/// A command line received from the client: a verb and its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    verb: String,
    argument: Option<String>,
}

impl Request {
    /// build a request, the verb is upper-cased
    #[must_use]
    pub fn new(verb: &str, argument: Option<&str>) -> Self {
        Self {
            verb: verb.to_ascii_uppercase(),
            argument: argument.map(str::to_string),
        }
    }

    /// split a line (without its `\r\n`) on the first space
    ///
    /// # Errors
    ///
    /// * the line is empty or starts with a space
    /// * the verb contains something else than letters
    pub fn decode(line: &str) -> Result<Self, CodeID> {
        if line.is_empty() || line.starts_with([' ', '\t']) {
            return Err(CodeID::SyntaxError);
        }

        let (verb, argument) = match line.split_once(' ') {
            Some((verb, argument)) => (verb, Some(argument.trim())),
            None => (line, None),
        };

        if !verb.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(CodeID::UnrecognizedCommand);
        }

        Ok(Self::new(verb, argument.filter(|a| !a.is_empty())))
    }

    /// the upper-cased command name
    #[must_use]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// everything after the first space, trimmed
    #[must_use]
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.argument {
            Some(argument) => write!(f, "{} {}", self.verb, argument),
            None => f.write_str(&self.verb),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Request;
    use crate::CodeID;

    #[test]
    fn verb_is_uppercased() {
        let request = Request::decode("mail FROM:<a@example.com>").unwrap();
        assert_eq!(request.verb(), "MAIL");
        assert_eq!(request.argument(), Some("FROM:<a@example.com>"));
    }

    #[test]
    fn without_argument() {
        let request = Request::decode("quit").unwrap();
        assert_eq!(request, Request::new("QUIT", None));
        assert_eq!(Request::decode("NOOP   ").unwrap().argument(), None);
    }

    #[test]
    fn invalid() {
        assert_eq!(Request::decode(""), Err(CodeID::SyntaxError));
        assert_eq!(Request::decode(" HELO foo"), Err(CodeID::SyntaxError));
        assert_eq!(Request::decode("HE1LO foo"), Err(CodeID::UnrecognizedCommand));
    }
}
