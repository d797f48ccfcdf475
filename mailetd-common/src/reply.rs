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

/// SMTP message sent by the server to the client as defined in RFC5321#4.2
///
/// A reply is a three digits code followed by one or more lines of text.
/// The enhanced status code (RFC3463), when any, is the head of the text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    /// build a reply, `text` is split on line breaks
    #[must_use]
    pub fn new(code: u16, text: impl AsRef<str>) -> Self {
        let lines = text
            .as_ref()
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect::<Vec<_>>();

        Self { code, lines }
    }

    /// build a reply with an enhanced status code on its first line
    #[must_use]
    pub fn enhanced(code: u16, enhanced: &str, text: impl AsRef<str>) -> Self {
        Self::new(code, format!("{enhanced} {}", text.as_ref()))
    }

    /// build a multiline reply
    #[must_use]
    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        if lines.is_empty() {
            return Self::new(code, "");
        }
        Self { code, lines }
    }

    /// the three digits
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// the text lines, without code nor separator
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// the text lines joined with `\n`
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// 4yz and 5yz replies
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// 421 tells the client the channel is closing
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.code == 421 || self.code == 221
    }

    /// replace `from` by `to` on every line
    #[must_use]
    pub fn replace(mut self, from: &str, to: &str) -> Self {
        for line in &mut self.lines {
            if line.contains(from) {
                *line = line.replace(from, to);
            }
        }
        self
    }

    /// add a line at the end of the reply
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// produce the wire format, `code-text` on every line but the last
    /// which is `code text`, each line terminated by `\r\n`
    #[must_use]
    pub fn encode(&self) -> String {
        let last = self.lines.len() - 1;
        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                format!(
                    "{}{}{}\r\n",
                    self.code,
                    if idx == last { ' ' } else { '-' },
                    line
                )
            })
            .collect::<String>()
    }

    /// parse the wire format produced by [`Reply::encode`]
    ///
    /// # Errors
    ///
    /// * a line is not prefixed by a three digits code
    /// * the codes of the lines are not all the same
    /// * the continuation markers are misplaced
    pub fn decode(input: &str) -> anyhow::Result<Self> {
        let input = input.strip_suffix("\r\n").unwrap_or(input);
        let raw_lines = input.split("\r\n").collect::<Vec<_>>();
        let last = raw_lines.len() - 1;

        let mut code = None;
        let mut lines = Vec::with_capacity(raw_lines.len());

        for (idx, line) in raw_lines.into_iter().enumerate() {
            let line_code = line
                .get(0..3)
                .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| anyhow::anyhow!("reply line without code: '{}'", line))?;

            match code {
                None => code = Some(line_code),
                Some(code) if code != line_code => {
                    anyhow::bail!("reply with several codes: {} and {}", code, line_code)
                }
                Some(_) => {}
            }

            let (separator, text) = match line.get(3..4) {
                Some(separator) => (separator, &line[4..]),
                None => (" ", ""),
            };
            match (separator, idx == last) {
                ("-", false) | (" ", true) => lines.push(text.to_string()),
                _ => anyhow::bail!("misplaced separator '{}' in reply line '{}'", separator, line),
            }
        }

        Ok(Self {
            code: code.ok_or_else(|| anyhow::anyhow!("empty reply"))?,
            lines,
        })
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

impl std::str::FromStr for Reply {
    type Err = anyhow::Error;

    /// accept the configuration form `"250 2.0.0 Ok"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, text) = s
            .split_once(' ')
            .map_or((s, ""), |(code, text)| (code, text));
        let code = code
            .parse::<u16>()
            .ok()
            .filter(|c| (200..600).contains(c))
            .ok_or_else(|| anyhow::anyhow!("not a valid reply code: '{}'", code))?;
        Ok(Self::new(code, text))
    }
}

impl TryFrom<String> for Reply {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}

impl From<Reply> for String {
    fn from(reply: Reply) -> Self {
        format!("{} {}", reply.code, reply.lines.join("\r\n"))
    }
}
