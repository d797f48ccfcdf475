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

/// Why no line could be read
#[derive(Debug)]
pub enum ReadError {
    /// the client did not send anything in time
    Timeout,
    /// the line exceeds the configured maximum, it has been discarded
    LineTooLong,
    /// the underlying stream failed
    Io(std::io::Error),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::LineTooLong => f.write_str("line too long"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Buffered stream reading `\r\n` terminated lines and writing replies
#[derive(Debug)]
pub struct AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    inner: tokio::io::BufStream<S>,
    line_length_max: usize,
}

impl<S> AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// `line_length_max` includes the `\r\n`
    pub fn new(stream: S, line_length_max: usize) -> Self {
        Self {
            inner: tokio::io::BufStream::new(stream),
            line_length_max,
        }
    }

    /// read the next line, without its terminator
    ///
    /// A bare `\n` is accepted as a terminator. `Ok(None)` means the stream
    /// has been closed; an unterminated trailing fragment is dropped.
    ///
    /// # Errors
    ///
    /// * [`ReadError::Timeout`] if nothing was received in `timeout`
    /// * [`ReadError::LineTooLong`] once the whole overlong line has been consumed
    /// * [`ReadError::Io`]
    pub async fn next_line(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|_| ReadError::Timeout)?
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        let mut line = Vec::new();
        let mut too_long = false;

        loop {
            let (found, consumed) = {
                let available = tokio::io::AsyncBufReadExt::fill_buf(&mut self.inner)
                    .await
                    .map_err(ReadError::Io)?;
                if available.is_empty() {
                    return Ok(None);
                }

                match available.iter().position(|b| *b == b'\n') {
                    Some(i) => {
                        if !too_long {
                            line.extend_from_slice(&available[..i]);
                        }
                        (true, i + 1)
                    }
                    None => {
                        if !too_long {
                            line.extend_from_slice(available);
                        }
                        (false, available.len())
                    }
                }
            };
            tokio::io::AsyncBufReadExt::consume(&mut self.inner, consumed);

            // the '\n' is not in `line`, the '\r' may be
            if !too_long && line.len() + 1 > self.line_length_max {
                too_long = true;
                line = Vec::new();
            }
            if found {
                break;
            }
        }

        if too_long {
            return Err(ReadError::LineTooLong);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// write and flush
    ///
    /// # Errors
    ///
    /// * the underlying stream failed
    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, buf).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await
    }

    /// close the write side
    ///
    /// # Errors
    ///
    /// * the underlying stream failed
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }

    /// get back the stream
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::{AbstractIO, ReadError};
    use crate::receiver::test_helpers::Mock;

    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

    async fn read_all(input: &[u8], line_length_max: usize) -> Vec<Result<String, String>> {
        let mut io = AbstractIO::new(Mock::new(input.to_vec()), line_length_max);
        let mut out = vec![];
        loop {
            match io.next_line(TIMEOUT).await {
                Ok(Some(line)) => out.push(Ok(String::from_utf8(line).unwrap())),
                Ok(None) => break,
                Err(e) => out.push(Err(e.to_string())),
            }
        }
        out
    }

    #[tokio::test]
    async fn read() {
        let input = ["a\r\n", "b\r\n", "c\r\n", "d\r\n", "e\r\n", "f\r\n"].concat();

        pretty_assertions::assert_eq!(
            read_all(input.as_bytes(), 1000).await,
            ["a", "b", "c", "d", "e", "f"]
                .into_iter()
                .map(|l| Ok(l.to_string()))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn bare_lf_and_fragment() {
        pretty_assertions::assert_eq!(
            read_all(b"a\nb\r\nunterminated", 1000).await,
            vec![Ok("a".to_string()), Ok("b".to_string())]
        );
    }

    #[tokio::test]
    async fn too_long() {
        let input = format!("{}\r\nok\r\n", "x".repeat(20));

        pretty_assertions::assert_eq!(
            read_all(input.as_bytes(), 10).await,
            vec![Err("line too long".to_string()), Ok("ok".to_string())]
        );
    }

    #[tokio::test]
    async fn limit_includes_crlf() {
        pretty_assertions::assert_eq!(
            read_all(b"12345678\r\n123456789\r\n", 10).await,
            vec![Ok("12345678".to_string()), Err("line too long".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut io = AbstractIO::new(server, 1000);
        assert!(matches!(
            io.next_line(TIMEOUT).await,
            Err(ReadError::Timeout)
        ));
        drop(client);
    }
}
