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
use crate::{Body, Mail};

/// Durable storage of mails, addressed by the name of the mail.
pub trait MailRepository: Send + Sync {
    /// insert or replace the mail stored under `mail.name`
    ///
    /// # Errors
    ///
    /// * the envelope cannot be serialized
    /// * the content cannot be read or written
    fn store(&self, mail: &Mail) -> anyhow::Result<()>;

    /// get the mail stored under `key`
    ///
    /// # Errors
    ///
    /// * the storage cannot be read or contains garbage
    fn retrieve(&self, key: &str) -> anyhow::Result<Option<Mail>>;

    /// remove the mail stored under `key`, removing a missing key is not an error
    ///
    /// # Errors
    ///
    /// * the storage cannot be written
    fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// every key in the repository
    ///
    /// # Errors
    ///
    /// * the storage cannot be read
    fn list(&self) -> anyhow::Result<Vec<String>>;
}

/// check the key can be used as a file name
///
/// # Errors
///
/// * the key is empty or contains a character other than `[A-Za-z0-9._@+-]`
pub fn check_key(key: &str) -> anyhow::Result<()> {
    if key.is_empty()
        || key.starts_with('.')
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '+' | '-'))
    {
        anyhow::bail!("'{}' is not a valid repository key", key)
    }
    Ok(())
}

/// Store each mail in a directory: the envelope in `{key}.json`
/// and the content in `{key}.eml`.
///
/// The envelope is written last, a mail without envelope is not listed.
#[derive(Debug, Clone)]
pub struct FileMailRepository {
    dirpath: std::path::PathBuf,
}

impl FileMailRepository {
    /// open the repository, creating the directory if needed
    ///
    /// # Errors
    ///
    /// * the directory cannot be created
    pub fn new(dirpath: impl Into<std::path::PathBuf>) -> anyhow::Result<Self> {
        let dirpath = dirpath.into();
        std::fs::create_dir_all(&dirpath).map_err(|e| {
            anyhow::anyhow!("cannot create repository at '{}': {}", dirpath.display(), e)
        })?;
        Ok(Self { dirpath })
    }

    /// directory of the repository
    #[must_use]
    pub fn dirpath(&self) -> &std::path::Path {
        &self.dirpath
    }

    fn envelope_path(&self, key: &str) -> std::path::PathBuf {
        self.dirpath.join(format!("{key}.json"))
    }

    fn content_path(&self, key: &str) -> std::path::PathBuf {
        self.dirpath.join(format!("{key}.eml"))
    }

    fn write_atomic(path: &std::path::Path, content: &[u8]) -> anyhow::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl MailRepository for FileMailRepository {
    fn store(&self, mail: &Mail) -> anyhow::Result<()> {
        check_key(&mail.name)?;
        let content_path = self.content_path(&mail.name);

        match &mail.body {
            Body::Spooled(path) if *path == content_path => {}
            _ => Self::write_atomic(&content_path, &mail.content()?)?,
        }

        let mut envelope = mail.clone();
        envelope.body = Body::Spooled(content_path);
        envelope.last_updated = std::time::SystemTime::now();

        Self::write_atomic(
            &self.envelope_path(&mail.name),
            serde_json::to_string(&envelope)?.as_bytes(),
        )
    }

    fn retrieve(&self, key: &str) -> anyhow::Result<Option<Mail>> {
        check_key(key)?;
        let path = self.envelope_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let mut mail = serde_json::from_str::<Mail>(&content).map_err(|e| {
                    anyhow::anyhow!("cannot deserialize '{}': {}", path.display(), e)
                })?;
                mail.body = Body::Spooled(self.content_path(key));
                Ok(Some(mail))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("cannot read '{}': {}", path.display(), e)),
        }
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        check_key(key)?;
        for path in [self.envelope_path(key), self.content_path(key)] {
            match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    anyhow::bail!("cannot remove '{}': {}", path.display(), e)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut keys = std::fs::read_dir(&self.dirpath)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(str::to_string)
            })
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }
}

/// Keep the mails in memory, used for tests and for volatile repositories.
#[derive(Debug, Default)]
pub struct MemoryMailRepository {
    mails: std::sync::Mutex<std::collections::BTreeMap<String, Mail>>,
}

impl MemoryMailRepository {
    fn lock(
        &self,
    ) -> anyhow::Result<std::sync::MutexGuard<'_, std::collections::BTreeMap<String, Mail>>> {
        self.mails
            .lock()
            .map_err(|_| anyhow::anyhow!("memory repository poisoned"))
    }
}

impl MailRepository for MemoryMailRepository {
    fn store(&self, mail: &Mail) -> anyhow::Result<()> {
        let mut copy = mail.clone();
        copy.materialize()?;
        copy.last_updated = std::time::SystemTime::now();
        self.lock()?.insert(mail.name.clone(), copy);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> anyhow::Result<Option<Mail>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
