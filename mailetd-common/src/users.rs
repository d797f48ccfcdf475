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

/// Directory of the users allowed to authenticate and to receive mails.
pub trait UsersRepository: Send + Sync {
    /// check the credentials of `user`
    ///
    /// # Errors
    ///
    /// * the backend is unavailable
    fn authenticate(&self, user: &str, password: &str) -> anyhow::Result<bool>;

    /// does `user` exist
    ///
    /// # Errors
    ///
    /// * the backend is unavailable
    fn exists(&self, user: &str) -> anyhow::Result<bool>;
}

/// Users and passwords kept in memory, usually loaded from the configuration.
#[derive(Debug, Default, Clone)]
pub struct MemoryUsersRepository {
    users: std::collections::HashMap<String, String>,
}

impl MemoryUsersRepository {
    ///
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    /// add or replace a user
    pub fn add_user(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.users.insert(user.into(), password.into());
    }
}

impl UsersRepository for MemoryUsersRepository {
    fn authenticate(&self, user: &str, password: &str) -> anyhow::Result<bool> {
        Ok(self.users.get(user).map_or(false, |p| p == password))
    }

    fn exists(&self, user: &str) -> anyhow::Result<bool> {
        Ok(self.users.contains_key(user))
    }
}
