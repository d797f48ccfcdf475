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
use crate::Address;

/// Recipient rewrite table: virtual addresses, aliases and forwards.
pub trait RecipientRewriteTable: Send + Sync {
    /// the addresses `local_part@domain` is rewritten to, `None` if there
    /// is no mapping for it
    ///
    /// # Errors
    ///
    /// * the backend is unavailable
    /// * a mapping loops
    fn resolve(&self, local_part: &str, domain: &str) -> anyhow::Result<Option<Vec<Address>>>;
}

/// maximum length of a chain of mappings
pub const MAPPING_DEPTH_MAX: usize = 10;

/// Mappings kept in memory, keyed by full address or by `@domain` for a
/// whole domain (`{local_part}` in the target is replaced).
#[derive(Debug, Default, Clone)]
pub struct MemoryRecipientRewriteTable {
    mappings: std::collections::HashMap<String, Vec<String>>,
}

impl MemoryRecipientRewriteTable {
    ///
    #[must_use]
    pub fn new(mappings: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        }
    }

    fn lookup(&self, local_part: &str, domain: &str) -> Option<Vec<String>> {
        let domain = domain.to_ascii_lowercase();
        self.mappings
            .get(&format!("{}@{}", local_part.to_ascii_lowercase(), domain))
            .cloned()
            .or_else(|| {
                self.mappings.get(&format!("@{domain}")).map(|targets| {
                    targets
                        .iter()
                        .map(|t| t.replace("{local_part}", local_part))
                        .collect()
                })
            })
    }

    fn resolve_recursive(
        &self,
        address: &Address,
        depth: usize,
        out: &mut Vec<Address>,
    ) -> anyhow::Result<()> {
        if depth > MAPPING_DEPTH_MAX {
            anyhow::bail!("mapping of '{}' is too deep, is there a loop ?", address)
        }
        match self.lookup(address.local_part(), address.domain()) {
            None => {
                if !out.contains(address) {
                    out.push(address.clone());
                }
            }
            Some(targets) => {
                for target in targets {
                    let target = Address::try_from(target)?;
                    // a mapping to itself ends the chain
                    if target == *address {
                        if !out.contains(&target) {
                            out.push(target);
                        }
                    } else {
                        self.resolve_recursive(&target, depth + 1, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl RecipientRewriteTable for MemoryRecipientRewriteTable {
    fn resolve(&self, local_part: &str, domain: &str) -> anyhow::Result<Option<Vec<Address>>> {
        if self.lookup(local_part, domain).is_none() {
            return Ok(None);
        }
        let mut out = vec![];
        self.resolve_recursive(&Address::new(local_part, domain)?, 0, &mut out)?;
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryRecipientRewriteTable, RecipientRewriteTable};
    use crate::Address;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn table() -> MemoryRecipientRewriteTable {
        MemoryRecipientRewriteTable::new([
            (
                "sales@example.com".to_string(),
                vec!["alice@example.com".to_string(), "team@example.com".to_string()],
            ),
            (
                "team@example.com".to_string(),
                vec!["bob@example.com".to_string(), "carol@partner.org".to_string()],
            ),
            (
                "@alias.com".to_string(),
                vec!["{local_part}@example.com".to_string()],
            ),
            ("loop@example.com".to_string(), vec!["loop2@example.com".to_string()]),
            ("loop2@example.com".to_string(), vec!["loop@example.com".to_string()]),
        ])
    }

    #[test]
    fn no_mapping() {
        assert_eq!(table().resolve("alice", "example.com").unwrap(), None);
    }

    #[test]
    fn chained() {
        assert_eq!(
            table().resolve("sales", "example.com").unwrap(),
            Some(vec![
                addr("alice@example.com"),
                addr("bob@example.com"),
                addr("carol@partner.org")
            ])
        );
    }

    #[test]
    fn domain_mapping() {
        assert_eq!(
            table().resolve("alice", "alias.com").unwrap(),
            Some(vec![addr("alice@example.com")])
        );
    }

    #[test]
    fn loop_is_an_error() {
        assert!(table().resolve("loop", "example.com").is_err());
    }
}
