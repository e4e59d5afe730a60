//! On-disk record of already processed message identities.
//!
//! Plain text, two lines:
//!
//! ```text
//! 500
//! 812,4;813,4;815,4;
//! ```
//!
//! The first line is the retrieve count the file was written for, the
//! second a `;`-terminated list of `itemId,groupId` pairs in arrival order.
//! A file written for a smaller retrieve count than the current one cannot
//! vouch for the larger window and is treated as stale.

use std::io;
use std::path::{Path, PathBuf};

use crate::history::cache_bound;
use crate::model::MessageKey;

/// Outcome of reading a cache file.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheLoad {
    /// Identities in arrival order.
    Loaded(Vec<MessageKey>),
    Missing,
    /// Present but unusable; the reason is meant for logs.
    Stale(String),
}

#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, retrieve_count: usize) -> io::Result<CacheLoad> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheLoad::Missing),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.len() != 2 {
            return Ok(CacheLoad::Stale(format!("expected 2 lines, found {}", lines.len())));
        }
        let stored: usize = match lines[0].trim().parse() {
            Ok(n) => n,
            Err(_) => return Ok(CacheLoad::Stale(format!("bad retrieve count '{}'", lines[0].trim()))),
        };
        if stored < retrieve_count {
            return Ok(CacheLoad::Stale(format!(
                "written for {stored} messages, {retrieve_count} configured"
            )));
        }

        Ok(CacheLoad::Loaded(parse_pairs(lines[1])))
    }

    /// Replace the file with the given identities.
    pub fn write(&self, retrieve_count: usize, keys: &[MessageKey]) -> io::Result<()> {
        let mut out = format!("{retrieve_count}\n");
        for key in keys {
            out.push_str(&format!("{},{};", key.id, key.container_id));
        }
        out.push('\n');
        std::fs::write(&self.path, out)
    }

    /// Append one identity unless already recorded, dropping the oldest
    /// entries beyond the cache bound.
    pub fn add_processed(&self, key: MessageKey, retrieve_count: usize) -> io::Result<()> {
        let mut keys = match self.load(0)? {
            CacheLoad::Loaded(keys) => keys,
            CacheLoad::Missing | CacheLoad::Stale(_) => Vec::new(),
        };
        if keys.contains(&key) {
            return Ok(());
        }
        keys.push(key);
        let bound = cache_bound(retrieve_count);
        if keys.len() > bound {
            keys.drain(..keys.len() - bound);
        }
        self.write(retrieve_count, &keys)
    }
}

fn parse_pairs(line: &str) -> Vec<MessageKey> {
    line.split(';')
        .filter_map(|pair| {
            let (id, container) = pair.split_once(',')?;
            Some(MessageKey {
                id: id.trim().parse().ok()?,
                container_id: container.trim().parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_malformed_pairs() {
        let keys = parse_pairs("1,4; ;2,;x,4;3,4,5;4 , 4;");
        assert_eq!(
            keys,
            vec![
                MessageKey { id: 1, container_id: 4 },
                MessageKey { id: 4, container_id: 4 },
            ]
        );
    }
}
