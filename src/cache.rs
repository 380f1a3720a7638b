//! Explicit memoization for the transaction loader
//!
//! Loading and validating the transaction table is the expensive step, so it
//! is cached keyed by a content fingerprint of the source file (canonical
//! path + modification time + length). Clustering and tree fitting are cheap
//! and always recomputed. The cache is a plain value owned by its session;
//! two sessions never share entries.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::data::{load_transactions, RfmTable};
use crate::error::Result;

#[derive(Debug)]
struct Entry {
    modified: SystemTime,
    len: u64,
    trim_quantile: f64,
    table: Arc<RfmTable>,
}

/// Fingerprint-keyed loader cache
#[derive(Debug, Default)]
pub struct LoaderCache {
    entries: HashMap<PathBuf, Entry>,
    hits: usize,
    misses: usize,
}

impl LoaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the RFM table for `path`, reusing the cached copy while the file
    /// fingerprint and trim quantile are unchanged. A changed fingerprint
    /// invalidates the entry and the table is recomputed in place.
    pub fn load(&mut self, path: &Path, trim_quantile: f64) -> Result<Arc<RfmTable>> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let stamp = match fs::metadata(&key) {
            Ok(meta) => Some((meta.modified()?, meta.len())),
            Err(_) => None,
        };

        if let (Some((modified, len)), Some(entry)) = (stamp, self.entries.get(&key)) {
            if entry.modified == modified
                && entry.len == len
                && entry.trim_quantile == trim_quantile
            {
                self.hits += 1;
                debug!(path = %key.display(), "loader cache hit");
                return Ok(Arc::clone(&entry.table));
            }
        }

        self.misses += 1;
        debug!(path = %key.display(), "loader cache miss");
        let table = Arc::new(load_transactions(path, trim_quantile)?);
        if let Some((modified, len)) = stamp {
            self.entries.insert(
                key,
                Entry {
                    modified,
                    len,
                    trim_quantile,
                    table: Arc::clone(&table),
                },
            );
        }
        Ok(table)
    }

    /// Drop every cached dataset.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}
