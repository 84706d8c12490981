//! Opaque persistence of the known-IDL set.
//!
//! The cache file is a JSON object mapping each topic to a two-element
//! array of the topic and the IDL's own serialized JSON. The shell writes
//! it after every rebuild and reads it on startup so completion works
//! before the first announcement arrives.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::idl::Idl;
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but is not valid JSON; callers log this and start
    /// from an empty registry.
    #[error("cache corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Entry(String, String);

/// Persist the registry. Errors are reported to the caller; a failed write
/// never invalidates the in-memory registry.
pub fn save(registry: &Registry, path: &Path) -> Result<(), CacheError> {
    let entries: BTreeMap<&str, Entry> = registry
        .iter()
        .map(|idl| (idl.topic.as_str(), Entry(idl.topic.clone(), idl.to_json())))
        .collect();
    fs::write(path, serde_json::to_string(&entries)?)?;
    Ok(())
}

/// Load a registry from the cache file. Entries that fail to parse are
/// dropped with a warning; only an unreadable or non-JSON file is an
/// error.
pub fn load(path: &Path) -> Result<Registry, CacheError> {
    let raw = fs::read_to_string(path)?;
    let entries: BTreeMap<String, Entry> = serde_json::from_str(&raw)?;

    let mut registry = Registry::new();
    for (key, Entry(topic, payload)) in entries {
        match Idl::from_json(topic, &payload) {
            Ok(idl) => registry.upsert(idl),
            Err(err) => warn!("invalid cached idl for topic {key}: {err}"),
        }
    }
    Ok(registry)
}
