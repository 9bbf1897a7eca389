use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::search::corpus::InMemoryCorpus;

/// Ordered, deduplicated set of valid document identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdentifierSet {
    ordered: Vec<String>,
    lookup: HashSet<String>,
}

impl IdentifierSet {
    pub fn contains(&self, identifier: &str) -> bool {
        self.lookup.contains(identifier)
    }

    /// Identifiers in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl FromIterator<String> for IdentifierSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::default();
        for id in iter {
            let id = id.trim().to_string();
            if !id.is_empty() && set.lookup.insert(id.clone()) {
                set.ordered.push(id);
            }
        }
        set
    }
}

/// Where the authoritative identifier list comes from.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<String>>;
}

/// Fixed list, for tests and small deployments.
pub struct StaticIdentifiers(pub Vec<String>);

#[async_trait]
impl IdentifierSource for StaticIdentifiers {
    async fn fetch_all(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// A file holding a JSON array of strings, or one identifier per line.
pub struct FileIdentifiers {
    path: PathBuf,
}

impl FileIdentifiers {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentifierSource for FileIdentifiers {
    async fn fetch_all(&self) -> Result<Vec<String>> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read identifiers from {}", self.path.display()))?;

        if data.trim_start().starts_with('[') {
            return serde_json::from_str(&data).context("Identifier file is not a JSON string array");
        }
        Ok(data
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl IdentifierSource for InMemoryCorpus {
    async fn fetch_all(&self) -> Result<Vec<String>> {
        anyhow::ensure!(!self.is_empty(), "Corpus is empty");
        Ok(self.identifiers())
    }
}

struct Loaded {
    set: Arc<IdentifierSet>,
    loaded_at: DateTime<Utc>,
}

/// Lazily loaded authoritative identifier list. A failed load leaves the
/// registry empty and is retried on the next [`ensure_loaded`] call; once
/// loaded the list is read-only.
///
/// [`ensure_loaded`]: IdentifierRegistry::ensure_loaded
pub struct IdentifierRegistry {
    source: Arc<dyn IdentifierSource>,
    state: RwLock<Option<Loaded>>,
    load_gate: tokio::sync::Mutex<()>,
}

impl IdentifierRegistry {
    pub fn new(source: Arc<dyn IdentifierSource>) -> Self {
        Self {
            source,
            state: RwLock::new(None),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The loaded set, if any, without attempting a load.
    pub fn get(&self) -> Option<Arc<IdentifierSet>> {
        self.state.read().as_ref().map(|l| l.set.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().as_ref().map(|l| l.loaded_at)
    }

    /// Return the set, loading it first if needed. Concurrent callers share
    /// one fetch.
    pub async fn ensure_loaded(&self) -> Option<Arc<IdentifierSet>> {
        if let Some(set) = self.get() {
            return Some(set);
        }

        let _gate = self.load_gate.lock().await;
        if let Some(set) = self.get() {
            return Some(set);
        }

        match self.source.fetch_all().await {
            Ok(ids) => {
                let set = Arc::new(IdentifierSet::from_iter(ids));
                if set.is_empty() {
                    tracing::warn!("Identifier source returned no identifiers");
                    return None;
                }
                tracing::info!("Loaded {} authoritative identifiers", set.len());
                *self.state.write() = Some(Loaded {
                    set: set.clone(),
                    loaded_at: Utc::now(),
                });
                Some(set)
            }
            Err(e) => {
                tracing::warn!("Identifier list unavailable: {e:#}");
                None
            }
        }
    }
}
