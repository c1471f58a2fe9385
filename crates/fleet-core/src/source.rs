//! Collaborator contracts
//!
//! Everything that talks to the outside world is a trait here. Remote calls
//! are async and return [`RemoteError`] variants instead of raising, so retry
//! and refresh decisions are ordinary control flow in the caller.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, RemoteError, Result};
use crate::record::{Field, FieldValue, RawRecord};

/// An opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token expires within `skew` of `now`.
    ///
    /// A window reaching past the representable range covers every expiry.
    pub fn expires_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| {
            now.checked_add_signed(skew)
                .is_none_or(|horizon| horizon >= at)
        })
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source A: cursor-paginated fetch.
#[async_trait]
pub trait CursorFetcher: Send + Sync {
    /// Fetch the page at `cursor` (`None` for the first page). Returns the
    /// records and the cursor of the next page, if any.
    async fn fetch(
        &self,
        cursor: Option<String>,
        token: &Token,
    ) -> std::result::Result<(Vec<RawRecord>, Option<String>), RemoteError>;
}

/// Source B: page-number fetch with a total count.
#[async_trait]
pub trait OffsetFetcher: Send + Sync {
    /// Fetch page `page` (starting at 0). Returns the records and the total
    /// population size.
    async fn fetch(
        &self,
        page: u32,
        token: &Token,
    ) -> std::result::Result<(Vec<RawRecord>, usize), RemoteError>;
}

/// Applies corrective field updates to Source B.
#[async_trait]
pub trait UpdateApplier: Send + Sync {
    async fn apply(
        &self,
        key: &str,
        target_id: &str,
        fields: &[(Field, FieldValue)],
        token: &Token,
    ) -> std::result::Result<(), RemoteError>;
}

/// Produces fresh credentials. The core never builds tokens itself.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refresh(&self) -> std::result::Result<Token, String>;
}

/// Read-only vendor identifier → display name mapping.
pub trait VendorLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<String>;
}

/// Vendor mapping backed by a map loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct VendorMapping {
    names: HashMap<String, String>,
}

impl VendorMapping {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Load a JSON object of `{"id": "name"}`.
    ///
    /// A missing file is not an error: vendor identifiers are then used as
    /// names, and a warning is logged.
    pub fn load(path: &Path) -> Result<Self> {
        let store = fleet_fs::ConfigStore::new();
        match store.load_optional::<HashMap<String, String>>(path)? {
            Some(names) => {
                tracing::info!(path = %path.display(), count = names.len(), "Loaded vendor mappings");
                Ok(Self { names })
            }
            None => {
                tracing::warn!(
                    path = %path.display(),
                    "Vendor mapping file not found; using vendor IDs as names"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl VendorLookup for VendorMapping {
    fn lookup(&self, id: &str) -> Option<String> {
        self.names.get(id).cloned()
    }
}

/// Durable set of processed keys.
///
/// Saves are whole-set replacements; implementations must make them atomic.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<BTreeSet<String>>;
    fn save(&self, keys: &BTreeSet<String>) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

impl CheckpointStore for fleet_fs::CheckpointFile {
    fn load(&self) -> Result<BTreeSet<String>> {
        Ok(fleet_fs::CheckpointFile::load(self)?)
    }

    fn save(&self, keys: &BTreeSet<String>) -> Result<()> {
        Ok(fleet_fs::CheckpointFile::save(self, keys)?)
    }

    fn clear(&self) -> Result<()> {
        Ok(fleet_fs::CheckpointFile::clear(self)?)
    }
}

/// Process-local checkpoint, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    keys: Mutex<BTreeSet<String>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().collect()),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<String>>> {
        self.keys.lock().map_err(|_| Error::Checkpoint {
            message: "in-memory checkpoint lock poisoned".to_string(),
        })
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Result<BTreeSet<String>> {
        Ok(self.guard()?.clone())
    }

    fn save(&self, keys: &BTreeSet<String>) -> Result<()> {
        *self.guard()? = keys.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.guard()?.clear();
        Ok(())
    }
}

/// A source of successive record pages, drained by the index builder.
///
/// Implementations must not advance on error, so the caller can retry the
/// same page after refreshing credentials or backing off.
#[async_trait]
pub trait PageSource: Send {
    /// Human-readable name for logs and errors.
    fn name(&self) -> &str;

    /// Next page, or `None` once the population is exhausted.
    async fn next_page(
        &mut self,
        token: &Token,
    ) -> std::result::Result<Option<Vec<RawRecord>>, RemoteError>;
}

/// Drives a [`CursorFetcher`] until it reports no next cursor.
///
/// An empty page ends the fetch even if a cursor came back with it.
pub struct CursorPages<'a> {
    name: String,
    fetcher: &'a dyn CursorFetcher,
    cursor: Option<String>,
    done: bool,
}

impl<'a> CursorPages<'a> {
    pub fn new(name: impl Into<String>, fetcher: &'a dyn CursorFetcher) -> Self {
        Self {
            name: name.into(),
            fetcher,
            cursor: None,
            done: false,
        }
    }
}

#[async_trait]
impl PageSource for CursorPages<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_page(
        &mut self,
        token: &Token,
    ) -> std::result::Result<Option<Vec<RawRecord>>, RemoteError> {
        if self.done {
            return Ok(None);
        }

        let (records, next) = self.fetcher.fetch(self.cursor.clone(), token).await?;
        if records.is_empty() {
            self.done = true;
            return Ok(None);
        }

        match next {
            Some(cursor) if !cursor.is_empty() => self.cursor = Some(cursor),
            _ => self.done = true,
        }
        Ok(Some(records))
    }
}

/// Drives an [`OffsetFetcher`] until the cumulative count reaches the total.
///
/// An empty page also ends the fetch, so a total that overstates the
/// population cannot loop forever.
pub struct OffsetPages<'a> {
    name: String,
    fetcher: &'a dyn OffsetFetcher,
    page: u32,
    seen: usize,
    done: bool,
}

impl<'a> OffsetPages<'a> {
    pub fn new(name: impl Into<String>, fetcher: &'a dyn OffsetFetcher) -> Self {
        Self {
            name: name.into(),
            fetcher,
            page: 0,
            seen: 0,
            done: false,
        }
    }
}

#[async_trait]
impl PageSource for OffsetPages<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_page(
        &mut self,
        token: &Token,
    ) -> std::result::Result<Option<Vec<RawRecord>>, RemoteError> {
        if self.done {
            return Ok(None);
        }

        let (records, total) = self.fetcher.fetch(self.page, token).await?;
        if records.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.seen += records.len();
        self.page += 1;
        if self.seen >= total {
            self.done = true;
        }
        Ok(Some(records))
    }
}
