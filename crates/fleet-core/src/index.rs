//! Bulk lookup index
//!
//! The whole remote population is fetched page by page before any lookup is
//! answered. Records are normalized on the way in; keyless records are
//! counted and dropped, duplicate keys keep their first record.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{Error, MalformedField, RemoteError, Result};
use crate::events::{Event, EventSink};
use crate::record::{DeviceRecord, Normalizer, RawRecord};
use crate::source::PageSource;
use crate::sync::{RateGate, RetryPolicy, SharedCredentials, saturating_millis};

/// Counters gathered while draining a page source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub pages: usize,
    /// Raw records received
    pub fetched: usize,
    /// Records kept
    pub indexed: usize,
    pub unindexable: usize,
    pub duplicates: usize,
    pub malformed: Vec<MalformedField>,
}

/// Key → record map over one system's full population.
#[derive(Debug, Clone, Default)]
pub struct LookupIndex {
    records: HashMap<String, DeviceRecord>,
    stats: IndexStats,
}

impl LookupIndex {
    /// Index already-fetched raw records.
    pub fn from_raw<'a>(
        normalizer: &Normalizer,
        raw: impl IntoIterator<Item = &'a RawRecord>,
        sink: &dyn EventSink,
    ) -> Self {
        let mut index = LookupIndex::default();
        let mut ingest = Ingest::new(normalizer, "local", sink);
        for record in raw {
            ingest.accept(record, |r| index.insert(r));
        }
        index.stats = ingest.finish();
        index.stats.indexed = index.records.len();
        index
    }

    fn insert(&mut self, record: DeviceRecord) -> bool {
        use std::collections::hash_map::Entry;
        match self.records.entry(record.key().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Look up a normalized key.
    pub fn get(&self, key: &str) -> Option<&DeviceRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }
}

/// Ordered, de-duplicated records of one system, as fetched.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<DeviceRecord>,
    pub stats: IndexStats,
}

/// Normalizes raw records and tracks counters for one drain.
struct Ingest<'a> {
    normalizer: &'a Normalizer,
    source: String,
    sink: &'a dyn EventSink,
    stats: IndexStats,
}

impl<'a> Ingest<'a> {
    fn new(normalizer: &'a Normalizer, source: &str, sink: &'a dyn EventSink) -> Self {
        Self {
            normalizer,
            source: source.to_string(),
            sink,
            stats: IndexStats::default(),
        }
    }

    /// `keep` returns false when the key was already present.
    fn accept(&mut self, raw: &RawRecord, mut keep: impl FnMut(DeviceRecord) -> bool) {
        self.stats.fetched += 1;
        let normalized = match self.normalizer.normalize(raw) {
            Ok(normalized) => normalized,
            Err(_) => {
                self.stats.unindexable += 1;
                self.sink.emit(Event::Unindexable {
                    source: self.source.clone(),
                });
                return;
            }
        };

        for issue in normalized.malformed {
            self.sink.emit(Event::Malformed(issue.clone()));
            self.stats.malformed.push(issue);
        }

        let key = normalized.record.key().to_string();
        if !keep(normalized.record) {
            self.stats.duplicates += 1;
            self.sink.emit(Event::DuplicateKey {
                source: self.source.clone(),
                key,
            });
        }
    }

    fn finish(self) -> IndexStats {
        self.stats
    }
}

/// Drains [`PageSource`]s under the run's retry and credential policy.
pub struct IndexBuilder<'a> {
    normalizer: Normalizer,
    policy: &'a RetryPolicy,
    gate: &'a RateGate,
    credentials: &'a SharedCredentials,
    sink: &'a dyn EventSink,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        normalizer: Normalizer,
        policy: &'a RetryPolicy,
        gate: &'a RateGate,
        credentials: &'a SharedCredentials,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            normalizer,
            policy,
            gate,
            credentials,
            sink,
        }
    }

    /// Fetch every page and build a keyed index.
    ///
    /// # Errors
    ///
    /// A page that cannot be fetched within the retry policy fails the whole
    /// build; a partial index is never returned.
    pub async fn build(&self, pages: &mut dyn PageSource) -> Result<LookupIndex> {
        let mut index = LookupIndex::default();
        let stats = self.drain(pages, |record| index.insert(record)).await?;
        index.stats = stats;
        index.stats.indexed = index.records.len();
        tracing::info!(
            source = %pages.name(),
            indexed = index.stats.indexed,
            unindexable = index.stats.unindexable,
            duplicates = index.stats.duplicates,
            "Built lookup index"
        );
        Ok(index)
    }

    /// Fetch every page and keep records in fetch order, first key wins.
    pub async fn collect(&self, pages: &mut dyn PageSource) -> Result<Snapshot> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut stats = self
            .drain(pages, |record| {
                if seen.insert(record.key().to_string()) {
                    records.push(record);
                    true
                } else {
                    false
                }
            })
            .await?;
        stats.indexed = records.len();
        tracing::info!(
            source = %pages.name(),
            records = stats.indexed,
            unindexable = stats.unindexable,
            "Collected records"
        );
        Ok(Snapshot { records, stats })
    }

    async fn drain(
        &self,
        pages: &mut dyn PageSource,
        keep: impl FnMut(DeviceRecord) -> bool,
    ) -> Result<IndexStats> {
        let source = pages.name().to_string();
        let mut keep = keep;
        let mut ingest = Ingest::new(&self.normalizer, &source, self.sink);
        let mut page_no = 0usize;

        while let Some(page) = self.next_page(pages, &source).await? {
            page_no += 1;
            self.sink.emit(Event::PageFetched {
                source: source.clone(),
                page: page_no,
                records: page.len(),
            });
            for raw in &page {
                ingest.accept(raw, &mut keep);
            }
        }

        let mut stats = ingest.finish();
        stats.pages = page_no;
        Ok(stats)
    }

    async fn next_page(
        &self,
        pages: &mut dyn PageSource,
        source: &str,
    ) -> Result<Option<Vec<RawRecord>>> {
        let mut schedule = self.policy.schedule();
        let mut attempts = 0u32;
        let mut refreshes = 0u32;
        let mut lease = self.credentials.current(self.sink).await?;

        loop {
            self.gate.wait().await;
            match pages.next_page(&lease.token).await {
                Ok(page) => return Ok(page),
                Err(RemoteError::AuthExpired) => {
                    if refreshes >= self.policy.refresh_budget {
                        return Err(Error::RefreshBudgetExhausted {
                            key: format!("{source} page fetch"),
                            budget: self.policy.refresh_budget,
                        });
                    }
                    refreshes += 1;
                    lease = self
                        .credentials
                        .refresh_after(lease.generation, self.sink)
                        .await?;
                }
                Err(err) => {
                    attempts += 1;
                    if !err.is_retryable() || attempts >= self.policy.max_attempts {
                        return Err(Error::FetchFailed {
                            source_name: source.to_string(),
                            attempts,
                            source: err,
                        });
                    }
                    let delay = schedule.next_delay();
                    self.sink.emit(Event::Retrying {
                        key: format!("{source} page"),
                        attempt: attempts,
                        delay_ms: saturating_millis(delay),
                        reason: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
