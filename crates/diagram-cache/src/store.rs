//! Capacity-bounded record collection backed by numbered slot files

use crate::codec;
use crate::error::{CacheError, Result};
use crate::rank;
use crate::types::{ellipsis, CacheRecord, CacheStats, DiagramType, RecordSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of the read-only lookup phase
#[derive(Debug)]
pub enum Lookup {
    Hit { data: Vec<u8>, slot: usize },
    Miss,
}

/// What an admit/update did to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Existing record's stats were updated, content untouched
    Touched { slot: usize },
    /// Key was already present; its slot content was rewritten
    Rewritten { slot: usize },
    /// New record placed in a free slot
    Appended { slot: usize },
    /// New record replaced the lowest-ranked one
    Evicted { slot: usize, victim: CacheRecord },
    /// Nothing changed: zero capacity, or the touched record is gone
    Skipped,
}

/// The cache store: ordered records, slot files, and hit/miss counters.
///
/// A single [`RwLock`] guards the records. Lookups share it; admits hold it
/// exclusively until the index has been rewritten.
pub struct SlotStore {
    records: RwLock<Vec<CacheRecord>>,
    cache_dir: PathBuf,
    index_path: PathBuf,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SlotStore {
    /// Create an empty store keeping slot files and the index in `cache_dir`
    pub fn new(cache_dir: PathBuf, index_filename: &str, capacity: usize) -> Self {
        let index_path = cache_dir.join(index_filename);
        Self {
            records: RwLock::new(Vec::with_capacity(capacity)),
            cache_dir,
            index_path,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Ensure the cache directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CacheError::io(&self.cache_dir, e))?;
        info!(cache_dir = ?self.cache_dir, capacity = self.capacity, "Cache initialized");
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Index file that every admit/update rewrites
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn size(&self) -> usize {
        self.records.read().await.len()
    }

    /// Replace the in-memory records with the contents of the index at `path`.
    ///
    /// Records that would break the store's invariants (duplicate key, slot out
    /// of range or already taken) are dropped. Returns the number kept.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let loaded = codec::read_index(path).await?;
        let total = loaded.len();
        let kept = sanitize(loaded, self.capacity);
        let count = kept.len();

        *self.records.write().await = kept;

        if count < total {
            warn!(total, kept = count, path = ?path, "Dropped invalid cache index records");
        }
        info!(records = count, path = ?path, "Loaded cache index");
        Ok(count)
    }

    /// Write the current records to `path`
    pub async fn save(&self, path: &Path) -> Result<()> {
        let records = self.records.read().await;
        codec::write_index(path, &records).await
    }

    /// Look up a key and read its content, counting the hit or miss.
    ///
    /// A record whose slot file cannot be read counts as a miss.
    pub async fn lookup(&self, diagram_type: DiagramType, expression: &str) -> Lookup {
        {
            let records = self.records.read().await;
            if let Some(record) = records.iter().find(|r| r.matches(diagram_type, expression)) {
                match codec::read_slot(&self.cache_dir, record.slot).await {
                    Ok(data) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(slot = record.slot, record = %record, "Cache hit");
                        return Lookup::Hit {
                            data,
                            slot: record.slot,
                        };
                    }
                    Err(e) => {
                        warn!(slot = record.slot, error = %e, "Failed to read cached diagram, treating as miss");
                    }
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%diagram_type, expression = %ellipsis(expression, 10), "Cache miss");
        Lookup::Miss
    }

    /// Admit or update a record, then persist the index.
    ///
    /// `candidate_slot` is the slot a preceding [`lookup`](Self::lookup) hit, if
    /// any. When that slot still holds the key only its stats change; otherwise
    /// `data` is written to the key's existing slot, a free slot, or the slot
    /// of the lowest-ranked record.
    pub async fn put(
        &self,
        diagram_type: DiagramType,
        expression: &str,
        data: &[u8],
        candidate_slot: Option<usize>,
    ) -> Result<Admission> {
        self.put_at(diagram_type, expression, data, candidate_slot, Utc::now())
            .await
    }

    pub(crate) async fn put_at(
        &self,
        diagram_type: DiagramType,
        expression: &str,
        data: &[u8],
        candidate_slot: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let mut records = self.records.write().await;

        if let Some(slot) = candidate_slot {
            if let Some(admission) = self
                .touch_locked(&mut records, diagram_type, expression, slot, now)
                .await?
            {
                return Ok(admission);
            }
        }

        self.admit(&mut records, diagram_type, expression, data, now)
            .await
    }

    /// Update the stats of the record a lookup hit in `slot`.
    ///
    /// Does nothing when that slot no longer holds the key, i.e. the record
    /// was evicted after the lookup.
    pub async fn touch(
        &self,
        diagram_type: DiagramType,
        expression: &str,
        slot: usize,
    ) -> Result<Admission> {
        let mut records = self.records.write().await;
        let touched = self
            .touch_locked(&mut records, diagram_type, expression, slot, Utc::now())
            .await?;

        Ok(touched.unwrap_or_else(|| {
            debug!(slot, "Touched record is gone, skipping");
            Admission::Skipped
        }))
    }

    async fn touch_locked(
        &self,
        records: &mut [CacheRecord],
        diagram_type: DiagramType,
        expression: &str,
        slot: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Admission>> {
        let Some(pos) = records
            .iter()
            .position(|r| r.slot == slot && r.matches(diagram_type, expression))
        else {
            return Ok(None);
        };

        let before = records[pos].clone();
        records[pos].touch(now);
        if let Err(e) = codec::write_index(&self.index_path, &*records).await {
            records[pos] = before;
            return Err(e);
        }

        debug!(slot, record = %records[pos], "Updated cache record");
        Ok(Some(Admission::Touched { slot }))
    }

    /// Store `data` for a key, persisting the index after every change.
    ///
    /// The persisted index never maps a key to a slot holding other bytes, and
    /// a failed index write leaves the in-memory records matching the file.
    async fn admit(
        &self,
        records: &mut Vec<CacheRecord>,
        diagram_type: DiagramType,
        expression: &str,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        // a concurrent miss for the same key got here first
        if let Some(pos) = records
            .iter()
            .position(|r| r.matches(diagram_type, expression))
        {
            let slot = records[pos].slot;
            codec::write_slot(&self.cache_dir, slot, data).await?;

            let before = records[pos].clone();
            records[pos].touch(now);
            if let Err(e) = codec::write_index(&self.index_path, records.as_slice()).await {
                records[pos] = before;
                return Err(e);
            }
            debug!(slot, record = %records[pos], "Rewrote cache record");
            return Ok(Admission::Rewritten { slot });
        }

        if records.len() < self.capacity {
            let slot = free_slot(records.as_slice());
            codec::write_slot(&self.cache_dir, slot, data).await?;

            records.push(CacheRecord::new(diagram_type, expression, slot, now));
            if let Err(e) = codec::write_index(&self.index_path, records.as_slice()).await {
                records.pop();
                return Err(e);
            }
            debug!(slot, record = %records[records.len() - 1], "Appended cache record");
            return Ok(Admission::Appended { slot });
        }

        let Some(victim) = rank::lowest_ranked(records.as_slice(), now) else {
            warn!("Cache has no capacity, not storing diagram");
            return Ok(Admission::Skipped);
        };

        // Retire the victim on disk before its slot is reused.
        let evicted = records.remove(victim);
        let slot = evicted.slot;
        if let Err(e) = codec::write_index(&self.index_path, records.as_slice()).await {
            records.insert(victim, evicted);
            return Err(e);
        }
        debug!(slot, evicted = %evicted, "Evicted cache record");

        // From here on a failure leaves the slot unreferenced.
        codec::write_slot(&self.cache_dir, slot, data).await?;

        records.insert(victim, CacheRecord::new(diagram_type, expression, slot, now));
        if let Err(e) = codec::write_index(&self.index_path, records.as_slice()).await {
            records.remove(victim);
            return Err(e);
        }
        debug!(slot, record = %records[victim], "Replaced cache record");

        Ok(Admission::Evicted {
            slot,
            victim: evicted,
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let records = self.records.read().await;
        CacheStats {
            entries: records.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Copy of all records in collection order with their rank at `now`
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Vec<RecordSnapshot> {
        let records = self.records.read().await;
        records
            .iter()
            .map(|record| RecordSnapshot {
                rank: rank::rank(record, now),
                record: record.clone(),
            })
            .collect()
    }
}

/// Lowest slot number not held by any record
fn free_slot(records: &[CacheRecord]) -> usize {
    let used: HashSet<usize> = records.iter().map(|r| r.slot).collect();
    (0..).find(|slot| !used.contains(slot)).unwrap_or(records.len())
}

fn sanitize(loaded: Vec<CacheRecord>, capacity: usize) -> Vec<CacheRecord> {
    let mut kept = Vec::with_capacity(loaded.len().min(capacity));
    let mut slots = HashSet::new();
    let mut keys = HashSet::new();

    for mut record in loaded {
        if record.slot >= capacity || slots.contains(&record.slot) {
            warn!(slot = record.slot, capacity, "Skipping index record with unusable slot");
            continue;
        }
        if !keys.insert((record.diagram_type, record.expression.clone())) {
            warn!(slot = record.slot, record = %record, "Skipping duplicate index record");
            continue;
        }
        slots.insert(record.slot);
        if record.last_access < record.created {
            record.last_access = record.created;
        }
        kept.push(record);
    }

    kept
}
