//! On-disk format: the JSON record index and one blob file per slot
//!
//! Every write goes to a temporary sibling first and is renamed into place, so
//! readers only ever observe a complete previous or complete new file.

use crate::error::{CacheError, Result};
use crate::types::CacheRecord;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Path of the blob file backing `slot`
pub fn slot_path(cache_dir: &Path, slot: usize) -> PathBuf {
    cache_dir.join(slot.to_string())
}

pub fn encode_index(records: &[CacheRecord]) -> Result<Vec<u8>> {
    serde_json::to_vec(records).map_err(CacheError::Encode)
}

pub fn decode_index(path: &Path, buf: &[u8]) -> Result<Vec<CacheRecord>> {
    serde_json::from_slice(buf).map_err(|source| CacheError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and decode the index file at `path`
pub async fn read_index(path: &Path) -> Result<Vec<CacheRecord>> {
    let buf = fs::read(path).await.map_err(|e| CacheError::io(path, e))?;
    decode_index(path, &buf)
}

/// Encode `records` and atomically replace the index file at `path`
pub async fn write_index(path: &Path, records: &[CacheRecord]) -> Result<()> {
    let buf = encode_index(records)?;
    write_atomic(path, &buf).await
}

pub async fn read_slot(cache_dir: &Path, slot: usize) -> Result<Vec<u8>> {
    let path = slot_path(cache_dir, slot);
    fs::read(&path).await.map_err(|e| CacheError::io(path, e))
}

pub async fn write_slot(cache_dir: &Path, slot: usize, data: &[u8]) -> Result<()> {
    write_atomic(&slot_path(cache_dir, slot), data).await
}

/// Write `data` to a temporary sibling of `path`, then rename it over `path`
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(CacheError::io(&tmp, e));
    }

    fs::rename(&tmp, path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
