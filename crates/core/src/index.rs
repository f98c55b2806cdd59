//! Nearest-neighbor lookup over content embeddings.
//!
//! Vectors are L2-normalized at insertion, so cosine similarity reduces to a
//! dot product over a flat `Vec<f32>` arena, searched exactly with one linear
//! pass per query.
//!
//! Rebuilds are lazy. The store carries a monotonic scan epoch; the served
//! snapshot remembers the epoch it was built from, and the first query after
//! a mismatch rebuilds and atomically swaps the snapshot. In-flight queries
//! keep reading the old snapshot.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::embed::l2_normalize;
use crate::error::{Error, Result};
use crate::store::Store;

const MAGIC: [u8; 4] = *b"FSAN";
const FORMAT_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.bin";

/// One immutable generation of the index.
struct Snapshot {
    epoch: u64,
    dim: usize,
    /// File ids, parallel to `vectors` (row i covers ids[i]).
    ids: Vec<i64>,
    /// Flat normalized embedding storage, `ids.len() * dim` floats.
    vectors: Vec<f32>,
}

impl Snapshot {
    fn empty(dim: usize) -> Self {
        Self { epoch: 0, dim, ids: Vec::new(), vectors: Vec::new() }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub struct VectorIndex {
    file_path: PathBuf,
    dim: usize,
    current: RwLock<Arc<Snapshot>>,
    rebuild: Mutex<()>,
    force_rebuild: AtomicBool,
}

impl VectorIndex {
    /// Open the index, loading the serialized snapshot from the data dir when
    /// one exists and matches the expected format and dimension. Absent or
    /// corrupt files just mean the first query rebuilds from the store.
    pub fn open(data_dir: &Path, dim: usize) -> Self {
        let file_path = data_dir.join(INDEX_FILE);
        let snapshot = match load_snapshot(&file_path, dim) {
            Some(snap) => {
                info!(entries = snap.len(), epoch = snap.epoch, "Loaded vector index from disk");
                snap
            }
            None => Snapshot::empty(dim),
        };
        Self {
            file_path,
            dim,
            current: RwLock::new(Arc::new(snapshot)),
            rebuild: Mutex::new(()),
            force_rebuild: AtomicBool::new(false),
        }
    }

    /// Force a rebuild on the next `ensure_current`, regardless of epoch.
    pub fn mark_dirty(&self) {
        self.force_rebuild.store(true, Ordering::Relaxed);
    }

    /// True when the served snapshot lags the store's scan epoch.
    pub fn is_dirty(&self, store: &Store) -> Result<bool> {
        if self.force_rebuild.load(Ordering::Relaxed) {
            return Ok(true);
        }
        let served = self.current.read().unwrap().epoch;
        Ok(served != store.scan_epoch()?)
    }

    /// Number of indexed entries in the served snapshot.
    pub fn len(&self) -> usize {
        self.current.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild from the store iff the served snapshot is stale; no-op
    /// otherwise. Concurrent callers coalesce onto one rebuild.
    pub fn ensure_current(&self, store: &Store) -> Result<()> {
        let target = store.scan_epoch()?;
        if !self.force_rebuild.load(Ordering::Relaxed)
            && self.current.read().unwrap().epoch == target
        {
            return Ok(());
        }

        let _guard = self.rebuild.lock().unwrap();
        // Re-check under the lock: a racing caller may have rebuilt already.
        let target = store.scan_epoch()?;
        if !self.force_rebuild.load(Ordering::Relaxed)
            && self.current.read().unwrap().epoch == target
        {
            return Ok(());
        }

        let rows = store.live_embeddings()?;
        let mut ids = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len() * self.dim);
        for (id, mut emb) in rows {
            if emb.len() != self.dim {
                warn!(id, got = emb.len(), want = self.dim, "Skipping mis-sized embedding");
                continue;
            }
            l2_normalize(&mut emb);
            ids.push(id);
            vectors.extend_from_slice(&emb);
        }

        let snapshot = Arc::new(Snapshot { epoch: target, dim: self.dim, ids, vectors });
        if let Err(e) = persist_snapshot(&self.file_path, &snapshot) {
            // Non-fatal: the next startup rebuilds from the store.
            warn!(error = %e, path = %self.file_path.display(), "Failed to persist vector index");
        }

        info!(entries = snapshot.len(), epoch = target, "Vector index rebuilt");
        *self.current.write().unwrap() = snapshot;
        self.force_rebuild.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Top-k ids by cosine similarity, descending. `k` is clamped to the
    /// number of indexed entries; fewer than two indexed embeddings yield an
    /// empty result.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<(i64, f32)> {
        let snapshot = self.current.read().unwrap().clone();
        if snapshot.len() < 2 || k == 0 {
            return Vec::new();
        }
        if vector.len() != snapshot.dim {
            debug!(got = vector.len(), want = snapshot.dim, "Query vector dimension mismatch");
            return Vec::new();
        }

        let mut query = vector.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(i64, f32)> = Vec::with_capacity(snapshot.len());
        for (i, &id) in snapshot.ids.iter().enumerate() {
            let offset = i * snapshot.dim;
            let row = &snapshot.vectors[offset..offset + snapshot.dim];
            let dot: f32 = query.iter().zip(row.iter()).map(|(a, b)| a * b).sum();
            scored.push((id, dot));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        scored.truncate(k.min(snapshot.len()));
        scored
    }
}

// ---------------------------------------------------------------------------
// On-disk format: MAGIC | version u32 | dim u32 | count u32 | epoch u64 |
// count x (id i64, dim x f32), all little-endian.
// ---------------------------------------------------------------------------

fn persist_snapshot(path: &Path, snap: &Snapshot) -> Result<()> {
    let mut buf: Vec<u8> =
        Vec::with_capacity(24 + snap.len() * (8 + snap.dim * 4));
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(snap.dim as u32).to_le_bytes());
    buf.extend_from_slice(&(snap.len() as u32).to_le_bytes());
    buf.extend_from_slice(&snap.epoch.to_le_bytes());
    for (i, id) in snap.ids.iter().enumerate() {
        buf.extend_from_slice(&id.to_le_bytes());
        let offset = i * snap.dim;
        for f in &snap.vectors[offset..offset + snap.dim] {
            buf.extend_from_slice(&f.to_le_bytes());
        }
    }

    // The file on disk is always a complete snapshot: temp file, then rename.
    let tmp = path.with_extension("bin.tmp");
    let mut file = std::fs::File::create(&tmp)
        .map_err(|e| Error::Index(format!("create {}: {e}", tmp.display())))?;
    file.write_all(&buf).map_err(|e| Error::Index(format!("write index: {e}")))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::Index(format!("rename index: {e}")))?;
    Ok(())
}

fn load_snapshot(path: &Path, dim: usize) -> Option<Snapshot> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 24 || bytes[..4] != MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
    if version != FORMAT_VERSION {
        debug!(path = %path.display(), "Index format version mismatch, will rebuild");
        return None;
    }
    let file_dim = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
    let count = u32::from_le_bytes(bytes[12..16].try_into().ok()?) as usize;
    let epoch = u64::from_le_bytes(bytes[16..24].try_into().ok()?);
    if file_dim != dim {
        debug!(file_dim, dim, "Index dimension mismatch, will rebuild");
        return None;
    }

    let entry_size = 8 + dim * 4;
    if bytes.len() != 24 + count * entry_size {
        warn!(path = %path.display(), "Truncated vector index file, will rebuild");
        return None;
    }

    let mut ids = Vec::with_capacity(count);
    let mut vectors = Vec::with_capacity(count * dim);
    let mut off = 24;
    for _ in 0..count {
        ids.push(i64::from_le_bytes(bytes[off..off + 8].try_into().ok()?));
        off += 8;
        for _ in 0..dim {
            vectors.push(f32::from_le_bytes(bytes[off..off + 4].try_into().ok()?));
            off += 4;
        }
    }
    Some(Snapshot { epoch, dim, ids, vectors })
}
