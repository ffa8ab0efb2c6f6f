//! Chunks that spill sorted runs to a temp file.
//!
//! Records fill a pooled buffer. When the buffer is full it is handed to the
//! sorter pool, sorted and written to a reserved [`FileRegion`] of the chunk's
//! spill file, and a fresh buffer takes its place. Flipping waits for every
//! pending spill, maps the spill file once and merges all regions plus the
//! in-memory remainder through a [`CompositeCursor`].
//!
//! ## Invariants
//!
//! - regions of one spill file never overlap; each is reserved before its
//!   write is scheduled
//! - sources are merged in spill order, so equal keys keep insertion order
//! - the spill file is removed when the chunk or its cursor is dropped

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use rayon::ThreadPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::import::buffer::BufferPool;
use crate::import::chunk::{record_len, Chunk, InMemorySortedChunk};
use crate::import::cursor::{CompositeCursor, MeteredCursor};
use crate::import::region::{FileRegion, RegionData};

/// Chunk of unbounded size backed by pooled buffers and a spill file.
pub struct ExternalSortChunk {
    name: String,
    pool: BufferPool,
    sorter: Arc<ThreadPool>,
    temp_dir: PathBuf,
    current: Option<InMemorySortedChunk>,
    spill: Option<SpillFile>,
    regions: Vec<FileRegion>,
    pending: usize,
    results_tx: Sender<CoreResult<()>>,
    results_rx: Receiver<CoreResult<()>>,
    size: u64,
}

impl ExternalSortChunk {
    /// Creates an empty chunk. Nothing touches the disk before the first
    /// spill.
    pub fn new(
        name: impl Into<String>,
        pool: BufferPool,
        sorter: Arc<ThreadPool>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            name: name.into(),
            pool,
            sorter,
            temp_dir: temp_dir.into(),
            current: None,
            spill: None,
            regions: Vec::new(),
            pending: 0,
            results_tx,
            results_rx,
            size: 0,
        }
    }

    /// Chunk name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of regions spilled so far.
    #[must_use]
    pub fn spill_count(&self) -> usize {
        self.regions.len()
    }

    fn put_current(&mut self, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        if self.current.is_none() {
            let buffer = self.pool.acquire()?;
            let name = format!("{}#{}", self.name, self.regions.len());
            self.current = Some(InMemorySortedChunk::new(name, buffer));
        }
        match self.current.as_mut() {
            Some(chunk) => chunk.put(key, value),
            None => Ok(false),
        }
    }

    fn spill_current(&mut self) -> CoreResult<()> {
        let Some(chunk) = self.current.take() else {
            return Ok(());
        };
        if chunk.is_empty() {
            return Ok(());
        }
        let region = self.reserve_region(chunk.used_bytes() as u64)?;
        debug!(
            chunk = %self.name,
            records = chunk.len(),
            offset = region.offset(),
            size = region.size(),
            "spilling sorted run"
        );
        self.regions.push(region.clone());
        self.pending += 1;
        let results = self.results_tx.clone();
        self.sorter.spawn(move || {
            let mut chunk = chunk;
            chunk.par_sort();
            let outcome = region.write(chunk.records());
            drop(chunk);
            // Only fails once the chunk itself is gone.
            let _ = results.send(outcome);
        });
        Ok(())
    }

    fn reserve_region(&mut self, size: u64) -> CoreResult<FileRegion> {
        let mut spill = match self.spill.take() {
            Some(spill) => spill,
            None => SpillFile::create(&self.temp_dir, &self.name)?,
        };
        let region = spill.reserve(size);
        self.spill = Some(spill);
        Ok(region)
    }

    fn wait_for_spills(&mut self) -> CoreResult<()> {
        let mut first_error = None;
        while self.pending > 0 {
            let outcome = self.results_rx.recv().map_err(|_| {
                CoreError::invalid_operation(format!("spill worker of {} vanished", self.name))
            })?;
            self.pending -= 1;
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Chunk for ExternalSortChunk {
    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        let size = record_len(key, value);
        let capacity = self.pool.buffer_size();
        if size > capacity {
            return Err(CoreError::RecordTooLarge { size, capacity });
        }
        if !self.put_current(key, value)? {
            self.spill_current()?;
            if !self.put_current(key, value)? {
                return Err(CoreError::RecordTooLarge { size, capacity });
            }
        }
        self.size += size as u64;
        Ok(true)
    }

    fn flip(mut self: Box<Self>) -> CoreResult<Box<dyn MeteredCursor>> {
        let remainder = self.current.take();
        self.wait_for_spills()?;

        let mut sources: Vec<Box<dyn MeteredCursor>> = Vec::with_capacity(self.regions.len() + 1);
        if let Some(spill) = &self.spill {
            let data: RegionData = Arc::new(spill.map()?);
            for (i, region) in self.regions.iter().enumerate() {
                let name = format!("{}#{i}", self.name);
                sources.push(Box::new(region.cursor(name, Arc::clone(&data))?));
            }
        }
        if let Some(mut chunk) = remainder.filter(|chunk| !chunk.is_empty()) {
            chunk.sort();
            sources.push(Box::new(chunk.into_cursor()));
        }
        debug!(chunk = %self.name, sources = sources.len(), bytes = self.size, "flipped chunk");

        let name = std::mem::take(&mut self.name);
        Ok(Box::new(SpilledCursor {
            inner: CompositeCursor::new(name, sources),
            _spill: self.spill.take(),
        }))
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Merged cursor that owns the spill file it reads.
struct SpilledCursor {
    inner: CompositeCursor,
    _spill: Option<SpillFile>,
}

impl MeteredCursor for SpilledCursor {
    fn next(&mut self) -> CoreResult<bool> {
        self.inner.next()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }

    fn total_bytes(&self) -> u64 {
        self.inner.total_bytes()
    }
}

/// Temp file shared by the regions of one chunk. Deleted on drop.
struct SpillFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    end: u64,
}

impl SpillFile {
    fn create(dir: &Path, chunk: &str) -> CoreResult<Self> {
        let stem: String = chunk
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = dir.join(format!("{stem}_{}", Uuid::new_v4()));
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        debug!(path = %path.display(), "created spill file");
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            end: 0,
        })
    }

    fn reserve(&mut self, size: u64) -> FileRegion {
        let region = FileRegion::new(Arc::clone(&self.file), self.end, size);
        self.end += size;
        region
    }

    #[allow(unsafe_code)]
    fn map(&self) -> CoreResult<Mmap> {
        let file = self.file.lock();
        // SAFETY: the spill file is private to this chunk, all writes finished
        // before the flip, and it is never truncated while mapped.
        let map = unsafe { Mmap::map(&*file)? };
        Ok(map)
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove spill file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferKind;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    fn sorter() -> Arc<ThreadPool> {
        Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .unwrap(),
        )
    }

    fn pool(size: usize, count: usize) -> BufferPool {
        BufferPool::new(size, count, BufferKind::Heap, Duration::from_secs(10)).unwrap()
    }

    fn drain(mut cursor: Box<dyn MeteredCursor>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while cursor.next().unwrap() {
            out.push((cursor.key().to_vec(), cursor.value().to_vec()));
        }
        out
    }

    #[test]
    fn spills_and_merges_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut keys: Vec<u32> = (0..500).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(7));

        let mut chunk = Box::new(ExternalSortChunk::new("/o=test/cn.equality", pool(128, 2), sorter(), dir.path()));
        for key in &keys {
            assert!(chunk.put(&key.to_be_bytes(), b"v").unwrap());
        }
        assert!(chunk.spill_count() > 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let records = drain(chunk.flip().unwrap());
        let expected: Vec<Vec<u8>> = (0..500u32).map(|k| k.to_be_bytes().to_vec()).collect();
        let got: Vec<Vec<u8>> = records.into_iter().map(|(k, _)| k).collect();
        assert_eq!(got, expected);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn equal_keys_keep_put_order_across_spills() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = Box::new(ExternalSortChunk::new("dup", pool(64, 2), sorter(), dir.path()));
        for i in 0..40u8 {
            chunk.put(b"same", &[i]).unwrap();
        }
        assert!(chunk.spill_count() > 0);
        let values: Vec<u8> = drain(chunk.flip().unwrap())
            .into_iter()
            .map(|(_, v)| v[0])
            .collect();
        assert_eq!(values, (0..40u8).collect::<Vec<_>>());
    }

    #[test]
    fn small_input_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = Box::new(ExternalSortChunk::new("small", pool(1024, 1), sorter(), dir.path()));
        chunk.put(b"b", b"2").unwrap();
        chunk.put(b"a", b"1").unwrap();
        assert_eq!(chunk.spill_count(), 0);
        let records = drain(chunk.flip().unwrap());
        assert_eq!(records[0].0, b"a");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ExternalSortChunk::new("big", pool(64, 1), sorter(), dir.path());
        let err = chunk.put(&[0u8; 100], b"").unwrap_err();
        assert!(matches!(err, CoreError::RecordTooLarge { capacity: 64, .. }));
    }

    #[test]
    fn dropped_chunk_removes_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = Box::new(ExternalSortChunk::new("gone", pool(64, 2), sorter(), dir.path()));
        for i in 0..20u32 {
            chunk.put(&i.to_be_bytes(), b"x").unwrap();
        }
        let cursor = chunk.flip().unwrap();
        drop(cursor);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
