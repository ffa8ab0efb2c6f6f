//! Contiguous byte ranges of a shared spill file.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::import::chunk::{read_record, RecordSlot};
use crate::import::cursor::MeteredCursor;

/// Read-only bytes a region cursor decodes from, usually a file mapping.
pub type RegionData = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// A `[offset, offset + size)` range of a file shared by many regions.
///
/// Regions of one file never overlap, so writers only contend on the file
/// handle, not on content.
#[derive(Clone)]
pub struct FileRegion {
    file: Arc<Mutex<File>>,
    offset: u64,
    size: u64,
}

impl FileRegion {
    /// Describes a region of `file`.
    pub fn new(file: Arc<Mutex<File>>, offset: u64, size: u64) -> Self {
        Self { file, offset, size }
    }

    /// Start of the region in the file.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the region.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Writes `parts` back to back from the start of the region.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or [`CoreError::CorruptedRegion`] if the parts
    /// do not fill the region exactly.
    pub fn write<'a, I>(&self, parts: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset))?;
        let mut writer = BufWriter::new(&mut *file);
        let mut written = 0u64;
        for part in parts {
            written += part.len() as u64;
            if written > self.size {
                return Err(self.corrupted("write past the end of the region"));
            }
            writer.write_all(part)?;
        }
        writer.flush()?;
        if written != self.size {
            return Err(self.corrupted(format!("wrote {written} of {} bytes", self.size)));
        }
        Ok(())
    }

    /// Cursor decoding the region's records from `data`, the whole file
    /// content.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedRegion`] if `data` is shorter than the
    /// region.
    pub fn cursor(&self, name: impl Into<String>, data: RegionData) -> CoreResult<RegionCursor> {
        let len = (*data).as_ref().len() as u64;
        let end = self.offset + self.size;
        if end > len {
            return Err(self.corrupted(format!("region ends at {end} but the file has {len} bytes")));
        }
        Ok(RegionCursor {
            name: name.into(),
            data,
            offset: self.offset,
            start: self.offset as usize,
            end: end as usize,
            next: self.offset as usize,
            current: None,
        })
    }

    fn corrupted(&self, message: impl Into<String>) -> CoreError {
        CoreError::corrupted_region(self.offset, message)
    }
}

/// Cursor over the records of one region, decoded in place.
pub struct RegionCursor {
    name: String,
    data: RegionData,
    offset: u64,
    start: usize,
    end: usize,
    next: usize,
    current: Option<RecordSlot>,
}

impl RegionCursor {
    fn bytes(&self) -> &[u8] {
        (*self.data).as_ref()
    }
}

impl MeteredCursor for RegionCursor {
    fn next(&mut self) -> CoreResult<bool> {
        if self.next >= self.end {
            self.current = None;
            return Ok(false);
        }
        let slot = read_record(self.bytes(), self.next, self.end).map_err(|err| {
            CoreError::corrupted_region(
                self.offset,
                format!("bad record at byte {}: {err}", self.next - self.start),
            )
        })?;
        self.next = slot.end();
        self.current = Some(slot);
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(slot) => slot.key_in(self.bytes()),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(slot) => slot.value_in(self.bytes()),
            None => &[],
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_read(&self) -> u64 {
        (self.next - self.start) as u64
    }

    fn total_bytes(&self) -> u64 {
        (self.end - self.start) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::chunk::write_record;
    use std::io::Read;

    fn shared_file() -> (tempfile::TempDir, Arc<Mutex<File>>) {
        let dir = tempfile::tempdir().unwrap();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("regions"))
            .unwrap();
        (dir, Arc::new(Mutex::new(file)))
    }

    fn records(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in pairs {
            write_record(&mut out, key.as_bytes(), value.as_bytes());
        }
        out
    }

    fn contents(file: &Arc<Mutex<File>>) -> RegionData {
        let mut file = file.lock();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();
        Arc::new(bytes)
    }

    #[test]
    fn regions_share_one_file() {
        let (_dir, file) = shared_file();
        let first = records(&[("a", "1"), ("b", "2")]);
        let second = records(&[("c", "3")]);
        let r1 = FileRegion::new(Arc::clone(&file), 0, first.len() as u64);
        let r2 = FileRegion::new(Arc::clone(&file), first.len() as u64, second.len() as u64);
        r2.write([second.as_slice()]).unwrap();
        r1.write([&first[..2], &first[2..]]).unwrap();

        let data = contents(&file);
        let mut cursor = r2.cursor("r2", Arc::clone(&data)).unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!((cursor.key(), cursor.value()), (&b"c"[..], &b"3"[..]));
        assert!(!cursor.next().unwrap());

        let mut cursor = r1.cursor("r1", data).unwrap();
        let mut keys = Vec::new();
        while cursor.next().unwrap() {
            keys.push(cursor.key().to_vec());
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(cursor.bytes_read(), cursor.total_bytes());
    }

    #[test]
    fn short_write_is_rejected() {
        let (_dir, file) = shared_file();
        let region = FileRegion::new(file, 0, 10);
        assert!(matches!(
            region.write([&b"abc"[..]]),
            Err(CoreError::CorruptedRegion { offset: 0, .. })
        ));
    }

    #[test]
    fn truncated_region_is_corrupted() {
        let (_dir, file) = shared_file();
        let bytes = records(&[("key", "value")]);
        let region = FileRegion::new(Arc::clone(&file), 0, bytes.len() as u64);
        assert!(region.cursor("early", Arc::new(Vec::<u8>::new())).is_err());

        let mut damaged = bytes.clone();
        damaged[0] = 0x7F;
        let mut cursor = region.cursor("damaged", Arc::new(damaged)).unwrap();
        let err = cursor.next().unwrap_err();
        assert!(matches!(err, CoreError::CorruptedRegion { offset: 0, .. }));
    }
}
