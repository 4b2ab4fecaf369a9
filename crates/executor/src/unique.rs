//! Deduplicating sorted collector with a memory budget.
//!
//! Values go into an in-memory ordered set. When the set reaches its element
//! budget it is written out as one sorted run to a temp file and cleared.
//! Reading back merges the runs (plus whatever is still in memory) and drops
//! duplicates that landed in different runs.
//!
//! A run record is a 4-byte little-endian length followed by the bincode
//! payload.

use std::{
    cmp::Reverse,
    collections::{btree_set, BTreeSet, BinaryHeap},
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Position of one sorted run inside the spill file.
#[derive(Clone, Copy, Debug)]
struct Run {
    offset: u64,
    len: u64,
}

/// Sorted set that spills to disk once it holds `max_elements` values.
///
/// # Example
///
/// ```
/// use executor::Unique;
///
/// let mut unique = Unique::new(2, None);
/// for v in [5u64, 1, 5, 3, 1] {
///     unique.insert(v).unwrap();
/// }
/// let sorted: Vec<u64> = unique.into_sorted().unwrap().collect::<Result<_, _>>().unwrap();
/// assert_eq!(sorted, vec![1, 3, 5]);
/// ```
pub struct Unique<T> {
    tree: BTreeSet<T>,
    max_elements: usize,
    tmp_dir: Option<PathBuf>,
    file: Option<NamedTempFile>,
    runs: Vec<Run>,
    spilled_elements: u64,
}

impl<T> Unique<T>
where
    T: Ord + Clone + Serialize + DeserializeOwned,
{
    /// Collector holding at most `max_elements` values in memory, spilling
    /// into `tmp_dir` (the system temp dir when `None`).
    pub fn new(max_elements: u64, tmp_dir: Option<PathBuf>) -> Self {
        Self {
            tree: BTreeSet::new(),
            max_elements: usize::try_from(max_elements).unwrap_or(usize::MAX).max(1),
            tmp_dir,
            file: None,
            runs: Vec::new(),
            spilled_elements: 0,
        }
    }

    /// Add `value`. Returns false when it is already held in memory.
    pub fn insert(&mut self, value: T) -> DbResult<bool> {
        if self.tree.contains(&value) {
            return Ok(false);
        }
        if self.tree.len() >= self.max_elements {
            self.flush()?;
        }
        Ok(self.tree.insert(value))
    }

    /// Values held so far; values repeated across spilled runs count once per run.
    pub fn size(&self) -> u64 {
        self.tree.len() as u64 + self.spilled_elements
    }

    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn spill_file(&mut self) -> DbResult<&mut NamedTempFile> {
        if self.file.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("unique-");
            let file = match &self.tmp_dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| DbError::Executor("spill file unavailable".into()))
    }

    /// Write the in-memory set as one sorted run and clear it.
    fn flush(&mut self) -> DbResult<()> {
        let tree = std::mem::take(&mut self.tree);
        let file = self.spill_file()?.as_file_mut();
        let offset = file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::new(file);
        for value in &tree {
            let bytes = encode_to_vec(value, bincode_config())
                .map_err(|e| DbError::Executor(format!("failed to encode spill record: {e}")))?;
            let len = u32::try_from(bytes.len())
                .map_err(|_| DbError::Executor("spill record too large".into()))?;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&bytes)?;
        }
        writer.flush()?;
        drop(writer);

        let len = tree.len() as u64;
        self.runs.push(Run { offset, len });
        self.spilled_elements += len;
        debug!(run = self.runs.len(), elements = len, "unique spilled run");
        Ok(())
    }

    /// Every distinct value in ascending order.
    pub fn into_sorted(mut self) -> DbResult<UniqueIter<T>> {
        if self.runs.is_empty() {
            return Ok(UniqueIter::Memory(self.tree.into_iter()));
        }
        if !self.tree.is_empty() {
            self.flush()?;
        }
        let Some(file) = self.file.take() else {
            return Err(DbError::Executor("spilled runs without a spill file".into()));
        };

        let mut readers = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (n, run) in self.runs.iter().enumerate() {
            let mut handle = file.reopen()?;
            handle.seek(SeekFrom::Start(run.offset))?;
            let mut reader = RunReader {
                reader: BufReader::new(handle),
                remaining: run.len,
            };
            if let Some(first) = reader.next_record()? {
                heap.push(Reverse((first, n)));
            }
            readers.push(reader);
        }
        Ok(UniqueIter::Merge(MergeRuns {
            _file: file,
            readers,
            heap,
            last: None,
        }))
    }
}

struct RunReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunReader {
    fn next_record<T: DeserializeOwned>(&mut self) -> DbResult<Option<T>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(DbError::Executor("spill run ended early".into()));
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf);
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf)?;
        let (value, _bytes_read) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| DbError::Executor(format!("failed to decode spill record: {e}")))?;
        self.remaining -= 1;
        Ok(Some(value))
    }
}

/// K-way merge over spilled runs. Owns the spill file, which is removed on drop.
pub struct MergeRuns<T> {
    _file: NamedTempFile,
    readers: Vec<RunReader>,
    heap: BinaryHeap<Reverse<(T, usize)>>,
    last: Option<T>,
}

/// Sorted, duplicate-free values of a [`Unique`].
pub enum UniqueIter<T> {
    Memory(btree_set::IntoIter<T>),
    Merge(MergeRuns<T>),
}

impl<T> Iterator for UniqueIter<T>
where
    T: Ord + Clone + DeserializeOwned,
{
    type Item = DbResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            UniqueIter::Memory(values) => values.next().map(Ok),
            UniqueIter::Merge(merge) => loop {
                let Reverse((value, run)) = merge.heap.pop()?;
                match merge.readers[run].next_record() {
                    Ok(Some(next)) => merge.heap.push(Reverse((next, run))),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                }
                if merge.last.as_ref() == Some(&value) {
                    continue;
                }
                merge.last = Some(value.clone());
                return Some(Ok(value));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RowId;
    use pretty_assertions::assert_eq;

    fn drain<T: Ord + Clone + DeserializeOwned>(iter: UniqueIter<T>) -> Vec<T> {
        iter.collect::<DbResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn in_memory_dedup_needs_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut unique = Unique::new(100, Some(dir.path().to_path_buf()));
        for v in [9u64, 2, 9, 4, 2] {
            unique.insert(RowId(v)).unwrap();
        }
        assert_eq!(unique.size(), 3);
        assert_eq!(unique.spilled_runs(), 0);
        assert_eq!(
            drain(unique.into_sorted().unwrap()),
            vec![RowId(2), RowId(4), RowId(9)]
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test_log::test]
    fn spilled_runs_merge_sorted_and_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let mut unique = Unique::new(4, Some(dir.path().to_path_buf()));
        // every value arrives twice, far enough apart to land in different runs
        for _ in 0..2 {
            for v in (0..25u64).rev() {
                unique.insert(RowId(v * 3)).unwrap();
            }
        }
        assert!(unique.spilled_runs() > 2);
        assert!(unique.size() > 25);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let iter = unique.into_sorted().unwrap();
        let values = drain(iter);
        let expected: Vec<RowId> = (0..25u64).map(|v| RowId(v * 3)).collect();
        assert_eq!(values, expected);
        // spill file is gone with the iterator
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropping_mid_iteration_removes_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut unique = Unique::new(1, Some(dir.path().to_path_buf()));
        for v in 0..10u64 {
            unique.insert(v).unwrap();
        }
        let mut iter = unique.into_sorted().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 0);
        drop(iter);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_spill_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("missing");
        let mut unique = Unique::new(1, Some(gone));
        unique.insert(1u64).unwrap();
        let err = unique.insert(2u64).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
    }
}
