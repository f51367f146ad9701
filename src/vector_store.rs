//! # VectorStore
//!
//! Durable table of [`EmbeddingRecord`]s for one corpus.
//!
//! The store knows nothing about ranking. It offers two operations:
//!
//! - [`VectorStore::put`] appends a batch of `(source_location, text, vector)`
//!   records inside a single transaction, so readers see either the whole
//!   batch or none of it.
//! - [`VectorStore::scan`] yields every record of the corpus lazily, in id
//!   order, one page at a time. Calling it again restarts from the beginning.
//!
//! A scan is bounded by the highest id committed when it starts, so batches
//! committed during a scan are not observed by it. [`VectorStore::rebuild`] and
//! [`VectorStore::clear`] take `&mut self` and cannot overlap a live scan of the
//! same store. Another connection rebuilding the corpus mid-scan can only cut the
//! scan short; it never mixes the old and new corpus.
//!
//! ## Persisted layout
//! One `embeddings` row per record. The vector is stored as a little-endian
//! `f32` blob (`dimension * 4` bytes) next to its `dimension`, so a write-then-read
//! round trip is bit-for-bit.
//!
//! ## Dimensionality
//! The first batch written to a corpus fixes its dimension. Later batches with a
//! different vector length are rejected with [`CopilotError::DimensionMismatch`]
//! before anything is written.
//!
//! ## Quick Example
//! ```no_run
//! use context_copilot::models::NewRecord;
//! use context_copilot::vector_store::VectorStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = VectorStore::open("copilot.db", "my-project")?;
//! store.put(&[NewRecord::new("src/main.rs", "fn main() {}", vec![0.1, 0.2, 0.3])])?;
//! for record in store.scan() {
//!     println!("{}", record?.source_location);
//! }
//! # Ok(()) }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use diesel::prelude::*;
use tracing::{debug, info};

use crate::db::establish_connection;
use crate::error::{CopilotError, Result};
use crate::models::{EmbeddingRecord, EmbeddingRow, NewEmbedding, NewRecord};
use crate::schema::embeddings;

/// Rows fetched per round trip while scanning.
pub const DEFAULT_PAGE_SIZE: i64 = 256;

/// Persistent embedding store scoped to one corpus.
pub struct VectorStore {
    connection: Mutex<SqliteConnection>,
    corpus: String,
    page_size: i64,
}

impl VectorStore {
    /// Open (or create) the database at `db_url` and scope the store to `corpus`.
    ///
    /// # Errors
    /// [`CopilotError::Connection`] if SQLite cannot open the file,
    /// [`CopilotError::Storage`] if the schema cannot be created.
    pub fn open(db_url: &str, corpus: impl Into<String>) -> Result<Self> {
        let connection = establish_connection(db_url)?;
        Ok(Self::with_connection(connection, corpus))
    }

    /// Wrap an already established connection. The schema must exist.
    pub fn with_connection(connection: SqliteConnection, corpus: impl Into<String>) -> Self {
        Self {
            connection: Mutex::new(connection),
            corpus: corpus.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the number of rows fetched per scan page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1) as i64;
        self
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        // A panic while holding the lock cannot leave a half-applied transaction
        // behind (SQLite rolls it back), so the connection is still usable.
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a batch of records atomically.
    ///
    /// Returns the ids assigned to the batch, in input order. An empty batch is a
    /// no-op.
    ///
    /// # Errors
    /// - [`CopilotError::DimensionMismatch`] if the batch's vectors disagree with
    ///   each other or with the corpus' established dimension. Nothing is written.
    /// - [`CopilotError::Storage`] on write failure. Nothing is written.
    pub fn put(&self, batch: &[NewRecord]) -> Result<Vec<i32>> {
        let Some(batch_dimension) = uniform_dimension(batch)? else {
            return Ok(Vec::new());
        };

        let mut conn = self.conn();
        let ids = conn.transaction::<_, CopilotError, _>(|conn| {
            if let Some(expected) = stored_dimension(conn, &self.corpus)? {
                if expected != batch_dimension {
                    return Err(CopilotError::DimensionMismatch {
                        expected,
                        actual: batch_dimension,
                    });
                }
            }
            insert_batch(conn, &self.corpus, batch, batch_dimension)
        })?;

        debug!(
            corpus = %self.corpus,
            count = ids.len(),
            dimension = batch_dimension,
            "Stored embedding batch"
        );
        Ok(ids)
    }

    /// Replace the whole corpus with `batch` in one transaction.
    ///
    /// The dimension may change across a rebuild. A scan of this store cannot be
    /// in flight while it runs:
    ///
    /// ```compile_fail
    /// # use context_copilot::vector_store::VectorStore;
    /// # let mut store = VectorStore::open(":memory:", "c").unwrap();
    /// let mut scan = store.scan();
    /// scan.next();
    /// store.rebuild(&[]).unwrap();
    /// scan.next();
    /// ```
    pub fn rebuild(&mut self, batch: &[NewRecord]) -> Result<Vec<i32>> {
        let batch_dimension = uniform_dimension(batch)?;

        let mut conn = self.conn();
        let ids = conn.transaction::<_, CopilotError, _>(|conn| {
            let removed = diesel::delete(
                embeddings::table.filter(embeddings::corpus.eq(&self.corpus)),
            )
            .execute(conn)?;
            debug!(corpus = %self.corpus, removed, "Cleared corpus for rebuild");

            match batch_dimension {
                Some(dimension) => insert_batch(conn, &self.corpus, batch, dimension),
                None => Ok(Vec::new()),
            }
        })?;

        info!(corpus = %self.corpus, count = ids.len(), "Rebuilt corpus");
        Ok(ids)
    }

    /// Delete every record of the corpus.
    pub fn clear(&mut self) -> Result<usize> {
        let mut conn = self.conn();
        let removed =
            diesel::delete(embeddings::table.filter(embeddings::corpus.eq(&self.corpus)))
                .execute(&mut *conn)?;
        Ok(removed)
    }

    /// Number of records in the corpus.
    pub fn len(&self) -> Result<usize> {
        let mut conn = self.conn();
        let count: i64 = embeddings::table
            .filter(embeddings::corpus.eq(&self.corpus))
            .count()
            .get_result(&mut *conn)?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Dimension fixed by the first stored batch, or `None` for an empty corpus.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let mut conn = self.conn();
        stored_dimension(&mut conn, &self.corpus)
    }

    /// Lazily iterate over every record in id order.
    ///
    /// Each page is read under the connection lock and the lock is released
    /// between pages. The first page pins the highest committed id; later pages
    /// stop there, so a batch committed while the scan is in flight is never
    /// observed, neither in part nor in full.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            store: self,
            after: 0,
            upper: None,
            page: Vec::new().into_iter(),
            done: false,
        }
    }

    fn max_id(&self) -> Result<Option<i32>> {
        let mut conn = self.conn();
        Ok(embeddings::table
            .filter(embeddings::corpus.eq(&self.corpus))
            .select(diesel::dsl::max(embeddings::id))
            .get_result(&mut *conn)?)
    }

    fn load_page(&self, after: i32, upper: i32) -> Result<Vec<EmbeddingRecord>> {
        let mut conn = self.conn();
        let rows: Vec<EmbeddingRow> = embeddings::table
            .filter(embeddings::corpus.eq(&self.corpus))
            .filter(embeddings::id.gt(after))
            .filter(embeddings::id.le(upper))
            .order(embeddings::id.asc())
            .limit(self.page_size)
            .select(EmbeddingRow::as_select())
            .load(&mut *conn)?;
        drop(conn);

        rows.into_iter().map(decode_row).collect()
    }
}

/// Paged, restartable iterator returned by [`VectorStore::scan`].
pub struct Scan<'a> {
    store: &'a VectorStore,
    after: i32,
    /// Highest id visible to this scan, pinned on the first page.
    upper: Option<i32>,
    page: std::vec::IntoIter<EmbeddingRecord>,
    done: bool,
}

impl Scan<'_> {
    /// Fetch the next page directly, bypassing the per-record iterator.
    ///
    /// Returns `None` once the corpus is exhausted. Mixing this with
    /// [`Iterator::next`] skips whatever is left of the current page.
    pub fn next_page(&mut self) -> Option<Result<Vec<EmbeddingRecord>>> {
        if self.done {
            return None;
        }
        let upper = match self.upper {
            Some(upper) => upper,
            None => match self.store.max_id() {
                Ok(Some(upper)) => {
                    self.upper = Some(upper);
                    upper
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            },
        };
        match self.store.load_page(self.after, upper) {
            Ok(page) => {
                if (page.len() as i64) < self.store.page_size {
                    self.done = true;
                }
                match page.last() {
                    Some(last) => {
                        self.after = last.id;
                        Some(Ok(page))
                    }
                    None => {
                        self.done = true;
                        None
                    }
                }
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<EmbeddingRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.page.next() {
                return Some(Ok(record));
            }
            match self.next_page()? {
                Ok(page) => self.page = page.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Length shared by every vector of `batch`, `None` for an empty batch.
fn uniform_dimension(batch: &[NewRecord]) -> Result<Option<usize>> {
    let Some(first) = batch.first() else {
        return Ok(None);
    };
    let expected = first.vector.len();
    if let Some(odd) = batch.iter().find(|r| r.vector.len() != expected) {
        return Err(CopilotError::DimensionMismatch {
            expected,
            actual: odd.vector.len(),
        });
    }
    Ok(Some(expected))
}

fn stored_dimension(conn: &mut SqliteConnection, corpus: &str) -> Result<Option<usize>> {
    let dimension: Option<i32> = embeddings::table
        .filter(embeddings::corpus.eq(corpus))
        .select(embeddings::dimension)
        .first(conn)
        .optional()?;
    Ok(dimension.map(|d| d as usize))
}

fn insert_batch(
    conn: &mut SqliteConnection,
    corpus: &str,
    batch: &[NewRecord],
    dimension: usize,
) -> Result<Vec<i32>> {
    let dimension = i32::try_from(dimension).map_err(|_| {
        CopilotError::CorruptRecord(format!("vector dimension {dimension} out of range"))
    })?;

    let mut ids = Vec::with_capacity(batch.len());
    for record in batch {
        let row = NewEmbedding {
            corpus,
            source_location: &record.source_location,
            text: &record.text,
            vector: encode_vector(&record.vector),
            dimension,
        };
        let id: i32 = diesel::insert_into(embeddings::table)
            .values(&row)
            .returning(embeddings::id)
            .get_result(conn)?;
        ids.push(id);
    }
    Ok(ids)
}

fn decode_row(row: EmbeddingRow) -> Result<EmbeddingRecord> {
    let vector = decode_vector(&row.vector, row.dimension as usize)
        .map_err(|e| CopilotError::CorruptRecord(format!("embedding {}: {e}", row.id)))?;
    Ok(EmbeddingRecord {
        id: row.id,
        source_location: row.source_location,
        text: row.text,
        vector,
    })
}

/// Serialize a vector as consecutive little-endian `f32`s.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_vector`]; `blob` must hold exactly `dimension` floats.
pub fn decode_vector(blob: &[u8], dimension: usize) -> std::result::Result<Vec<f32>, String> {
    if blob.len() != dimension * 4 {
        return Err(format!(
            "blob is {} bytes, expected {} for dimension {dimension}",
            blob.len(),
            dimension * 4
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store(corpus: &str) -> (TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = VectorStore::open(path.to_str().unwrap(), corpus).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_then_scan_is_bit_exact() {
        let (_dir, store) = temp_store("bits");
        let vectors = vec![
            vec![1.0f32, -0.0, f32::MIN_POSITIVE],
            vec![0.1, 1e-38, 3.402_823_5e38],
            vec![f32::EPSILON, -2.5, 0.333_333_34],
        ];
        let batch: Vec<NewRecord> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| NewRecord::new(format!("file{i}.txt"), format!("chunk {i}"), v.clone()))
            .collect();

        let ids = store.put(&batch).unwrap();
        assert_eq!(ids.len(), 3);

        let scanned: Vec<EmbeddingRecord> = store.scan().collect::<Result<_>>().unwrap();
        assert_eq!(scanned.len(), 3);
        for (record, expected) in scanned.iter().zip(&vectors) {
            let got: Vec<u32> = record.vector.iter().map(|f| f.to_bits()).collect();
            let want: Vec<u32> = expected.iter().map(|f| f.to_bits()).collect();
            assert_eq!(got, want);
        }
        assert_eq!(scanned[1].text, "chunk 1");
        assert_eq!(scanned[2].source_location, "file2.txt");
    }

    #[test]
    fn test_scan_pages_and_restarts() {
        let (_dir, store) = temp_store("paged");
        let store = store.with_page_size(2);
        let batch: Vec<NewRecord> = (0..5)
            .map(|i| NewRecord::new("p.md", format!("{i}"), vec![i as f32, 1.0]))
            .collect();
        store.put(&batch).unwrap();

        let first: Vec<String> = store.scan().map(|r| r.unwrap().text).collect();
        let second: Vec<String> = store.scan().map(|r| r.unwrap().text).collect();
        assert_eq!(first, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(first, second);

        let mut pages = store.scan();
        let sizes: Vec<usize> =
            std::iter::from_fn(|| pages.next_page()).map(|p| p.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_empty_store_scans_nothing() {
        let (_dir, store) = temp_store("empty");
        assert_eq!(store.scan().count(), 0);
        assert!(store.is_empty().unwrap());
        assert_eq!(store.dimension().unwrap(), None);
    }

    #[test]
    fn test_put_rejects_mismatched_dimension_without_writing() {
        let (_dir, store) = temp_store("dims");
        store.put(&[NewRecord::new("a", "a", vec![1.0, 0.0, 0.0])]).unwrap();

        let err = store
            .put(&[
                NewRecord::new("b", "b", vec![1.0, 0.0, 0.0]),
                NewRecord::new("c", "c", vec![1.0, 0.0]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            CopilotError::DimensionMismatch { expected: 3, actual: 2 }
        ));

        let err = store.put(&[NewRecord::new("d", "d", vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            CopilotError::DimensionMismatch { expected: 3, actual: 1 }
        ));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn test_corpora_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let url = path.to_str().unwrap();
        let left = VectorStore::open(url, "left").unwrap();
        let right = VectorStore::open(url, "right").unwrap();

        left.put(&[NewRecord::new("l", "l", vec![1.0, 2.0])]).unwrap();
        right.put(&[NewRecord::new("r", "r", vec![1.0, 2.0, 3.0])]).unwrap();

        assert_eq!(left.len().unwrap(), 1);
        assert_eq!(right.dimension().unwrap(), Some(3));
        assert_eq!(left.scan().next().unwrap().unwrap().text, "l");
    }

    #[test]
    fn test_rebuild_replaces_corpus() {
        let (_dir, mut store) = temp_store("rebuild");
        store
            .put(&[
                NewRecord::new("old", "old 1", vec![1.0, 0.0]),
                NewRecord::new("old", "old 2", vec![0.0, 1.0]),
            ])
            .unwrap();

        let ids = store
            .rebuild(&[NewRecord::new("new", "new", vec![0.5, 0.5, 0.5])])
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.dimension().unwrap(), Some(3));

        let ids_after: Vec<i32> = store.scan().map(|r| r.unwrap().id).collect();
        assert!(ids_after[0] > 2, "ids keep increasing across rebuilds");

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_batch_committed_mid_scan_is_all_or_nothing() {
        let (_dir, store) = temp_store("midscan");
        let store = store.with_page_size(2);
        let old: Vec<NewRecord> = (0..3)
            .map(|i| NewRecord::new("a.md", format!("a{i}"), vec![1.0, i as f32]))
            .collect();
        store.put(&old).unwrap();

        let mut scan = store.scan();
        let mut seen = vec![scan.next().unwrap().unwrap().text];

        let batch: Vec<NewRecord> = (0..3)
            .map(|i| NewRecord::new("b.md", format!("b{i}"), vec![0.0, i as f32]))
            .collect();
        store.put(&batch).unwrap();

        seen.extend(scan.map(|r| r.unwrap().text));
        let from_batch = seen.iter().filter(|t| t.starts_with('b')).count();
        assert!(from_batch == 0 || from_batch == batch.len(), "partial batch: {seen:?}");
        assert_eq!(seen, vec!["a0", "a1", "a2"]);

        assert_eq!(store.scan().count(), 6);
    }

    #[test]
    fn test_rebuild_from_another_connection_never_mixes_corpora() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let url = path.to_str().unwrap();
        let reader = VectorStore::open(url, "docs").unwrap().with_page_size(2);
        let mut writer = VectorStore::open(url, "docs").unwrap();

        let old: Vec<NewRecord> = (0..3)
            .map(|i| NewRecord::new("old.md", format!("old{i}"), vec![1.0, i as f32]))
            .collect();
        writer.put(&old).unwrap();

        let mut scan = reader.scan();
        let mut seen = vec![scan.next().unwrap().unwrap().text];

        writer
            .rebuild(&[
                NewRecord::new("new.md", "new0", vec![0.0, 1.0, 0.0]),
                NewRecord::new("new.md", "new1", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();

        for record in scan {
            let record = record.unwrap();
            assert_eq!(record.vector.len(), 2);
            seen.push(record.text);
        }
        assert!(seen.iter().all(|t| t.starts_with("old")), "mixed corpora: {seen:?}");

        let fresh: Vec<String> = reader.scan().map(|r| r.unwrap().text).collect();
        assert_eq!(fresh, vec!["new0", "new1"]);
    }

    #[test]
    fn test_decode_vector_rejects_truncated_blob() {
        let blob = encode_vector(&[1.0, 2.0]);
        assert_eq!(decode_vector(&blob, 2).unwrap(), vec![1.0, 2.0]);
        assert!(decode_vector(&blob[..7], 2).is_err());
        assert!(decode_vector(&blob, 3).is_err());
    }
}
