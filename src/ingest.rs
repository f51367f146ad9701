//! # Ingestion
//!
//! Turns a project directory into stored embeddings: walk the tree, keep the
//! files with a configured extension, split each into paragraph-packed chunks,
//! embed the chunks and write them to the [`VectorStore`].
//!
//! Every file becomes one `put` batch, so a concurrent search sees a file either
//! completely or not at all. With `rebuild`, the whole corpus is replaced in a
//! single transaction instead.

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CopilotConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::NewRecord;
use crate::vector_store::VectorStore;

/// Blank line, optionally containing whitespace. Compiled once per process.
static PARAGRAPH_BREAK: Lazy<std::result::Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n"));

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub extensions: Vec<String>,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    pub rebuild: bool,
    pub show_progress: bool,
}

impl IngestOptions {
    pub fn from_config(config: &CopilotConfig, rebuild: bool) -> Self {
        Self {
            extensions: config.extensions.clone(),
            chunk_size: config.chunk_size,
            rebuild,
            show_progress: true,
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub skipped: usize,
    pub chunks: usize,
}

/// Files under `root` whose extension is in `extensions`, in path order.
///
/// Entries the walker cannot read are logged and left out.
pub fn collect_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| has_extension(entry.path(), extensions))
        .map(|entry| entry.into_path())
        .collect()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
}

/// Split `text` on blank lines and pack paragraphs into chunks of at most
/// `max_chars` characters. A paragraph longer than `max_chars` is cut on char
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Result<Vec<String>> {
    let max_chars = max_chars.max(1);
    let breaks = (*PARAGRAPH_BREAK).as_ref().map_err(Clone::clone)?;

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in breaks.split(text).map(str::trim).filter(|p| !p.is_empty()) {
        let paragraph_chars = paragraph.chars().count();

        if paragraph_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            chunks.extend(split_chars(paragraph, max_chars));
            continue;
        }

        let joined_chars = if current.is_empty() {
            paragraph_chars
        } else {
            current_chars + 2 + paragraph_chars
        };
        if joined_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current.push_str(paragraph);
            current_chars = paragraph_chars;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_chars = joined_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

fn split_chars(paragraph: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Embed every chunk of one file.
fn records_for_file<E: Embedder>(
    embedder: &E,
    path: &Path,
    chunk_size: usize,
) -> Result<Option<Vec<NewRecord>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    let chunks = chunk_text(&text, chunk_size)?;
    if chunks.is_empty() {
        debug!("No text in {}", path.display());
        return Ok(Some(Vec::new()));
    }

    let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let vectors = embedder.embed_batch(&texts)?;
    let location = path.display().to_string();

    Ok(Some(
        chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewRecord::new(location.clone(), chunk, vector))
            .collect(),
    ))
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style.progress_chars("=> "));
    bar
}

/// Index every matching file under `root` into `store`.
///
/// Takes the store mutably because `rebuild` replaces the whole corpus.
pub fn ingest_directory<E: Embedder>(
    store: &mut VectorStore,
    embedder: &E,
    root: &Path,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let files = collect_files(root, &options.extensions);
    info!(
        "Indexing {} files from {} into corpus '{}'",
        files.len(),
        root.display(),
        store.corpus()
    );

    let bar = progress_bar(files.len(), options.show_progress);
    let mut report = IngestReport::default();
    let mut pending = Vec::new();

    for path in &files {
        bar.set_message(
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        match records_for_file(embedder, path, options.chunk_size)? {
            None => report.skipped += 1,
            Some(records) => {
                report.files += 1;
                report.chunks += records.len();
                if options.rebuild {
                    pending.extend(records);
                } else {
                    store.put(&records)?;
                }
            }
        }
        bar.inc(1);
    }

    if options.rebuild {
        store.rebuild(&pending)?;
    }
    bar.finish_and_clear();

    info!(
        files = report.files,
        skipped = report.skipped,
        chunks = report.chunks,
        "Indexing finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Byte-class histogram; identical text gives identical vectors.
    struct HistogramEmbedder;

    impl Embedder for HistogramEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; 4];
            for b in text.bytes() {
                v[(b % 4) as usize] += 1.0;
            }
            Ok(v)
        }
    }

    fn options(rebuild: bool) -> IngestOptions {
        IngestOptions {
            extensions: vec!["py".into(), "md".into()],
            chunk_size: 40,
            rebuild,
            show_progress: false,
        }
    }

    fn project() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "def main():\n    pass\n").unwrap();
        fs::write(dir.path().join("README.md"), "# Title\n\nSome words.\n").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("util.PY"), "x = 1\n").unwrap();
        dir
    }

    #[test]
    fn test_collect_files_filters_by_extension() {
        let dir = project();
        let files = collect_files(dir.path(), &options(false).extensions);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["README.md", "main.py", "util.PY"]);
    }

    #[test]
    fn test_chunk_text_packs_paragraphs() {
        let text = "first para\n\nsecond para\n   \nthird paragraph is longer";
        let chunks = chunk_text(text, 24).unwrap();
        assert_eq!(
            chunks,
            vec!["first para\n\nsecond para", "third paragraph is longe", "r"]
        );
    }

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        let chunks = chunk_text("äöüß", 3).unwrap();
        assert_eq!(chunks, vec!["äöü", "ß"]);
        assert!(chunk_text("\n\n  \n", 10).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_text_reuses_compiled_pattern() {
        let first = chunk_text("a\n\nb", 1).unwrap();
        let second = chunk_text("c\r\n\r\nd", 1).unwrap();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(second, vec!["c", "d"]);
        assert!(PARAGRAPH_BREAK.is_ok());
    }

    #[test]
    fn test_ingest_writes_one_record_per_chunk() {
        let dir = project();
        let db = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(db.path().join("c.db").to_str().unwrap(), "proj").unwrap();

        let report = ingest_directory(&mut store, &HistogramEmbedder, dir.path(), &options(false)).unwrap();
        assert_eq!(report, IngestReport { files: 3, skipped: 0, chunks: 3 });
        assert_eq!(store.len().unwrap(), 3);

        let records: Vec<_> = store.scan().collect::<Result<_>>().unwrap();
        assert!(records[0].source_location.ends_with("README.md"));
        assert_eq!(records[0].text, "# Title\n\nSome words.");
    }

    #[test]
    fn test_rebuild_replaces_corpus() {
        let dir = project();
        let db = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(db.path().join("c.db").to_str().unwrap(), "proj").unwrap();

        ingest_directory(&mut store, &HistogramEmbedder, dir.path(), &options(false)).unwrap();
        ingest_directory(&mut store, &HistogramEmbedder, dir.path(), &options(false)).unwrap();
        assert_eq!(store.len().unwrap(), 6);

        ingest_directory(&mut store, &HistogramEmbedder, dir.path(), &options(true)).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }
}
