//! Record sinks: per-step CSV appends, or a single bulk write at the end.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::harvest::record::{NormalizedRecord, COLUMNS};

pub mod csv;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the harvested rows ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutput {
    File { path: PathBuf, rows: usize },
    Buffer(String),
}

/// Destination for harvested records.
///
/// `write` is called once per processed response with that step's records (possibly
/// none). The header is fixed by the first non-empty call and emitted exactly once.
/// It always starts with [`COLUMNS`]; columns a record lacks render empty.
#[async_trait]
pub trait RecordSink: Send {
    /// Persist `records` after everything written so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the records could not be persisted. Earlier rows are left
    /// untouched.
    async fn write(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError>;

    /// Flush anything still buffered and report the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write fails.
    async fn finish(&mut self) -> Result<SinkOutput, SinkError>;
}

/// The fixed column order, followed by any extra columns of the first record.
fn header_of(records: &[NormalizedRecord]) -> Option<Vec<&'static str>> {
    let first = records.first()?;
    let mut header = COLUMNS.to_vec();
    for name in first.field_names() {
        if !header.contains(&name) {
            header.push(name);
        }
    }
    Some(header)
}

/// Render header + rows.
fn render_document(header: &[&str], records: &[NormalizedRecord]) -> String {
    let mut out = String::new();
    csv::push_row(&mut out, header, csv::SEPARATOR);
    out.push_str(&csv::render_rows(records, header));
    out
}

/// Append `chunk` to `path`.
///
/// Returns how many bytes reached the file along with the outcome, so a caller can
/// tell a failed open from a torn write.
async fn append_to(path: &Path, chunk: &[u8]) -> (usize, Result<(), SinkError>) {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) => return (0, Err(io_err(e))),
    };

    let mut written = 0;
    while written < chunk.len() {
        match file.write(&chunk[written..]).await {
            Ok(0) => {
                return (
                    written,
                    Err(io_err(std::io::Error::from(std::io::ErrorKind::WriteZero))),
                )
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return (written, Err(io_err(e))),
        }
    }
    (written, file.flush().await.map_err(io_err))
}

/// Appends every step's records to a CSV file as they arrive.
///
/// Each call serializes its rows first and issues a single append, so a crash keeps
/// every completed step on disk. Once any bytes of a chunk land, the header counts as
/// written; a chunk cut off mid-line is closed off before the next one.
#[derive(Debug)]
pub struct CsvFileSink {
    path: PathBuf,
    header: Option<Vec<&'static str>>,
    header_written: bool,
    torn_line: bool,
    rows: usize,
}

impl CsvFileSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
            header_written: false,
            torn_line: false,
            rows: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Text of the next append for `records`.
    fn next_chunk(&self, records: &[NormalizedRecord]) -> String {
        let header = self.header.as_deref().unwrap_or_default();
        let mut chunk = String::new();
        if self.torn_line {
            chunk.push('\n');
        }
        if self.header_written {
            chunk.push_str(&csv::render_rows(records, header));
        } else {
            chunk.push_str(&render_document(header, records));
        }
        chunk
    }

    /// Account for `written` bytes of `chunk` having reached the file.
    fn note_written(&mut self, chunk: &[u8], written: usize) {
        if written == 0 {
            return;
        }
        self.header_written = true;
        self.torn_line = chunk[..written].last() != Some(&b'\n');
    }
}

#[async_trait]
impl RecordSink for CsvFileSink {
    async fn write(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        if self.header.is_none() {
            self.header = header_of(records);
        }

        let chunk = self.next_chunk(records);
        let (written, outcome) = append_to(&self.path, chunk.as_bytes()).await;
        self.note_written(chunk.as_bytes(), written);
        outcome?;
        self.rows += records.len();
        debug!(path = %self.path.display(), rows = records.len(), total = self.rows, "Appended rows");
        Ok(())
    }

    async fn finish(&mut self) -> Result<SinkOutput, SinkError> {
        Ok(SinkOutput::File {
            path: self.path.clone(),
            rows: self.rows,
        })
    }
}

/// Keeps every record in memory and renders the CSV once, on `finish`.
///
/// With a path the document is written to disk in one go; without one it is
/// returned as text.
#[derive(Debug, Default)]
pub struct CsvBufferSink {
    path: Option<PathBuf>,
    records: Vec<NormalizedRecord>,
}

impl CsvBufferSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    fn render(&self) -> String {
        header_of(&self.records)
            .map(|header| render_document(&header, &self.records))
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for CsvBufferSink {
    async fn write(&mut self, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        self.records.extend_from_slice(records);
        Ok(())
    }

    async fn finish(&mut self) -> Result<SinkOutput, SinkError> {
        let document = self.render();
        match &self.path {
            Some(path) => {
                tokio::fs::write(path, document.as_bytes())
                    .await
                    .map_err(|source| SinkError::Io {
                        path: path.clone(),
                        source,
                    })?;
                Ok(SinkOutput::File {
                    path: path.clone(),
                    rows: self.records.len(),
                })
            }
            None => Ok(SinkOutput::Buffer(document)),
        }
    }
}
