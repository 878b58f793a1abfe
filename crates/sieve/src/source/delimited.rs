//! CSV/TSV file source with delimiter detection.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::data::{is_null_value, Row, RowId};
use crate::error::{Result, SieveError};
use crate::validation::RowAlerts;

use super::memory::MemoryRowSource;
use super::{RemovalResult, RowBatches, RowSource, Scope};

/// Delimiters to try when auto-detecting.
const DELIMITERS: &[u8] = &[b'\t', b',', b';', b'|'];

/// Non-blank lines sampled for delimiter detection.
const SAMPLE_LINES: usize = 10;

/// Original text of NA-like cells, by row id and column position.
type NullMarkers = HashMap<(RowId, usize), String>;

/// Parser configuration.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Delimiter to use (None = auto-detect).
    pub delimiter: Option<u8>,
    /// Whether the file has a header row.
    pub has_header: bool,
    /// Quote character.
    pub quote: u8,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_header: true,
            quote: b'"',
        }
    }
}

/// Metadata about a loaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: PathBuf,
    /// SHA-256 of the file contents.
    pub hash: String,
    pub size_bytes: u64,
    /// Detected format (csv, tsv, etc.).
    pub format: String,
    pub delimiter: u8,
    pub headers: Vec<String>,
    /// Rows at load time.
    pub row_count: usize,
}

/// Rows loaded from a delimited file, held in memory.
///
/// Row ids are 1-based data row numbers (header excluded). NA-like cells
/// (`NA`, `N/A`, `null`, `.`, empty) load as null; their original text is
/// kept and written back by [`write_to`](Self::write_to) while the cell
/// stays null.
#[derive(Debug)]
pub struct DelimitedFileSource {
    metadata: FileMetadata,
    rows: MemoryRowSource,
    null_markers: NullMarkers,
}

impl DelimitedFileSource {
    /// Load a file with auto-detected delimiter.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_config(path, &ParserConfig::default())
    }

    pub fn load_with_config(path: impl AsRef<Path>, config: &ParserConfig) -> Result<Self> {
        let path = path.as_ref();
        let io_error = |source| SieveError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_error)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(io_error)?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let hash = format!("sha256:{:x}", hasher.finalize());

        let delimiter = match config.delimiter {
            Some(d) => d,
            None => detect_delimiter(&contents)?,
        };
        let (headers, rows, null_markers) = parse_bytes(&contents, delimiter, config)?;

        let format = match delimiter {
            b'\t' => "tsv",
            b',' => "csv",
            b';' => "csv-semicolon",
            b'|' => "psv",
            _ => "delimited",
        }
        .to_string();

        info!(
            path = %path.display(),
            rows = rows.len(),
            columns = headers.len(),
            format = %format,
            "Loaded delimited file"
        );

        Ok(Self {
            metadata: FileMetadata {
                path: path.to_path_buf(),
                hash,
                size_bytes: contents.len() as u64,
                format,
                delimiter,
                headers,
                row_count: rows.len(),
            },
            rows: MemoryRowSource::new(rows),
            null_markers,
        })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn headers(&self) -> &[String] {
        &self.metadata.headers
    }

    /// The in-memory rows backing this source.
    pub fn rows(&self) -> &MemoryRowSource {
        &self.rows
    }

    /// Write the current rows with the original headers and delimiter.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.metadata.delimiter)
            .from_path(path)?;

        writer.write_record(&self.metadata.headers)?;
        let rows = self.rows.rows();
        for row in &rows {
            let record: Vec<String> = self
                .metadata
                .headers
                .iter()
                .enumerate()
                .map(|(i, h)| match row.get(h) {
                    value if value.is_null() => self
                        .null_markers
                        .get(&(row.id, i))
                        .cloned()
                        .unwrap_or_default(),
                    value => value.to_string(),
                })
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|source| SieveError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), rows = rows.len(), "Wrote delimited file");
        Ok(rows.len())
    }
}

#[async_trait]
impl RowSource for DelimitedFileSource {
    async fn stream_rows(&self, scope: Scope, batch_size: usize) -> Result<RowBatches> {
        self.rows.stream_rows(scope, batch_size).await
    }

    async fn total_rows(&self, scope: Scope) -> Option<usize> {
        self.rows.total_rows(scope).await
    }

    fn has_active_filter(&self) -> bool {
        self.rows.has_active_filter()
    }

    fn data_version(&self) -> u64 {
        self.rows.data_version()
    }

    async fn write_validation_alerts(
        &self,
        scope: Scope,
        fingerprint: &str,
        alerts: Vec<RowAlerts>,
    ) -> Result<()> {
        self.rows.write_validation_alerts(scope, fingerprint, alerts).await
    }

    async fn has_cached_validation_state(&self, scope: Scope, fingerprint: &str) -> bool {
        self.rows.has_cached_validation_state(scope, fingerprint).await
    }

    async fn cached_alerts(&self, scope: Scope) -> Vec<RowAlerts> {
        self.rows.cached_alerts(scope).await
    }

    async fn remove_rows(&self, ids: &[RowId]) -> Vec<RemovalResult> {
        self.rows.remove_rows(ids).await
    }
}

fn parse_bytes(
    bytes: &[u8],
    delimiter: u8,
    config: &ParserConfig,
) -> Result<(Vec<String>, Vec<Row>, NullMarkers)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(config.has_header)
        .quote(config.quote)
        .flexible(true)
        .from_reader(bytes);

    let mut headers: Vec<String> = if config.has_header {
        reader.headers()?.iter().map(|s| s.trim().to_string()).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    let mut null_markers = NullMarkers::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        if headers.is_empty() {
            headers = (0..record.len()).map(|i| format!("column_{}", i + 1)).collect();
        }
        let id = RowId(idx as u64 + 1);
        let values: Vec<String> = record.iter().map(|s| s.to_string()).collect();
        for (i, value) in values.iter().enumerate().take(headers.len()) {
            if !value.is_empty() && is_null_value(value) {
                null_markers.insert((id, i), value.clone());
            }
        }
        rows.push(Row::from_strings(id, &headers, &values));
    }

    if headers.is_empty() {
        return Err(SieveError::EmptyData("No columns found".to_string()));
    }
    Ok((headers, rows, null_markers))
}

/// Detect the delimiter from the first non-blank lines.
///
/// Each candidate splits the sample with the csv reader, so quoted fields
/// are honored. The candidate giving the most records with the same field
/// count as the first one wins, then the widest split, then tab.
pub fn detect_delimiter(bytes: &[u8]) -> Result<u8> {
    let lines: Vec<&[u8]> = bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .take(SAMPLE_LINES)
        .collect();
    if lines.is_empty() {
        return Err(SieveError::EmptyData("No lines to analyze".to_string()));
    }
    let sample = lines.join(&b'\n');

    let best = DELIMITERS
        .iter()
        .filter_map(|&delimiter| {
            let widths = field_counts(&sample, delimiter);
            let first = *widths.first()?;
            if first < 2 {
                return None;
            }
            let agreeing = widths.iter().filter(|&&w| w == first).count();
            Some(((agreeing, first, delimiter == b'\t'), delimiter))
        })
        .max_by_key(|(score, _)| *score)
        .map_or(b',', |(_, delimiter)| delimiter);

    Ok(best)
}

/// Fields per record when `sample` is split on `delimiter`.
fn field_counts(sample: &[u8], delimiter: u8) -> Vec<usize> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample)
        .records()
        .map_while(|record| record.ok())
        .map(|record| record.len())
        .collect()
}
