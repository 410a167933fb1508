//! Record sources
//!
//! A [`RecordSource`] yields flat records lazily and can be reopened to start
//! over. [`CsvRecordSource`] reads a delimited text file with a header row.
//!
//! The CSV file is streamed: `open()` makes one validating pass to pick the
//! encoding, then decodes while parsing, so only a read buffer of the input
//! is held in memory at a time.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8, WINDOWS_1252};
use tracing::{info, warn};

use crate::error::{IngestError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Raw bytes read per decoding step
const READ_CHUNK: usize = 8 * 1024;

/// Decoded bytes produced per decoding step
const DECODE_CHUNK: usize = 32 * 1024;

/// One input row: ordered column name -> raw text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Value of the first column named exactly `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

pub trait RecordSource: Send + Sync {
    /// Start reading from the beginning.
    fn open(&self) -> Result<RecordIter>;

    /// Best-effort count of data records; 0 when unknown.
    fn estimate_total(&self) -> u64;

    fn describe(&self) -> String;
}

/// Resolve an encoding label, accepting a few common aliases the WHATWG
/// label table does not know.
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "utf-8-sig" | "utf8-sig" => Some(UTF_8),
        "latin-1" | "cp1252" => Some(WINDOWS_1252),
        other => Encoding::for_label(other.as_bytes()),
    }
}

/// Skip a UTF-8 byte-order mark at the start of `reader`.
fn skip_bom<R: BufRead>(reader: &mut R) -> io::Result<()> {
    if reader.fill_buf()?.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    Ok(())
}

/// Whether all of `reader` decodes in `encoding` without replacement.
fn decodes_cleanly<R: Read>(mut reader: R, encoding: &'static Encoding) -> io::Result<bool> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut input = vec![0u8; READ_CHUNK];
    let mut output = vec![0u8; DECODE_CHUNK];

    loop {
        let n = reader.read(&mut input)?;
        let last = n == 0;
        let mut pending = &input[..n];
        loop {
            let (result, read, _, had_errors) = decoder.decode_to_utf8(pending, &mut output, last);
            if had_errors {
                return Ok(false);
            }
            pending = &pending[read..];
            if result == CoderResult::InputEmpty {
                break;
            }
        }
        if last {
            return Ok(true);
        }
    }
}

/// [`Read`] adapter producing UTF-8 from `inner` in another encoding.
struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_without_bom_handling(),
            input: vec![0u8; READ_CHUNK],
            input_start: 0,
            input_end: 0,
            output: vec![0u8; DECODE_CHUNK],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
        }
    }

    fn decode_next(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            self.input_end = self.inner.read(&mut self.input)?;
            self.input_start = 0;
            self.eof = self.input_end == 0;
        }

        let (result, read, written, _) = self.decoder.decode_to_utf8(
            &self.input[self.input_start..self.input_end],
            &mut self.output,
            self.eof,
        );
        self.input_start += read;
        self.output_start = 0;
        self.output_end = written;
        if self.eof && result == CoderResult::InputEmpty {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.output_start == self.output_end {
            if self.finished {
                return Ok(0);
            }
            self.decode_next()?;
        }

        let n = buf.len().min(self.output_end - self.output_start);
        buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
        self.output_start += n;
        Ok(n)
    }
}

#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
    encoding: &'static Encoding,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>, encoding_label: &str) -> Result<Self> {
        let encoding = encoding_for_label(encoding_label)
            .ok_or_else(|| IngestError::config(format!("Unknown encoding '{encoding_label}'")))?;
        Ok(Self {
            path: path.into(),
            encoding,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file positioned after any byte-order mark.
    fn open_file(&self) -> Result<BufReader<File>> {
        let read_error = |e: io::Error| {
            IngestError::Source(format!("Failed to read {}: {e}", self.path.display()))
        };
        let mut reader = BufReader::new(File::open(&self.path).map_err(read_error)?);
        skip_bom(&mut reader).map_err(read_error)?;
        Ok(reader)
    }

    /// The configured encoding, or windows-1252 when the file does not
    /// decode cleanly in it.
    pub fn detect_encoding(&self) -> Result<&'static Encoding> {
        let clean = decodes_cleanly(self.open_file()?, self.encoding).map_err(|e| {
            IngestError::Source(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        if clean {
            return Ok(self.encoding);
        }

        warn!(
            file = %self.path.display(),
            encoding = self.encoding.name(),
            fallback = WINDOWS_1252.name(),
            "Input is not valid in the configured encoding, falling back"
        );
        Ok(WINDOWS_1252)
    }
}

impl RecordSource for CsvRecordSource {
    fn open(&self) -> Result<RecordIter> {
        let encoding = self.detect_encoding()?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(DecodingReader::new(self.open_file()?, encoding));

        let headers = reader
            .headers()
            .map_err(|e| IngestError::Source(format!("Failed to read CSV header: {e}")))?
            .clone();
        info!(
            file = %self.path.display(),
            encoding = encoding.name(),
            headers = ?headers.iter().collect::<Vec<_>>(),
            "Opened CSV source"
        );

        let records = reader.into_records().map(move |row| -> Result<Record> {
            let row = row.map_err(|e| IngestError::Source(format!("Malformed CSV row: {e}")))?;
            // Short rows simply lack the trailing columns
            Ok(headers
                .iter()
                .zip(row.iter())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect())
        });
        Ok(Box::new(records))
    }

    fn estimate_total(&self) -> u64 {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path);
        match reader {
            Ok(mut reader) => reader.byte_records().filter(|r| r.is_ok()).count() as u64,
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "Could not count input rows");
                0
            },
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn read_all(source: &CsvRecordSource) -> Vec<Record> {
        source.open().unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_reads_records_with_headers() {
        let file = csv_file(b"id,age\na1,30\nb2,41\n");
        let source = CsvRecordSource::new(file.path(), "utf-8").unwrap();

        let records = read_all(&source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id"), Some("a1"));
        assert_eq!(records[1].get("age"), Some("41"));
        assert_eq!(source.estimate_total(), 2);
    }

    #[test]
    fn test_strips_utf8_bom() {
        let file = csv_file(b"\xEF\xBB\xBFid,name\n1,x\n");
        let source = CsvRecordSource::new(file.path(), "utf-8-sig").unwrap();
        assert_eq!(read_all(&source)[0].get("id"), Some("1"));
    }

    #[test]
    fn test_falls_back_to_windows_1252() {
        // 0xE9 is 'é' in windows-1252 and invalid on its own in UTF-8
        let file = csv_file(b"name\ncaf\xE9\n");
        let source = CsvRecordSource::new(file.path(), "utf-8").unwrap();
        assert_eq!(read_all(&source)[0].get("name"), Some("café"));
    }

    #[test]
    fn test_fallback_detected_past_first_read_chunk() {
        let mut bytes = b"name\n".to_vec();
        for _ in 0..2000 {
            bytes.extend_from_slice(b"plain\n");
        }
        bytes.extend_from_slice(b"caf\xE9\n");
        let file = csv_file(&bytes);
        let source = CsvRecordSource::new(file.path(), "utf-8").unwrap();

        assert_eq!(source.detect_encoding().unwrap(), WINDOWS_1252);
        let records = read_all(&source);
        assert_eq!(records.len(), 2001);
        assert_eq!(records[2000].get("name"), Some("café"));
    }

    #[test]
    fn test_decoding_reader_handles_tiny_reads() {
        let text = "naïve,日本\n";
        let mut reader = DecodingReader::new(text.as_bytes(), UTF_8);
        let mut decoded = Vec::new();
        let mut byte = [0u8; 1];
        while reader.read(&mut byte).unwrap() == 1 {
            decoded.push(byte[0]);
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), text);
    }

    #[test]
    fn test_decoding_reader_converts_windows_1252() {
        let mut decoded = String::new();
        DecodingReader::new(&b"caf\xE9 \x80"[..], WINDOWS_1252)
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "café €");
    }

    #[test]
    fn test_short_rows_omit_missing_columns() {
        let file = csv_file(b"a,b,c\n1\n");
        let source = CsvRecordSource::new(file.path(), "utf-8").unwrap();
        let record = &read_all(&source)[0];
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("b"), None);
    }

    #[test]
    fn test_reopen_starts_over() {
        let file = csv_file(b"id\n1\n2\n");
        let source = CsvRecordSource::new(file.path(), "utf-8").unwrap();
        assert_eq!(read_all(&source).len(), 2);
        assert_eq!(read_all(&source).len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let source = CsvRecordSource::new("/nonexistent/input.csv", "utf-8").unwrap();
        assert!(matches!(source.open(), Err(IngestError::Source(_))));
        assert_eq!(source.estimate_total(), 0);
    }

    #[test]
    fn test_unknown_encoding_is_config_error() {
        assert!(matches!(
            CsvRecordSource::new("x.csv", "klingon"),
            Err(IngestError::Config(_))
        ));
        assert_eq!(encoding_for_label("latin1"), Some(WINDOWS_1252));
        assert_eq!(encoding_for_label("ISO-8859-1"), Some(WINDOWS_1252));
    }
}
