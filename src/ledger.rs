//! Append-only CSV of messages that could not be processed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::message::PartialRecord;

const HEADER: &str = "From,Subject,Date,Body";

pub struct FailureLedger {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: usize,
}

impl FailureLedger {
    /// Truncates `path` and writes the header row.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entries: 0,
        })
    }

    /// Wraps an already-open file without writing a header.
    #[cfg(test)]
    pub(crate) fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            entries: 0,
        }
    }

    /// Appends one row and flushes it to disk.
    pub fn record(&mut self, record: &PartialRecord) -> Result<()> {
        let field = |v: &Option<String>| csv_escape(v.as_deref().unwrap_or(""));
        writeln!(
            self.writer,
            "{},{},{},{}",
            field(&record.from),
            field(&record.subject),
            field(&record.date),
            field(&record.body),
        )
        .and_then(|_| self.writer.flush())
        .with_context(|| format!("append to {}", self.path.display()))?;

        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// RFC 4180: quote fields with separators or line breaks, double embedded quotes.
fn csv_escape(value: &str) -> String {
    let needs_quotes = value.contains([',', '"', '\n', '\r']);
    if !needs_quotes {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\"\""))
}
