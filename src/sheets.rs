//! In-memory destination spreadsheets keyed by output path.
//!
//! `.xlsx` files cannot be appended to, so every flush rewrites the whole
//! workbook from the rows held here. Rows accumulate until [`SheetRegistry::clear_except`]
//! drops them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, FormatAlign, Workbook, XlsxError};
use tracing::{debug, error};

use crate::config::ColumnLayout;
use crate::message::EmailRow;

const SHEET_NAME: &str = "Emails";
/// Excel's per-cell character limit.
const MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, Default)]
pub struct Sheet {
    rows: Vec<EmailRow>,
    dirty: bool,
}

impl Sheet {
    pub fn append(&mut self, row: EmailRow) {
        self.rows.push(row);
        self.dirty = true;
    }

    pub fn rows(&self) -> &[EmailRow] {
        &self.rows
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct SheetRegistry {
    layout: ColumnLayout,
    row_height: f64,
    sheets: BTreeMap<PathBuf, Sheet>,
    /// Row count of every file written during this run, as of its last successful flush.
    persisted: BTreeMap<PathBuf, usize>,
}

impl SheetRegistry {
    pub fn new(layout: ColumnLayout, row_height: f64) -> Self {
        Self {
            layout,
            row_height,
            sheets: BTreeMap::new(),
            persisted: BTreeMap::new(),
        }
    }

    /// Returns the sheet for `path`, creating an empty one (header only) on first use.
    pub fn get_or_create(&mut self, path: &Path) -> &mut Sheet {
        self.sheets.entry(path.to_path_buf()).or_insert_with(|| {
            debug!(path = %path.display(), "opening spreadsheet");
            Sheet {
                rows: Vec::new(),
                dirty: true,
            }
        })
    }

    pub fn get(&self, path: &Path) -> Option<&Sheet> {
        self.sheets.get(path)
    }

    pub fn open_paths(&self) -> impl Iterator<Item = &Path> {
        self.sheets.keys().map(PathBuf::as_path)
    }

    pub fn persisted(&self) -> &BTreeMap<PathBuf, usize> {
        &self.persisted
    }

    /// Writes every sheet changed since its last flush. A failing sheet is
    /// logged, stays dirty, and does not stop the others.
    pub fn flush_all(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        for (path, sheet) in self.sheets.iter_mut().filter(|(_, s)| s.dirty) {
            match write_sheet(path, &sheet.rows, self.layout, self.row_height) {
                Ok(()) => {
                    sheet.dirty = false;
                    self.persisted.insert(path.clone(), sheet.rows.len());
                    report.written += 1;
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to save spreadsheet");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Writes `rows` as `<stem>_chunk_<n>.xlsx` files (1-based) of at most
    /// `rows_per_file` rows each into `out_dir`, which must exist. No rows, no files.
    pub fn write_parts(
        &mut self,
        rows: &[EmailRow],
        stem: &str,
        rows_per_file: usize,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, XlsxError> {
        let mut parts = Vec::new();
        for (i, part) in rows.chunks(rows_per_file.max(1)).enumerate() {
            let path = out_dir.join(format!("{stem}_chunk_{}.xlsx", i + 1));
            write_sheet(&path, part, self.layout, self.row_height)?;
            self.persisted.insert(path.clone(), part.len());
            parts.push(path);
        }
        debug!(stem, parts = parts.len(), "split spreadsheet");
        Ok(parts)
    }

    /// Drops every in-memory sheet except `keep`. Unflushed rows of dropped sheets are lost.
    pub fn clear_except(&mut self, keep: &Path) {
        self.sheets.retain(|path, _| path == keep);
    }
}

fn write_sheet(
    path: &Path,
    rows: &[EmailRow],
    layout: ColumnLayout,
    row_height: f64,
) -> Result<(), XlsxError> {
    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::Top);
    let cell_format = Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::Top);

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, title) in layout.headers().iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header_format)?;
    }
    worksheet.set_row_height(0, row_height)?;

    for (i, row) in rows.iter().enumerate() {
        let excel_row = i as u32 + 1;
        for (col, value) in cells(row, layout).into_iter().enumerate() {
            worksheet.write_string_with_format(
                excel_row,
                col as u16,
                truncate_cell(value),
                &cell_format,
            )?;
        }
        worksheet.set_row_height(excel_row, row_height)?;
    }

    workbook.save(path)
}

fn cells(row: &EmailRow, layout: ColumnLayout) -> Vec<&str> {
    match layout {
        ColumnLayout::Compact => vec![
            row.from.as_str(),
            row.subject.as_str(),
            row.date.as_str(),
            row.body.as_str(),
        ],
        ColumnLayout::WithRecipient => vec![
            row.from.as_str(),
            row.to.as_str(),
            row.subject.as_str(),
            row.date.as_str(),
            row.body.as_str(),
        ],
    }
}

fn truncate_cell(value: &str) -> &str {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}
