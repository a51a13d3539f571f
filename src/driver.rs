//! Conversion driver: archive groups -> archives -> chunks -> messages -> spreadsheets.
//!
//! Each immediate subdirectory of the source directory is an archive group
//! whose name prefixes the month-keyed spreadsheets of every `.mbox` file
//! below it. A message either lands in exactly one month sheet (plus the topic
//! sheet on a keyword hit), is skipped as spam or as having no plain-text body,
//! or is written to the failure ledger. Nothing short of a missing source
//! directory stops the run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SpamConfig};
use crate::date::{grouping_key, normalize_date, UNKNOWN};
use crate::error::ConvertError;
use crate::ledger::FailureLedger;
use crate::manifest::{Manifest, RunStats};
use crate::mbox::{chunk_dir_for, count_messages, ensure_chunks, MboxReader, CHUNK_DIR_SUFFIX};
use crate::message::{header_first, plain_text_body, sender_address, EmailRow, PartialRecord};
use crate::sheets::SheetRegistry;
use crate::spam::{SpamClassifier, SpamReason};
use crate::text::{contains_any, strip_quotes};

/// How a single message left the pipeline, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Routed { topic_match: bool },
    Spam(SpamReason),
    NoPlainText,
}

pub struct Converter {
    config: Config,
    classifier: SpamClassifier,
    sheets: SheetRegistry,
    ledger: FailureLedger,
    topic_sheet: PathBuf,
    stats: RunStats,
    since_flush: usize,
}

impl Converter {
    /// Fails when the configuration is invalid or the source directory is missing.
    /// Truncates the failure ledger otherwise.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if !config.source_dir.is_dir() {
            return Err(ConvertError::SourceMissing(config.source_dir.clone()).into());
        }

        let ledger = FailureLedger::create(&config.failure_ledger_path())?;
        Ok(Self {
            classifier: SpamClassifier::new(&config.spam),
            sheets: SheetRegistry::new(config.columns, config.row_height),
            topic_sheet: config.topic_sheet_path(),
            ledger,
            stats: RunStats::default(),
            since_flush: 0,
            config,
        })
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn sheets(&self) -> &SheetRegistry {
        &self.sheets
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn run(&mut self) -> Result<Manifest> {
        let started = Instant::now();
        info!(source = %self.config.source_dir.display(), "scanning source directory");

        let groups = group_dirs(&self.config.source_dir)?;
        if groups.is_empty() {
            warn!("no archive groups found");
        }

        for group in &groups {
            self.convert_group(group);
            self.flush();
            self.sheets.clear_except(&self.topic_sheet);
        }
        self.flush();
        if let Err(err) = self.split_topic_sheet() {
            error!(error = %format!("{err:#}"), "failed to split topic spreadsheet");
        }

        let manifest = Manifest::build(
            &self.config,
            self.ledger.path(),
            started.elapsed().as_secs_f64(),
            self.stats.clone(),
            self.sheets.persisted(),
        )?;
        manifest.write(&self.config.manifest_path())?;

        info!(
            messages = self.stats.messages_seen,
            routed = self.stats.routed,
            spam = self.stats.spam_filtered,
            failed = self.stats.failed,
            chunks_created = self.stats.chunks_created,
            "processing complete"
        );
        Ok(manifest)
    }

    fn convert_group(&mut self, group: &Path) {
        let group_name = group
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(group = %group_name, "processing archive group");

        for archive in find_archives(group) {
            info!(archive = %archive.display(), "found archive");
            self.stats.archives += 1;
            if let Err(err) = self.convert_archive(&archive, &group_name) {
                error!(archive = %archive.display(), error = %format!("{err:#}"), "failed to process archive");
                self.stats.unit_failures += 1;
            }
        }
    }

    /// Splits (or reuses the chunks of) one archive and routes every message in it.
    /// Month-keyed sheets are written next to the archive.
    pub fn convert_archive(&mut self, archive: &Path, group_name: &str) -> Result<()> {
        let chunks = ensure_chunks(archive, &chunk_dir_for(archive), self.config.chunk_size)?;
        if chunks.created {
            self.stats.chunks_created += chunks.paths.len();
        } else {
            self.stats.chunks_reused += chunks.paths.len();
        }

        let output_dir = archive.parent().unwrap_or_else(|| Path::new("."));
        for chunk in &chunks.paths {
            if let Err(err) = self.convert_chunk(chunk, group_name, output_dir) {
                error!(chunk = %chunk.display(), error = %format!("{err:#}"), "failed to process chunk");
                self.stats.unit_failures += 1;
            }
        }

        self.flush();
        info!(archive = %archive.display(), "processed and grouped emails");
        Ok(())
    }

    fn convert_chunk(&mut self, chunk: &Path, group_name: &str, output_dir: &Path) -> Result<()> {
        let total = count_messages(
            File::open(chunk).with_context(|| format!("open {}", chunk.display()))?,
        )?;
        let progress = self.progress_bar(total, chunk);
        let reader = MboxReader::open(chunk).with_context(|| format!("open {}", chunk.display()))?;

        for (index, raw) in reader.enumerate() {
            let raw = raw.with_context(|| format!("read {}", chunk.display()))?;
            self.stats.messages_seen += 1;

            let mut record = PartialRecord::default();
            match self.process_message(&raw, group_name, output_dir, &mut record) {
                Ok(Outcome::Routed { topic_match }) => {
                    self.stats.routed += 1;
                    if topic_match {
                        self.stats.topic_matches += 1;
                    }
                }
                Ok(Outcome::Spam(reason)) => {
                    debug!(?reason, from = ?record.from, "filtered spam");
                    self.stats.spam_filtered += 1;
                }
                Ok(Outcome::NoPlainText) => self.stats.skipped_no_body += 1,
                Err(err) => {
                    warn!(
                        chunk = %chunk.display(),
                        index,
                        error = %format!("{err:#}"),
                        "failed to process message"
                    );
                    self.stats.failed += 1;
                    if let Err(err) = self.ledger.record(&record) {
                        error!(
                            ledger = %self.ledger.path().display(),
                            error = %format!("{err:#}"),
                            "failed to record message in failure ledger"
                        );
                        self.stats.ledger_failures += 1;
                    }
                }
            }

            progress.inc(1);
            self.since_flush += 1;
            if self.since_flush >= self.config.flush_every {
                self.flush();
            }
        }

        progress.finish_and_clear();
        Ok(())
    }

    /// Runs one raw message through the pipeline, filling `record` as fields are extracted.
    pub fn process_message(
        &mut self,
        raw: &[u8],
        group_name: &str,
        output_dir: &Path,
        record: &mut PartialRecord,
    ) -> Result<Outcome> {
        let mail = mailparse::parse_mail(raw).context("parse message")?;
        record.from = header_first(&mail, "From");
        record.to = header_first(&mail, "To");
        record.subject = header_first(&mail, "Subject");

        let raw_date = header_first(&mail, "Date");
        let normalized = normalize_date(raw_date.as_deref().unwrap_or(""));
        let key = grouping_key(&normalized);
        record.date = if normalized == UNKNOWN {
            raw_date.or_else(|| Some(UNKNOWN.to_string()))
        } else {
            Some(normalized)
        };

        let Some(body) = plain_text_body(&mail).context("decode body")? else {
            return Ok(Outcome::NoPlainText);
        };
        let body = strip_quotes(&body);
        record.body = Some(body.clone());

        let sender = sender_address(record.from.as_deref().unwrap_or(""));
        let subject = record.subject.clone().unwrap_or_default();
        if let Some(reason) = self.classifier.classify(&sender, &subject, &body) {
            return Ok(Outcome::Spam(reason));
        }

        let row = EmailRow::from(&*record);
        let topic_match = contains_any(&subject, &self.config.topic_keywords)
            || contains_any(&body, &self.config.topic_keywords);

        let month_sheet = output_dir.join(format!("{group_name}_{key}.xlsx"));
        if topic_match {
            self.sheets
                .get_or_create(&self.topic_sheet)
                .append(row.clone());
        }
        self.sheets.get_or_create(&month_sheet).append(row);

        Ok(Outcome::Routed { topic_match })
    }

    /// Writes the topic sheet again as `<stem>_chunk_<n>.xlsx` part files of
    /// `split_rows` rows under `split_dir`. Quotes are stripped from every body
    /// and the full sender policy, domain rule included, drops spam rows first.
    fn split_topic_sheet(&mut self) -> Result<()> {
        let Some(rows_per_file) = self.config.split_rows else {
            return Ok(());
        };
        let Some(sheet) = self.sheets.get(&self.topic_sheet) else {
            debug!("no topic rows to split");
            return Ok(());
        };

        let classifier = SpamClassifier::new(&SpamConfig {
            check_domains: true,
            ..self.config.spam.clone()
        });
        let mut filtered = 0;
        let rows: Vec<EmailRow> = sheet
            .rows()
            .iter()
            .filter(|row| {
                let spam = classifier.is_spam(&sender_address(&row.from), &row.subject, &row.body);
                if spam {
                    filtered += 1;
                }
                !spam
            })
            .map(|row| EmailRow {
                body: strip_quotes(&row.body),
                ..row.clone()
            })
            .collect();

        let out_dir = self.config.split_dir_path();
        fs::create_dir_all(&out_dir).with_context(|| format!("create {}", out_dir.display()))?;
        let stem = Path::new(&self.config.topic_sheet)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.topic_sheet.clone());
        let parts = self
            .sheets
            .write_parts(&rows, &stem, rows_per_file, &out_dir)
            .with_context(|| format!("write parts under {}", out_dir.display()))?;

        self.stats.split_filtered += filtered;
        self.stats.split_files += parts.len();
        info!(
            parts = parts.len(),
            rows = rows.len(),
            filtered,
            "total emails filtered out while splitting topic spreadsheet"
        );
        Ok(())
    }

    fn flush(&mut self) {
        let report = self.sheets.flush_all();
        if report.written > 0 {
            debug!(written = report.written, "saved spreadsheets");
        }
        self.stats.flush_failures += report.failed;
        self.since_flush = 0;
    }

    fn progress_bar(&self, total: u64, chunk: &Path) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} emails ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(
            chunk
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        bar
    }
}

/// Immediate subdirectories of `source`, sorted.
fn group_dirs(source: &Path) -> Result<Vec<PathBuf>> {
    let mut groups = Vec::new();
    for entry in fs::read_dir(source).with_context(|| format!("read {}", source.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            groups.push(entry.path());
        }
    }
    groups.sort();
    Ok(groups)
}

/// `.mbox` files below `group`, skipping chunk directories.
fn find_archives(group: &Path) -> Vec<PathBuf> {
    WalkDir::new(group)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir() && e.file_name().to_string_lossy().ends_with(CHUNK_DIR_SUFFIX))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable path");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "mbox"))
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(dir: &Path) -> Converter {
        let config = Config {
            source_dir: dir.to_path_buf(),
            progress: false,
            ..Config::default()
        };
        Converter::new(config).unwrap()
    }

    fn mbox_entry(from: &str, subject: &str, headers: &str, body: &str) -> String {
        format!(
            "From {from} Tue Jun 04 09:15:00 2024\n\
             From: {from}\n\
             Subject: {subject}\n\
             Date: Tue, 04 Jun 2024 09:15:00 -0600\n\
             {headers}\
             \n\
             {body}\n\
             \n"
        )
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            source_dir: dir.path().join("absent"),
            ..Config::default()
        };
        let err = Converter::new(config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::SourceMissing(_))
        ));
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn test_unknown_date_routes_to_unknown_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        let raw = b"From: a@example.com\r\nSubject: Hinges\r\nDate: whenever\r\n\r\nNeed 40 hinges.\r\n";

        let mut record = PartialRecord::default();
        let outcome = converter
            .process_message(raw, "jason", dir.path(), &mut record)
            .unwrap();

        assert_eq!(outcome, Outcome::Routed { topic_match: false });
        let sheet = converter
            .sheets()
            .get(&dir.path().join("jason_Unknown.xlsx"))
            .unwrap();
        assert_eq!(sheet.rows()[0].date, "whenever");
    }

    #[test]
    fn test_partial_record_survives_body_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        let raw = b"From: a@example.com\r\nSubject: Broken\r\nDate: Tue, 04 Jun 2024 09:15:00 -0600\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\n%%%% not base64 %%%%\r\n";

        let mut record = PartialRecord::default();
        assert!(converter
            .process_message(raw, "jason", dir.path(), &mut record)
            .is_err());
        assert_eq!(record.from.as_deref(), Some("a@example.com"));
        assert_eq!(record.subject.as_deref(), Some("Broken"));
        assert_eq!(record.date.as_deref(), Some("2024-06-04 09:15:00"));
        assert_eq!(record.body, None);
    }

    #[test]
    fn test_no_plain_text_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        let raw = b"From: a@example.com\r\nContent-Type: text/html\r\n\r\n<p>door</p>\r\n";

        let mut record = PartialRecord::default();
        let outcome = converter
            .process_message(raw, "jason", dir.path(), &mut record)
            .unwrap();
        assert_eq!(outcome, Outcome::NoPlainText);
        assert_eq!(converter.sheets().open_paths().count(), 0);
    }

    #[test]
    fn test_periodic_flush_persists_rows_mid_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            progress: false,
            flush_every: 2,
            ..Config::default()
        };
        let mut converter = Converter::new(config).unwrap();
        let chunk = dir.path().join("chunk_0.mbox");
        let entries: String = ["one", "two", "three"]
            .iter()
            .map(|s| mbox_entry("a@example.com", s, "", "Cabinet question."))
            .collect();
        std::fs::write(&chunk, entries).unwrap();

        converter.convert_chunk(&chunk, "jason", dir.path()).unwrap();

        // The third row is still only in memory: the chunk loop never flushes at its end.
        let month = dir.path().join("jason_2024-06.xlsx");
        assert!(month.exists());
        assert_eq!(converter.sheets().persisted().get(&month), Some(&2));
        assert_eq!(converter.sheets().get(&month).unwrap().rows().len(), 3);
        assert_eq!(converter.stats().routed, 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ledger_write_failure_does_not_abort_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut converter = converter(dir.path());
        let full = Path::new("/dev/full");
        let file = File::options().write(true).open(full).unwrap();
        converter.ledger = FailureLedger::from_file(full, file);

        let chunk = dir.path().join("chunk_0.mbox");
        let entries = [
            mbox_entry(
                "a@example.com",
                "Broken",
                "Content-Type: text/plain\nContent-Transfer-Encoding: base64\n",
                "%%%% not base64 %%%%",
            ),
            mbox_entry("b@example.com", "Hinges", "", "Need 40 hinges."),
        ]
        .concat();
        std::fs::write(&chunk, entries).unwrap();

        converter.convert_chunk(&chunk, "jason", dir.path()).unwrap();

        let stats = converter.stats();
        assert_eq!(stats.messages_seen, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.ledger_failures, 1);
        assert_eq!(stats.routed, 1);
        assert_eq!(converter.ledger().entries(), 0);
    }

    #[test]
    fn test_split_topic_sheet_applies_domain_rule_and_strips_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            progress: false,
            split_rows: Some(2),
            ..Config::default()
        };
        let mut converter = Converter::new(config.clone()).unwrap();
        let topic = config.topic_sheet_path();
        for (from, body) in [
            ("a@example.com", "door one"),
            ("deals@shop.promo", "door deals"),
            ("b@example.com", "door two\n> quoted"),
            ("c@example.com", "door three"),
        ] {
            converter.sheets.get_or_create(&topic).append(EmailRow {
                from: from.to_string(),
                body: body.to_string(),
                ..EmailRow::default()
            });
        }

        converter.split_topic_sheet().unwrap();

        assert_eq!(converter.stats().split_filtered, 1);
        assert_eq!(converter.stats().split_files, 2);
        let out = config.split_dir_path();
        let persisted = converter.sheets().persisted();
        assert_eq!(persisted.get(&out.join("emails_about_doors_chunk_1.xlsx")), Some(&2));
        assert_eq!(persisted.get(&out.join("emails_about_doors_chunk_2.xlsx")), Some(&1));
        // The accumulated topic rows themselves are untouched.
        let rows = converter.sheets().get(&topic).unwrap().rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2].body, "door two\n> quoted");
    }
}
