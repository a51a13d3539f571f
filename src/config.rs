use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Column set written to every destination spreadsheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnLayout {
    /// From, Subject, Date, Body.
    #[default]
    Compact,
    /// From, To, Subject, Date, Body.
    WithRecipient,
}

impl ColumnLayout {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            ColumnLayout::Compact => &["From", "Subject", "Date", "Body"],
            ColumnLayout::WithRecipient => &["From", "To", "Subject", "Date", "Body"],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpamConfig {
    pub blocked_senders: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub keywords: Vec<String>,
    /// Apply the blocked-domain suffix rule. The chunk-based converter runs without it.
    pub check_domains: bool,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            blocked_senders: vec!["noreply@homesteadcabinet.net".to_string()],
            blocked_domains: [".promo", ".info", "marketing.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            keywords: [
                "promotion",
                "sale",
                "offer",
                "unsubscribe",
                "free",
                "discount",
                "advertisement",
                "marketing",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            check_domains: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub source_dir: PathBuf,
    /// Upper bound for a single chunk file, in bytes.
    pub chunk_size: u64,
    /// Persist every open spreadsheet after this many processed messages.
    pub flush_every: usize,
    /// File name, inside `source_dir`, of the keyword-matched spreadsheet.
    pub topic_sheet: String,
    /// File name, inside `source_dir`, of the failure ledger.
    pub failure_ledger: String,
    /// File name, inside `source_dir`, of the run manifest.
    pub manifest: String,
    pub columns: ColumnLayout,
    /// Row height applied to every row when a spreadsheet is written, in points.
    pub row_height: f64,
    pub progress: bool,
    pub topic_keywords: Vec<String>,
    pub spam: SpamConfig,
    /// When set, the topic sheet is also written as numbered part files of this many rows.
    pub split_rows: Option<usize>,
    /// Directory, inside `source_dir`, receiving the part files.
    pub split_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data"),
            chunk_size: 50 * 1024 * 1024,
            flush_every: 50,
            topic_sheet: "emails_about_doors.xlsx".to_string(),
            failure_ledger: "failed_emails.csv".to_string(),
            manifest: "conversion_manifest.json".to_string(),
            columns: ColumnLayout::Compact,
            row_height: 0.22 * 72.0,
            progress: true,
            topic_keywords: ["door", "door-style", "door shop", "door procedure"]
                .into_iter()
                .map(String::from)
                .collect(),
            spam: SpamConfig::default(),
            split_rows: None,
            split_dir: "emails_chunks_output".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConvertError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConvertError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.chunk_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.flush_every == 0 {
            return Err(ConvertError::InvalidConfig(
                "flush_every must be greater than zero".to_string(),
            ));
        }
        if self.split_rows == Some(0) {
            return Err(ConvertError::InvalidConfig(
                "split_rows must be greater than zero".to_string(),
            ));
        }
        if self.topic_sheet.is_empty() || self.failure_ledger.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "topic_sheet and failure_ledger need a file name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn topic_sheet_path(&self) -> PathBuf {
        self.source_dir.join(&self.topic_sheet)
    }

    pub fn failure_ledger_path(&self) -> PathBuf {
        self.source_dir.join(&self.failure_ledger)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.source_dir.join(&self.manifest)
    }

    pub fn split_dir_path(&self) -> PathBuf {
        self.source_dir.join(&self.split_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            source_dir = "/srv/takeout"
            columns = "with_recipient"
            split_rows = 5000

            [spam]
            check_domains = true
            "#,
        )
        .unwrap();

        assert_eq!(config.source_dir, PathBuf::from("/srv/takeout"));
        assert_eq!(config.columns, ColumnLayout::WithRecipient);
        assert!(config.spam.check_domains);
        assert_eq!(config.spam.keywords.len(), 8);
        assert_eq!(config.flush_every, 50);
        assert!(config.topic_keywords.contains(&"door".to_string()));
        assert_eq!(config.split_rows, Some(5000));
        assert_eq!(config.split_dir, "emails_chunks_output");
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConvertError::InvalidConfig(_))
        ));
        assert!(Config::default().validate().is_ok());

        let config = Config {
            split_rows: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layout_headers() {
        assert_eq!(ColumnLayout::Compact.headers().len(), 4);
        assert_eq!(ColumnLayout::WithRecipient.headers()[1], "To");
    }
}
