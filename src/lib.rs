//! Converts mailbox exports into month-grouped `.xlsx` spreadsheets, filtering
//! spam and collecting keyword matches into one cross-archive spreadsheet.

pub mod config;
pub mod date;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod mbox;
pub mod message;
pub mod sheets;
pub mod spam;
pub mod text;

pub use config::{ColumnLayout, Config, SpamConfig};
pub use driver::{Converter, Outcome};
pub use error::ConvertError;
pub use manifest::{Manifest, RunStats};
