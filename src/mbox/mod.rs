//! Mailbox archive access: message iteration and byte-bounded chunking.

pub mod chunker;
pub mod reader;

pub use chunker::{chunk_mbox, chunks_complete, ensure_chunks, expected_chunk_count, ChunkSet};
pub use reader::{count_messages, MboxReader};

/// Directory holding the chunks of `<dir>/<stem>.mbox`.
pub fn chunk_dir_for(archive: &std::path::Path) -> std::path::PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    archive.with_file_name(format!("{stem}{CHUNK_DIR_SUFFIX}"))
}

pub const CHUNK_DIR_SUFFIX: &str = "_chunks";
