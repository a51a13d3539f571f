//! Byte-bounded splitting of a large archive into `chunk_<i>.mbox` files.
//!
//! Splitting copies lines until the size threshold is reached and cuts the
//! line that crosses it. Message boundaries are not respected: a message that
//! straddles a cut shows up as a truncated message at the end of chunk `i` and
//! as a headerless fragment at the start of chunk `i + 1`.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use tracing::{debug, info};

const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_EXT: &str = "mbox";

/// Chunk files backing one archive, in order.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub paths: Vec<PathBuf>,
    /// False when a complete set from an earlier run was reused.
    pub created: bool,
}

pub fn chunk_file_name(index: usize) -> String {
    format!("{CHUNK_PREFIX}{index}.{CHUNK_EXT}")
}

/// `floor(size / max_chunk_size) + 1`. An exact multiple ends with an empty chunk.
pub fn expected_chunk_count(source_size: u64, max_chunk_size: u64) -> usize {
    (source_size / max_chunk_size) as usize + 1
}

/// Splits `source` into `out_dir/chunk_<i>.mbox` files of at most `max_chunk_size` bytes.
pub fn chunk_mbox(source: &Path, out_dir: &Path, max_chunk_size: u64) -> Result<Vec<PathBuf>> {
    ensure!(max_chunk_size > 0, "chunk size must be greater than zero");
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;

    let input = File::open(source).with_context(|| format!("open {}", source.display()))?;
    let mut reader = BufReader::new(input);

    let mut paths = vec![out_dir.join(chunk_file_name(0))];
    let mut out = create_chunk(&paths[0])?;
    let mut written = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("read {}", source.display()))?;
        if n == 0 {
            break;
        }

        let mut remaining = line.as_slice();
        while !remaining.is_empty() {
            let room = (max_chunk_size - written).min(remaining.len() as u64) as usize;
            out.write_all(&remaining[..room])?;
            written += room as u64;
            remaining = &remaining[room..];

            if written == max_chunk_size {
                out.flush()?;
                let next = out_dir.join(chunk_file_name(paths.len()));
                out = create_chunk(&next)?;
                paths.push(next);
                written = 0;
            }
        }
    }
    out.flush()?;

    debug!(source = %source.display(), chunks = paths.len(), "archive split");
    Ok(paths)
}

fn create_chunk(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Indices of the files in `dir` that follow the chunk naming convention.
fn chunk_indices(dir: &Path) -> Result<BTreeSet<usize>> {
    let mut indices = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(indices);
    }

    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix(CHUNK_PREFIX))
            .and_then(|n| n.strip_suffix(&format!(".{CHUNK_EXT}")))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };
        // "chunk_01.mbox" is not a name this module would produce.
        if name.to_str() == Some(chunk_file_name(index).as_str()) {
            indices.insert(index);
        }
    }
    Ok(indices)
}

/// True when `dir` holds exactly `chunk_0` .. `chunk_{expected-1}` and nothing else by that convention.
pub fn chunks_complete(dir: &Path, expected: usize) -> Result<bool> {
    let indices = chunk_indices(dir)?;
    Ok(indices.len() == expected && indices.iter().copied().eq(0..expected))
}

/// Reuses a complete chunk set for `source`, or discards whatever is there and splits again.
pub fn ensure_chunks(source: &Path, out_dir: &Path, max_chunk_size: u64) -> Result<ChunkSet> {
    ensure!(max_chunk_size > 0, "chunk size must be greater than zero");
    let size = fs::metadata(source)
        .with_context(|| format!("stat {}", source.display()))?
        .len();
    let expected = expected_chunk_count(size, max_chunk_size);

    if chunks_complete(out_dir, expected)? {
        info!(dir = %out_dir.display(), chunks = expected, "reusing existing chunks");
        let paths = (0..expected)
            .map(|i| out_dir.join(chunk_file_name(i)))
            .collect();
        return Ok(ChunkSet {
            paths,
            created: false,
        });
    }

    for index in chunk_indices(out_dir)? {
        let stale = out_dir.join(chunk_file_name(index));
        fs::remove_file(&stale).with_context(|| format!("remove {}", stale.display()))?;
    }

    info!(source = %source.display(), chunks = expected, "splitting archive");
    let paths = chunk_mbox(source, out_dir, max_chunk_size)?;
    Ok(ChunkSet {
        paths,
        created: true,
    })
}
