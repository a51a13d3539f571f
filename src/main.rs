use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mbox_xlsx::mbox::{chunk_dir_for, ensure_chunks};
use mbox_xlsx::{ColumnLayout, Config, Converter};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every archive group under the source directory into spreadsheets.
    Convert(ConvertArgs),
    /// Split one archive into chunk files, reusing a complete existing set.
    Chunk(ChunkArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// TOML file with filter lists and output settings.
    #[arg(long, env = "MBOX_XLSX_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "MBOX_XLSX_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Maximum chunk size in bytes.
    #[arg(long, env = "MBOX_XLSX_CHUNK_SIZE")]
    chunk_size: Option<u64>,

    /// Save all open spreadsheets after this many messages.
    #[arg(long, env = "MBOX_XLSX_FLUSH_EVERY")]
    flush_every: Option<usize>,

    /// Also write the topic spreadsheet as part files of this many rows.
    #[arg(long, env = "MBOX_XLSX_SPLIT_ROWS")]
    split_rows: Option<usize>,

    /// Add a To column to every spreadsheet.
    #[arg(long)]
    with_recipient: bool,

    /// Also treat senders in blocked domains as spam.
    #[arg(long)]
    check_domains: bool,

    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ChunkArgs {
    archive: PathBuf,

    /// Defaults to `<stem>_chunks` next to the archive.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long, env = "MBOX_XLSX_CHUNK_SIZE", default_value_t = Config::default().chunk_size)]
    chunk_size: u64,
}

fn load_config(args: ConvertArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(source_dir) = args.source_dir {
        config.source_dir = source_dir;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(flush_every) = args.flush_every {
        config.flush_every = flush_every;
    }
    if args.split_rows.is_some() {
        config.split_rows = args.split_rows;
    }
    if args.with_recipient {
        config.columns = ColumnLayout::WithRecipient;
    }
    if args.check_domains {
        config.spam.check_domains = true;
    }
    if args.no_progress {
        config.progress = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Convert(args) => {
            let config = load_config(args)?;
            let mut converter = Converter::new(config)?;
            let manifest = converter.run()?;
            let stats = &manifest.stats;

            println!(
                "OK messages={} routed={} topic={} spam={} no_body={} failed={} chunks_created={} split_files={} split_filtered={} duration_s={:.2}",
                stats.messages_seen,
                stats.routed,
                stats.topic_matches,
                stats.spam_filtered,
                stats.skipped_no_body,
                stats.failed,
                stats.chunks_created,
                stats.split_files,
                stats.split_filtered,
                manifest.duration_s,
            );
        }
        Command::Chunk(args) => {
            let out_dir = args
                .out_dir
                .unwrap_or_else(|| chunk_dir_for(&args.archive));
            let chunks = ensure_chunks(&args.archive, &out_dir, args.chunk_size)?;
            for path in &chunks.paths {
                println!("{}", path.display());
            }
            println!(
                "OK chunks={} created={}",
                chunks.paths.len(),
                chunks.created
            );
        }
    }

    Ok(())
}
