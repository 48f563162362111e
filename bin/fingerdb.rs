use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fingerdb::testing::{check_all_invariants, default_invariants};
use fingerdb::{Connection, DataStore, DatastoreConfig, OpMode};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fingerdb")]
#[command(about = "Inspect and maintain fingerprint datastores", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "FINGERDB_CONFIG")]
    config: Option<PathBuf>,

    /// Datastore directory (overrides the configuration file)
    #[arg(long, env = "FINGERDB_URL")]
    url: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print record counts and datastore info
    Stats {
        /// Also check every posting list for consistency
        #[arg(long)]
        verify: bool,
    },
    /// Fold the main index of another datastore into this one
    Merge {
        /// Directory of the datastore holding the delta index
        #[arg(long)]
        delta_url: PathBuf,
    },
    /// Print the headers of one posting list
    DumpList {
        list_id: u32,
        /// Also print block bodies as hex
        #[arg(long)]
        bodies: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DatastoreConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DatastoreConfig::default(),
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }

    info!("fingerdb v{} at {}", fingerdb::VERSION, config.url.display());

    match args.command {
        Command::Stats { verify } => stats(config, verify),
        Command::Merge { delta_url } => merge(config, &delta_url),
        Command::DumpList { list_id, bodies } => dump_list(config, list_id, bodies),
    }
}

/// Open read-only, with whichever side stores exist on disk
fn open_for_reading(config: DatastoreConfig) -> Result<Connection> {
    let exists = |name: &str| config.url.join(name).exists();
    let (fingerprints, metadata, info) = (
        exists(&config.names.fingerprints),
        exists(&config.names.metadata),
        exists(&config.names.info),
    );
    let url = config.url.clone();
    let mut conn = Connection::with_fjall(config)?;
    conn.open(OpMode::Get, fingerprints, metadata, info)
        .with_context(|| format!("opening datastore at {}", url.display()))?;
    Ok(conn)
}

fn stats(config: DatastoreConfig, verify: bool) -> Result<()> {
    let conn = open_for_reading(config)?;
    let index = conn.main_index();
    let lists = index.list_ids()?;

    println!("url:             {}", conn.url().display());
    println!("index records:   {}", index.record_count()?);
    println!("posting lists:   {}", lists.len());
    if conn.fingerprints().collection().is_open() {
        println!("fingerprints:    {}", conn.get_fingerprints_count()?);
    }
    match conn.get_info() {
        Ok(info) => println!("info:            v{} {:?}", info.version, info.match_type),
        Err(e) => warn!("datastore info unavailable: {}", e),
    }

    if verify {
        let violations = check_all_invariants(index, &default_invariants());
        if !violations.is_empty() {
            for violation in &violations {
                eprintln!("{}", violation);
            }
            bail!("{} invariant violations", violations.len());
        }
        println!("verify:          ok ({} lists)", lists.len());
    }
    Ok(())
}

fn merge(config: DatastoreConfig, delta_url: &Path) -> Result<()> {
    let mut main = Connection::with_fjall(config)?;
    main.open(OpMode::Build, false, false, false)?;

    let stats = main
        .merge_from(delta_url)
        .with_context(|| format!("merging datastore at {}", delta_url.display()))?;
    main.close()?;

    println!(
        "merged {} lists ({} copied, {} appended), {} blocks, {} records",
        stats.lists_total(),
        stats.lists_copied,
        stats.lists_appended,
        stats.blocks_read,
        stats.records_merged
    );
    Ok(())
}

fn dump_list(config: DatastoreConfig, list_id: u32, bodies: bool) -> Result<()> {
    let conn = open_for_reading(config)?;
    let index = conn.main_index();
    let lh = index.get_list_header(list_id)?;
    if lh.is_empty() {
        bail!("list {} does not exist", list_id);
    }

    println!(
        "list {}: {} blocks, {} records, {} bytes",
        lh.list_id, lh.block_count, lh.record_count, lh.body_bytes
    );
    for block_id in 0..lh.block_count {
        let block = index.read_block_full(list_id, block_id)?;
        println!(
            "  block {:>5}: {:>6} records {:>8} bytes crc {:08x}{}",
            block.header.block_id,
            block.header.record_count,
            block.header.body_size,
            block.header.body_crc,
            if block.header.is_first() { " first" } else { "" }
        );
        if bodies {
            let hex: String = block.body.iter().map(|b| format!("{:02x}", b)).collect();
            println!("    {}", hex);
        }
    }
    Ok(())
}
