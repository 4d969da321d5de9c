//! Interlink database inspection tool.
//!
//! Reads and repairs the per-chain local-safe and cross-safe derivation
//! databases of a stopped supervisor. Query output is JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use interlink_core::{BlockId, BlockSeal, ChainId, Hash256};
use interlink_db::{DbConfig, DerivationDb, FileEntryStore};

#[derive(Parser, Debug)]
#[command(
    name = "interlink-dbtool",
    version,
    about = "Inspect and rewind interlink derivation databases"
)]
struct Cli {
    /// Data directory of the supervisor
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every link of a database, one JSON object per line
    Dump(Target),
    /// Print the latest link, including an invalidated placeholder
    Latest(Target),
    /// Print the first L1 block an L2 block was derived from
    DerivedFrom {
        #[command(flatten)]
        target: Target,
        /// L2 block hash (0x-prefixed hex)
        #[arg(long)]
        hash: Hash256,
        /// L2 block number
        #[arg(long)]
        number: u64,
    },
    /// Drop every link after the first one that derived the given L2 block
    RewindL2 {
        #[command(flatten)]
        target: Target,
        /// L2 block number to keep
        #[arg(long)]
        number: u64,
    },
    /// Drop every link after the last one derived from the given L1 block
    RewindL1 {
        #[command(flatten)]
        target: Target,
        /// L1 block number to keep
        #[arg(long)]
        number: u64,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Chain ID
    #[arg(long)]
    chain: u64,

    /// Which safety tier to open
    #[arg(long, value_enum, default_value_t = Tier::Local)]
    tier: Tier,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Tier {
    Local,
    Cross,
}

#[derive(Serialize)]
struct LinkView {
    index: u64,
    derived_from: BlockSeal,
    derived: BlockSeal,
    invalidated: bool,
}

impl Cli {
    /// Database configuration with the command-line overrides applied.
    fn to_config(&self) -> DbConfig {
        let mut config = DbConfig::default();
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.to_config();
    init_logging(&config.log_level, &cli.log_format);
    info!(data_dir = %config.data_dir.display(), "using data directory");

    match cli.command {
        Commands::Dump(target) => {
            let db = open(&config, &target)?;
            let entries = db.entries().context("failed to read links")?;
            for (index, link) in entries.into_iter().enumerate() {
                print_json(&LinkView {
                    index: index as u64,
                    derived_from: link.derived_from,
                    derived: link.derived,
                    invalidated: link.invalidated,
                })?;
            }
        }
        Commands::Latest(target) => {
            let db = open(&config, &target)?;
            let entries = db.entry_count();
            if entries == 0 {
                bail!("database is empty");
            }
            match db.latest() {
                Ok(pair) => print_json(&LinkView {
                    index: entries - 1,
                    derived_from: pair.derived_from,
                    derived: pair.derived,
                    invalidated: false,
                })?,
                Err(e) => {
                    let pair = db.invalidated().with_context(|| format!("failed to read latest link: {e}"))?;
                    warn!(derived = %pair.derived, "latest link is invalidated, awaiting replacement");
                    print_json(&LinkView {
                        index: entries - 1,
                        derived_from: pair.derived_from,
                        derived: pair.derived,
                        invalidated: true,
                    })?;
                }
            }
        }
        Commands::DerivedFrom { target, hash, number } => {
            let db = open(&config, &target)?;
            let seal = db
                .derived_from(BlockId::new(hash, number))
                .with_context(|| format!("no derived-from block for {number}"))?;
            print_json(&seal)?;
        }
        Commands::RewindL2 { target, number } => {
            let db = open(&config, &target)?;
            let before = db.entry_count();
            db.rewind_to_l2(number)
                .with_context(|| format!("failed to rewind to L2 block {number}"))?;
            db.close()?;
            info!(removed = before - db.entry_count(), "rewound to L2 block");
            print_json(&db.latest()?)?;
        }
        Commands::RewindL1 { target, number } => {
            let db = open(&config, &target)?;
            let before = db.entry_count();
            db.rewind_to_l1(number)
                .with_context(|| format!("failed to rewind to L1 block {number}"))?;
            db.close()?;
            info!(removed = before - db.entry_count(), "rewound to L1 block");
            print_json(&db.latest()?)?;
        }
    }
    Ok(())
}

/// Open an existing database; never creates one.
fn open(config: &DbConfig, target: &Target) -> Result<DerivationDb<FileEntryStore>> {
    let chain = ChainId(target.chain);
    let path = match target.tier {
        Tier::Local => config.local_safe_path(chain),
        Tier::Cross => config.cross_safe_path(chain),
    };
    if !path.exists() {
        bail!("no database at {}", path.display());
    }
    DerivationDb::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
