//! CaskDB CLI
//!
//! Opens a store directory and runs one operation against it.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

use caskdb::config::Config;
use caskdb::lock::LockFile;
use caskdb::paths::CONFIG_FILENAME;
use caskdb::{CaskError, Result, Store};

/// CaskDB CLI
#[derive(Parser, Debug)]
#[command(name = "caskdb")]
#[command(about = "Command-line tool for CaskDB stores")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, global = true, default_value = "/tmp/caskdb")]
    path: PathBuf,

    /// Open read-only if another process holds the store
    #[arg(short, long, global = true)]
    read_only: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty store
    Init,

    /// Print the value of a key
    Get {
        key: String,
    },

    /// Store a value (read from stdin when omitted)
    Put {
        key: String,
        value: Option<String>,
    },

    /// Delete a key
    Del {
        key: String,
    },

    /// List every key
    Keys,

    /// List the keys starting with a prefix
    Scan {
        prefix: String,
    },

    /// List the keys between two keys, inclusive
    Range {
        start: String,
        end: String,
    },

    /// Compact the store
    Merge,

    /// Print store statistics as JSON
    Stats,

    /// Write every pair as a base64 JSON line to a file or stdout
    Export {
        output: Option<PathBuf>,
    },

    /// Load pairs written by `export` from a file or stdin
    Import {
        input: Option<PathBuf>,
    },

    /// Repair corrupt segments without opening the store
    Recover,
}

/// One line of the export format
#[derive(Debug, Serialize, Deserialize)]
struct KvPair {
    key: String,
    value: String,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Recover => recover(&args.path),
        command => {
            let store = Store::open_with(&args.path, Store::builder().open_readonly(args.read_only))?;
            execute(&store, command)?;
            store.close()
        }
    }
}

fn execute(store: &Store, command: Commands) -> Result<()> {
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Init => {
            tracing::info!(path = %store.path().display(), "initialized store");
        }
        // Runs without opening the store
        Commands::Recover => {}
        Commands::Get { key } => {
            let value = store.get(key.as_bytes())?;
            stdout.write_all(&value)?;
            writeln!(stdout)?;
        }
        Commands::Put { key, value } => {
            let value = match value {
                Some(value) => value.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            store.put(key, value)?;
        }
        Commands::Del { key } => store.delete(key)?,
        Commands::Keys => store.for_each(|key| print_key(&mut stdout, key))?,
        Commands::Scan { prefix } => store.scan(prefix.as_bytes(), |key| print_key(&mut stdout, key))?,
        Commands::Range { start, end } => {
            store.range(start.as_bytes(), end.as_bytes(), |key| print_key(&mut stdout, key))?
        }
        Commands::Merge => store.merge()?,
        Commands::Stats => {
            let stats = store.stats()?;
            let json = serde_json::to_string_pretty(&stats).map_err(json_error)?;
            writeln!(stdout, "{}", json)?;
        }
        Commands::Export { output } => match output {
            Some(path) => export(store, File::create(path)?)?,
            None => export(store, &mut stdout)?,
        },
        Commands::Import { input } => match input {
            Some(path) => import(store, BufReader::new(File::open(path)?))?,
            None => import(store, io::stdin().lock())?,
        },
    }

    Ok(())
}

fn print_key(out: &mut impl Write, key: &[u8]) -> Result<()> {
    writeln!(out, "{}", String::from_utf8_lossy(key))?;
    Ok(())
}

fn export(store: &Store, mut out: impl Write) -> Result<()> {
    for pair in store.iter() {
        let (key, value) = pair?;
        let line = KvPair {
            key: STANDARD.encode(&key),
            value: STANDARD.encode(&value),
        };
        serde_json::to_writer(&mut out, &line).map_err(json_error)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn import(store: &Store, input: impl BufRead) -> Result<()> {
    let mut imported = 0usize;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let pair: KvPair = serde_json::from_str(&line).map_err(json_error)?;
        let key = STANDARD.decode(&pair.key).map_err(base64_error)?;
        let value = STANDARD.decode(&pair.value).map_err(base64_error)?;
        store.put(key, value)?;
        imported += 1;
    }
    tracing::info!(imported, "imported pairs");
    Ok(())
}

fn recover(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILENAME);
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let _lock = LockFile::try_acquire(path, config.file_mode)?.ok_or(CaskError::DatabaseLocked)?;
    let report = caskdb::check_and_recover(path, &config)?;
    tracing::info!(
        checked = report.segments_checked,
        truncated = report.segments_truncated,
        discarded = report.bytes_discarded,
        index_quarantined = report.index_quarantined,
        "recovery finished"
    );
    Ok(())
}

fn json_error(e: serde_json::Error) -> CaskError {
    CaskError::Serialization(e.to_string())
}

fn base64_error(e: base64::DecodeError) -> CaskError {
    CaskError::Serialization(e.to_string())
}
