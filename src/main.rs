//! mpt CLI - Command line interface for mpt_db
//!
//! Each invocation is a separate process and the file store keeps no notion
//! of a current root. Mutating commands print the new root digest; later
//! commands pass it back with `--root`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mpt_db::{verify_proof, Digest, FileStore, MerkleTrie, SeekDirection};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mpt")]
#[command(about = "An authenticated key-value index on a merkle patricia trie")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "trie.mpt")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Root digest to open, in hex (defaults to the empty trie)
    #[arg(short, long)]
    root: Option<String>,

    /// Read and print keys and values as hex instead of UTF-8
    #[arg(long)]
    hex: bool,

    /// Leave mutations uncommitted (the printed root is not persisted)
    #[arg(long)]
    no_commit: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database file
    Init,

    /// Insert or replace a value (an empty value deletes the key)
    Put {
        key: String,
        value: String,
    },

    /// Get a value by key
    Get {
        key: String,
    },

    /// Delete a key
    Delete {
        key: String,
    },

    /// List every pair whose key starts with a prefix
    Find {
        /// Key prefix (empty lists everything)
        #[arg(default_value = "")]
        prefix: String,
        /// Maximum number of pairs to return
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List pairs in key order starting at a key
    Seek {
        key: String,
        /// Walk towards smaller keys
        #[arg(short, long)]
        backward: bool,
        /// Maximum number of pairs to return
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the root digest and store size
    Root,

    /// Produce an inclusion proof for a key
    Proof {
        key: String,
    },

    /// Print the root node as JSON
    Dump,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout is reserved for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let root = parse_root(cli.root.as_deref())?;

    match &cli.command {
        Commands::Init => {
            let store = FileStore::open_or_create(&cli.database)?;
            store.sync()?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "message": format!("Database ready at {}", cli.database.display()),
                    "root": Digest::ZERO.to_hex()
                }),
            );
        }

        Commands::Put { key, value } => {
            let store = open_store(&cli.database)?;
            let mut trie = MerkleTrie::from_root(&store, root);
            let changed = trie.put(&decode(key, cli.hex)?, &decode(value, cli.hex)?)?;
            finish_mutation(&cli, &store, &trie, changed)?;
        }

        Commands::Delete { key } => {
            let store = open_store(&cli.database)?;
            let mut trie = MerkleTrie::from_root(&store, root);
            let changed = trie.delete(&decode(key, cli.hex)?)?;
            finish_mutation(&cli, &store, &trie, changed)?;
        }

        Commands::Get { key } => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            match trie.get(&decode(key, cli.hex)?)? {
                Some(value) => output(
                    cli.format,
                    &json!({
                        "key": key,
                        "value": encode(&value, cli.hex)
                    }),
                ),
                None => {
                    output(
                        cli.format,
                        &json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    );
                    std::process::exit(1);
                }
            }
        }

        Commands::Find { prefix, limit } => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            let pairs = trie
                .find(&decode(prefix, cli.hex)?)?
                .take(limit.unwrap_or(usize::MAX))
                .collect::<mpt_db::Result<Vec<_>>>()?;
            output(cli.format, &pairs_json(&pairs, cli.hex));
        }

        Commands::Seek {
            key,
            backward,
            limit,
        } => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            let direction = if *backward {
                SeekDirection::Backward
            } else {
                SeekDirection::Forward
            };
            let pairs = trie
                .seek(&decode(key, cli.hex)?, direction)
                .take(limit.unwrap_or(usize::MAX))
                .collect::<mpt_db::Result<Vec<_>>>()?;
            output(cli.format, &pairs_json(&pairs, cli.hex));
        }

        Commands::Root => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            output(
                cli.format,
                &json!({
                    "database": cli.database.display().to_string(),
                    "root": trie.root_hash().to_hex(),
                    "empty": trie.root_hash().is_zero(),
                    "stored_nodes": store.len()
                }),
            );
        }

        Commands::Proof { key } => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            let key_bytes = decode(key, cli.hex)?;
            match trie.get_proof(&key_bytes)? {
                Some(proof) => {
                    let value = verify_proof(root, &key_bytes, &proof)?;
                    output(
                        cli.format,
                        &json!({
                            "root": root.to_hex(),
                            "key": key,
                            "value": value.map(|v| encode(&v, cli.hex)),
                            "nodes": proof.iter().map(hex::encode).collect::<Vec<_>>()
                        }),
                    );
                }
                None => {
                    output(
                        cli.format,
                        &json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    );
                    std::process::exit(1);
                }
            }
        }

        Commands::Dump => {
            let store = open_store(&cli.database)?;
            let trie = MerkleTrie::from_root(&store, root);
            let node = if root.is_zero() {
                Value::Null
            } else {
                trie.resolve(&root)?.to_json()
            };
            output(
                cli.format,
                &json!({
                    "root": root.to_hex(),
                    "node": node
                }),
            );
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> anyhow::Result<FileStore> {
    FileStore::open_or_create(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

fn parse_root(root: Option<&str>) -> anyhow::Result<Digest> {
    match root {
        None | Some("") => Ok(Digest::ZERO),
        Some(text) => {
            let digest = Digest::from_hex(text)
                .map_err(|e| mpt_db::Error::InvalidHash(format!("{}: {}", text, e)))?;
            Ok(digest)
        }
    }
}

/// Commit unless told otherwise, then report the new root
fn finish_mutation(
    cli: &Cli,
    store: &FileStore,
    trie: &MerkleTrie<&FileStore>,
    changed: bool,
) -> anyhow::Result<()> {
    let committed = if cli.no_commit {
        false
    } else {
        trie.commit()?;
        store.sync()?;
        true
    };
    output(
        cli.format,
        &json!({
            "status": "ok",
            "changed": changed,
            "committed": committed,
            "root": trie.root_hash().to_hex()
        }),
    );
    Ok(())
}

fn decode(input: &str, hex: bool) -> anyhow::Result<Vec<u8>> {
    if hex {
        hex::decode(input).with_context(|| format!("Invalid hex input: {}", input))
    } else {
        Ok(input.as_bytes().to_vec())
    }
}

fn encode(bytes: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn pairs_json(pairs: &[(Vec<u8>, Vec<u8>)], hex: bool) -> Value {
    let items: Vec<_> = pairs
        .iter()
        .map(|(k, v)| {
            json!({
                "key": encode(k, hex),
                "value": encode(v, hex)
            })
        })
        .collect();
    json!({
        "count": items.len(),
        "pairs": items
    })
}

fn output(format: OutputFormat, value: &Value) {
    let text = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Text => serde_json::to_string_pretty(value),
    };
    match text {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
