use clap::{Parser, Subcommand};
use corpusdb::actions::{self, ActionRequest, DocumentAction};
use corpusdb::{SchemaDefinition, Store};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// CorpusDB CLI — run document actions against a CorpusDB store from the command line
#[derive(Parser)]
#[command(name = "corpusdb", version, about)]
struct Cli {
    /// Path to the database file (default: corpus.db in the current directory)
    #[arg(long, default_value = "corpus.db")]
    db: PathBuf,

    /// Path to the JSON schema definition used by document actions
    #[arg(long)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Put a document (create, or merge-overwrite an existing key)
    Put {
        /// Namespace name
        namespace: String,
        /// Document fields as a JSON object (include "key" to pick the key)
        #[arg(long)]
        data: String,
    },

    /// Get a single document by key
    Get {
        /// Namespace name
        namespace: String,
        /// Document key
        key: String,
    },

    /// Merge partial fields into an existing document
    Merge {
        /// Namespace name
        namespace: String,
        /// Document key
        key: String,
        /// Partial fields as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Delete a document
    Delete {
        /// Namespace name
        namespace: String,
        /// Document key
        key: String,
    },

    /// Find documents by conjunctive field equality
    Find {
        /// Namespace name
        namespace: String,
        /// Predicate fields as a JSON object (omit to scan)
        #[arg(long)]
        data: Option<String>,
        /// Maximum number of documents to return
        #[arg(long)]
        limit: Option<usize>,
        /// Number of documents to skip
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Scan all documents in storage order
    Scan {
        /// Namespace name
        namespace: String,
        /// Maximum number of documents to return
        #[arg(long)]
        limit: Option<usize>,
        /// Number of documents to skip
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Count documents in a namespace
    Count {
        /// Namespace name
        namespace: String,
    },

    /// Check whether a key exists
    Exists {
        /// Namespace name
        namespace: String,
        /// Document key
        key: String,
    },

    /// List all namespaces the store knows about
    Namespaces,

    /// Drop a namespace: its documents and registry entry
    Drop {
        /// Namespace name
        namespace: String,
    },

    /// Stream change events for a namespace as JSON lines
    Watch {
        /// Namespace name
        namespace: String,
        /// Subscriber id (defaults to "cli")
        #[arg(long, default_value = "cli")]
        subscriber: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(&cli.db)?;

    match cli.command {
        Command::Put { namespace, data } => {
            let response = actions::execute(
                &store,
                DocumentAction::Put,
                request(&cli.schema, namespace, Some(&data), None, None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Get { namespace, key } => {
            let response = actions::execute(
                &store,
                DocumentAction::Get,
                request(&cli.schema, namespace, None, Some(key), None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Merge { namespace, key, data } => {
            let response = actions::execute(
                &store,
                DocumentAction::Merge,
                request(&cli.schema, namespace, Some(&data), Some(key), None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Delete { namespace, key } => {
            let response = actions::execute(
                &store,
                DocumentAction::Delete,
                request(&cli.schema, namespace, None, Some(key), None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Find {
            namespace,
            data,
            limit,
            offset,
        } => {
            let response = actions::execute(
                &store,
                DocumentAction::Find,
                request(&cli.schema, namespace, data.as_deref(), None, limit, offset)?,
            )?;
            print_output(&response)?;
        }

        Command::Scan {
            namespace,
            limit,
            offset,
        } => {
            let response = actions::execute(
                &store,
                DocumentAction::Scan,
                request(&cli.schema, namespace, None, None, limit, offset)?,
            )?;
            print_output(&response)?;
        }

        Command::Count { namespace } => {
            let response = actions::execute(
                &store,
                DocumentAction::Count,
                request(&cli.schema, namespace, None, None, None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Exists { namespace, key } => {
            let response = actions::execute(
                &store,
                DocumentAction::Exists,
                request(&cli.schema, namespace, None, Some(key), None, None)?,
            )?;
            print_output(&response)?;
        }

        Command::Namespaces => {
            let names = store.namespaces()?;
            println!("{}", serde_json::to_string_pretty(&names)?);
        }

        Command::Drop { namespace } => {
            store.drop_namespace(&namespace)?;
            println!(
                "{}",
                serde_json::json!({ "ok": true, "dropped": namespace })
            );
        }

        Command::Watch {
            namespace,
            subscriber,
        } => {
            let subscription = store.subscribe(&namespace, &subscriber);
            loop {
                if let Some(event) = subscription.recv_timeout(Duration::from_secs(1)) {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
        }
    }

    Ok(())
}

fn request(
    schema_path: &Option<PathBuf>,
    namespace: String,
    data: Option<&str>,
    key: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<ActionRequest, Box<dyn std::error::Error>> {
    let definition = load_schema(schema_path)?;
    let data = match data {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)?;
            let object: Map<String, Value> = value
                .as_object()
                .ok_or("--data must be a JSON object")?
                .clone();
            Some(object)
        }
        None => None,
    };

    Ok(ActionRequest {
        namespace,
        definition,
        data,
        key,
        limit,
        offset,
    })
}

fn load_schema(path: &Option<PathBuf>) -> Result<SchemaDefinition, Box<dyn std::error::Error>> {
    let path = path
        .as_ref()
        .ok_or("--schema <file> is required for document actions")?;
    let content = std::fs::read_to_string(path)?;
    let definition: SchemaDefinition = serde_json::from_str(&content)?;
    Ok(definition)
}

fn print_output(response: &actions::ActionResponse) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
