//! `api-audit`: provision the audit schema and inspect recorded traffic.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use api_audit::{Config, ConnectionManager, LogStore};

#[derive(Parser, Debug)]
#[command(name = "api-audit", version, about = "Inspect the API test audit trail")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "API_AUDIT_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Create the api_test schema and tables in the configured database if missing
    Init,

    /// List recorded requests, newest first
    Requests {
        /// Only requests whose URL contains this text (case-sensitive)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Only requests with this HTTP method (e.g. "GET")
        #[arg(short, long)]
        method: Option<String>,
    },

    /// List recorded responses, newest first
    Responses,

    /// List responses with status >= 400
    Failures,

    /// Show one request with its response
    Show {
        /// Request id
        id: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load()?;
    let manager = Arc::new(ConnectionManager::from_config(&config));

    // A container started here would be gone when the command exits.
    manager.initialize(false).await?;

    let result = run(cli.command, LogStore::new(Arc::clone(&manager))).await;
    manager.close().await;
    result
}

async fn run(command: Command, store: LogStore) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            println!("Audit schema ready");
            Ok(())
        }
        Command::Requests { endpoint, method } => {
            let requests = match (endpoint, method) {
                (Some(endpoint), Some(method)) => store
                    .get_requests_by_endpoint(&endpoint)
                    .await?
                    .into_iter()
                    .filter(|r| r.method.eq_ignore_ascii_case(&method))
                    .collect(),
                (Some(endpoint), None) => store.get_requests_by_endpoint(&endpoint).await?,
                (None, Some(method)) => {
                    store
                        .get_requests_by_method(&method.to_uppercase())
                        .await?
                }
                (None, None) => store.get_all_requests().await?,
            };
            print_json(&requests)
        }
        Command::Responses => print_json(&store.get_all_responses().await?),
        Command::Failures => print_json(&store.get_failed_responses().await?),
        Command::Show { id } => match store.get_request_with_response(id).await? {
            Some(joined) => print_json(&joined),
            None => anyhow::bail!("Request not found: {}", id),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
