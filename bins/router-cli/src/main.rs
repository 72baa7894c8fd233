use std::time::Duration;

use clap::{Parser, Subcommand};
use router_core::config::CONFIG;
use router_core::credentials::CredentialStore;

#[derive(Parser)]
#[command(name = "router-cli", about = "Administrative CLI for the execution router")]
struct Cli {
    /// Base URL of a running api-server instance.
    #[arg(long, global = true, default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engage the process-wide emergency stop on a running server.
    EmergencyStop,
    /// Resume execution after an emergency stop.
    Resume,
    /// List the account ids configured in ACCOUNTS_JSON without starting a server.
    Accounts,
    /// Check whether a running server is reachable.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::EmergencyStop => admin_post(&cli.server, "/admin/emergency-stop").await?,
        Commands::Resume => admin_post(&cli.server, "/admin/resume").await?,
        Commands::Accounts => print_accounts()?,
        Commands::Health => admin_get(&cli.server, "/healthz").await?,
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn admin_post(server: &str, path: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{}{}", server.trim_end_matches('/'), path);
    let response = client.post(&url).send().await?;

    if response.status().is_success() {
        println!("ok: {path} ({})", response.status());
        Ok(())
    } else {
        anyhow::bail!("{path} failed: {}", response.status());
    }
}

async fn admin_get(server: &str, path: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{}{}", server.trim_end_matches('/'), path);
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        println!("ok: {path} ({})", response.status());
        Ok(())
    } else {
        anyhow::bail!("{path} unhealthy: {}", response.status());
    }
}

fn print_accounts() -> anyhow::Result<()> {
    let accounts_json = CONFIG.require_accounts_json()?;
    let store = CredentialStore::from_json(accounts_json)?;

    for id in store.list_ids() {
        println!("{id}");
    }

    Ok(())
}
