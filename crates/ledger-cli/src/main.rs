use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{validate, Block};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the node's chain
    Chain,
    /// Mine and append a block carrying `data`
    Append {
        #[arg(long)]
        data: String,
    },
    /// Register a peer address with the node
    Register {
        #[arg(long)]
        peer: String,
    },
    /// Remove a peer address from the node
    Remove {
        #[arg(long)]
        peer: String,
    },
    /// List the node's registry
    Peers,
    /// Show the node's health summary
    Health,
    /// Download the chain and check it locally
    Verify,
}

#[derive(Serialize)]
struct AppendBody<'a> {
    data: &'a str,
}

#[derive(Serialize)]
struct NodeBody<'a> {
    node: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = Client::new();

    match cli.cmd {
        Command::Chain => print_response(client.get(format!("{node}/blockchain")).send().await?).await?,
        Command::Append { data } => {
            let res = client
                .post(format!("{node}/addblock"))
                .json(&AppendBody { data: &data })
                .send()
                .await?;
            print_response(res).await?
        }
        Command::Register { peer } => {
            let res = client
                .post(format!("{node}/registerNode"))
                .json(&NodeBody { node: &peer })
                .send()
                .await?;
            print_response(res).await?
        }
        Command::Remove { peer } => {
            let res = client
                .post(format!("{node}/removeNode"))
                .json(&NodeBody { node: &peer })
                .send()
                .await?;
            print_response(res).await?
        }
        Command::Peers => print_response(client.get(format!("{node}/nodes")).send().await?).await?,
        Command::Health => print_response(client.get(format!("{node}/health")).send().await?).await?,
        Command::Verify => verify(&client, node).await?,
    }
    Ok(())
}

async fn print_response(res: Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        bail!("request failed with {status}");
    }
    Ok(())
}

async fn verify(client: &Client, node: &str) -> Result<()> {
    let res = client.get(format!("{node}/blockchain")).send().await?;
    let status = res.status();
    if !status.is_success() {
        bail!("node answered {status}");
    }
    let chain: Vec<Block> = res.json().await.context("decoding chain")?;
    debug!(blocks = chain.len(), "downloaded chain");
    match validate(&chain) {
        Ok(()) => {
            println!("chain of {} blocks is valid", chain.len());
            Ok(())
        }
        Err(e) => bail!("chain is invalid at position {}: {e}", e.position()),
    }
}
