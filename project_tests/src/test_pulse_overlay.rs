//! Connects to a running `server_pulse` as an overlay would and prints every
//! broadcast, plus a per-type message count when the session ends.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the relay
    #[clap(long, default_value = "ws://127.0.0.1:9003/ws")]
    url: String,

    /// Stop after this many messages (0 = run until the server closes)
    #[clap(short, long, default_value_t = 0)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (mut ws, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    log::info!("Connected to {}", args.url);

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0usize;

    while let Some(message) = ws.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str())?;
        let kind = value["type"].as_str().unwrap_or("unknown").to_string();
        println!("{}", value);

        *counts.entry(kind).or_default() += 1;
        total += 1;
        if args.limit > 0 && total >= args.limit {
            break;
        }
    }

    log::info!("Session ended after {} messages: {:?}", total, counts);
    Ok(())
}
