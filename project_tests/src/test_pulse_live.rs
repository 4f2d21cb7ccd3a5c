//! Live check against the real realtime endpoint: connects with the
//! production stream client and prints samples with running stats.

use anyhow::{bail, Result};
use clap::Parser;
use lib_pulse::configs::{Settings, SettingsStore, DEFAULT_ENDPOINT_TEMPLATE};
use lib_pulse::core::StatsAggregator;
use lib_pulse::ingestors::{StreamClient, StreamConfig, StreamEvent, WsConnector};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Access token for the realtime endpoint
    #[clap(long, env = "PULSOID_TOKEN", hide_env_values = true)]
    token: String,

    /// Endpoint template; {token} is replaced by the access token
    #[clap(long, default_value = DEFAULT_ENDPOINT_TEMPLATE)]
    endpoint: String,

    /// Stop after this many samples
    #[clap(short, long, default_value_t = 10)]
    count: u64,

    /// Give up after this many seconds
    #[clap(short, long, default_value_t = 120)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = Arc::new(SettingsStore::new(Settings {
        access_token: args.token,
        endpoint_template: args.endpoint,
        ..Settings::default()
    }));
    let mut client = StreamClient::new(WsConnector, settings, StreamConfig::default());
    if !client.start() {
        bail!("Stream client refused to start; check the token and endpoint.");
    }

    let mut stats = StatsAggregator::new();
    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);

    while stats.stats().count < args.count {
        tokio::select! {
            _ = &mut deadline => {
                client.stop();
                bail!("Timed out after {} samples.", stats.stats().count);
            }
            event = client.next_event() => match event {
                StreamEvent::Status(state) => println!("status: {:?}", state),
                StreamEvent::Sample(sample) => {
                    let current = stats.update(sample.value);
                    println!("{}", serde_json::to_string(&serde_json::json!({
                        "hr": sample.value,
                        "stats": current,
                    }))?);
                }
            },
        }
    }

    client.stop();
    println!("final: {}", serde_json::to_string_pretty(stats.stats())?);
    Ok(())
}
