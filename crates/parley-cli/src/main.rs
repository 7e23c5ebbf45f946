//! Parley CLI tools: relay simulation, key generation.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_common::config::{ENV_HANDSHAKE_TIMEOUT_MS, ENV_KEY_BITS};
use parley_common::NodeConfig;
use parley_crypto::KeyPair;
use parley_relay::{Address, Peer, Relay, RelayStats};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Parley CLI tools")]
struct Args {
    /// RSA modulus size for generated key pairs
    #[arg(long, global = true, env = ENV_KEY_BITS)]
    key_bits: Option<usize>,

    /// Deadline for acquiring a handshake slot, in milliseconds
    #[arg(long, global = true, env = ENV_HANDSHAKE_TIMEOUT_MS)]
    handshake_timeout_ms: Option<u64>,

    /// Do not keep a relay log of readable payloads
    #[arg(long, global = true)]
    no_traffic_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link two peers to a relay and send messages from one to the other
    Simulate {
        /// Sender address
        #[arg(long, default_value = "1.1.1.1")]
        from: String,

        /// Receiver address
        #[arg(long, default_value = "2.2.2.2")]
        to: String,

        /// Message to send (repeatable)
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,

        /// Give both peers the same RSA key pair
        #[arg(long)]
        shared_key_pair: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate an RSA key pair and print its public half
    Keygen {
        /// Modulus size, overrides --key-bits
        #[arg(short, long)]
        bits: Option<usize>,
    },

    /// Show version information
    Version,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    from: Address,
    to: Address,
    sender_session: Option<String>,
    receiver_session: Option<String>,
    received: Vec<String>,
    traffic_log: Vec<String>,
    stats: RelayStats,
}

impl Args {
    fn config(&self) -> Result<NodeConfig> {
        let mut config = NodeConfig::from_env().context("invalid PARLEY_* environment")?;
        if let Some(bits) = self.key_bits {
            config.key_bits = bits;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if self.no_traffic_log {
            config.record_traffic = false;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn simulate(
    config: &NodeConfig,
    from: Address,
    to: Address,
    messages: &[String],
    shared_key_pair: bool,
) -> Result<SimulationReport> {
    let relay = Relay::from_config(config);

    let sender = Peer::from_config(from.clone(), config)?;
    let receiver = if shared_key_pair {
        let key_pair = sender.key_pair().clone();
        Peer::with_key_pair(to.clone(), key_pair).with_handshake_timeout(config.handshake_timeout())
    } else {
        Peer::from_config(to.clone(), config)?
    };

    let sender = Arc::new(sender);
    let receiver = Arc::new(receiver);
    relay.link(sender.clone()).await;
    relay.link(receiver.clone()).await;

    for message in messages {
        sender
            .send(&relay, &to, message)
            .await
            .with_context(|| format!("sending {message:?} {from} -> {to}"))?;
    }
    info!("Sent {} message(s) {} -> {}", messages.len(), from, to);

    Ok(SimulationReport {
        sender_session: sender.session_key(&to).await.map(|k| k.fingerprint()),
        receiver_session: receiver.session_key(&from).await.map(|k| k.fingerprint()),
        received: receiver.message_log().await,
        traffic_log: relay.traffic_log().await,
        stats: relay.stats(),
        from,
        to,
    })
}

fn print_report(report: &SimulationReport) {
    let none = "-".to_string();
    println!(
        "{} session: {}",
        report.from,
        report.sender_session.as_ref().unwrap_or(&none)
    );
    println!(
        "{} session: {}",
        report.to,
        report.receiver_session.as_ref().unwrap_or(&none)
    );

    println!("Received by {}:", report.to);
    for message in &report.received {
        println!("  {}", message);
    }

    println!("Relay traffic log ({} entries):", report.traffic_log.len());
    for entry in &report.traffic_log {
        println!("  {}", entry);
    }

    println!(
        "Relay stats: {} handshake(s), {} data frame(s), {} bytes",
        report.stats.handshakes_routed, report.stats.data_forwarded, report.stats.bytes_forwarded
    );
}

fn main() -> Result<()> {
    parley_common::init_tracing();

    let args = Args::parse();
    let config = args.config()?;

    match args.command {
        Command::Simulate {
            from,
            to,
            messages,
            shared_key_pair,
            json,
        } => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            let report = rt.block_on(simulate(
                &config,
                Address::from(from),
                Address::from(to),
                &messages,
                shared_key_pair,
            ))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Keygen { bits } => {
            let bits = bits.unwrap_or(config.key_bits);
            println!("Generating {}-bit RSA key pair...", bits);

            let key_pair = KeyPair::generate_with_bits(bits)?;
            let public = key_pair.public_key();

            println!("Fingerprint: {}", public.fingerprint()?);
            print!("{}", public.to_pem()?);
        }
        Command::Version => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
