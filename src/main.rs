/*
    Procurement records are agreed on by a fixed set of replicas running a
    three-phase Byzantine fault tolerant protocol. The primary of the current
    view signs and pre-prepares a record, every backup answers with a signed
    prepare, and once 2f prepares are in hand each replica broadcasts a
    signed commit. 2f + 1 matching commits finalize the record: it enters the
    ledger with its quorum certificate and every committing replica stores it.

    Committed records can later be gathered into a report carrying a Harn
    identity-based multi-signature from the replicas that hold them, sealed
    for the Procurement Officer.
*/

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use num_bigint::BigUint;
use serde::Serialize;
use tracing::info;

use procurement_bft::common::keygen;
use procurement_bft::ledger::JsonFileStore;
use procurement_bft::{ClusterConfig, ConsensusCluster, SharedCluster};

/// Command line arguments for the procurement consensus driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cluster configuration; the built-in four replica deployment when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one record file per replica
    #[arg(short, long, global = true, default_value = "database")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commit a record, seal and open a verified report for its item, then
    /// run the item name through the node's identity cipher
    Demo {
        #[arg(long, default_value = "A")]
        node: String,
        #[arg(long, default_value = "A:widget:10:5")]
        record: String,
    },
    /// Print thresholds, replica state, public keys and stored record counts
    Status,
    /// Print a cluster configuration with freshly generated keys
    Keygen {
        #[arg(long, default_value_t = 4)]
        replicas: usize,
        #[arg(long, default_value_t = 150)]
        prime_bits: u64,
        #[arg(long, default_value_t = 65_537)]
        exponent: u64,
    },
}

fn print_json<T: Serialize>(label: &str, value: &T) -> Result<()> {
    println!("{label}:\n{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ClusterConfig> {
    match path {
        Some(path) => ClusterConfig::load(path)
            .with_context(|| format!("loading cluster configuration {}", path.display())),
        None => Ok(ClusterConfig::default()),
    }
}

async fn demo(cluster: SharedCluster, node: &str, record: &str) -> Result<()> {
    let outcome = cluster.submit_record(node, record).await?;
    print_json("submission", &outcome)?;

    let item = record
        .split(':')
        .nth(1)
        .context("record has no item field")?;
    print_json("query", &cluster.query_item(node, Some(item)).await?)?;

    let verified = cluster.verify_query(item).await?;
    print_json("verified query", &verified)?;

    let ciphertext = verified.encrypted_response.ciphertext.to_string();
    print_json("officer view", &cluster.decrypt_envelope(&ciphertext).await?)?;

    let sealed = cluster.identity_encrypt(node, item).await?;
    println!("identity ciphertext for {node}: {sealed}");
    print_json(
        "identity decryption",
        &cluster.identity_decrypt(node, &sealed.to_string()).await?,
    )?;
    print_json("system status", &cluster.system_status().await)
}

async fn status(cluster: SharedCluster) -> Result<()> {
    print_json("system status", &cluster.system_status().await)?;
    print_json("node info", &cluster.node_info().await)?;

    let names: Vec<String> = cluster.lock().await.peers().names().map(str::to_string).collect();
    for name in names {
        let stored = cluster.query_item(&name, None).await?;
        println!("{name}: {} stored record(s)", stored.count);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Command::Keygen {
        replicas,
        prime_bits,
        exponent,
    } = args.command
    {
        let config = keygen::generate_config(
            replicas,
            prime_bits,
            &BigUint::from(exponent),
            &mut rand::thread_rng(),
        )?;
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let config = load_config(args.config.as_ref())?;
    let store = JsonFileStore::new(&args.data_dir);
    info!("Using record store at {}", store.dir().display());
    let cluster = SharedCluster::new(ConsensusCluster::from_config(&config, store)?);

    match args.command {
        Command::Demo { node, record } => demo(cluster, &node, &record).await,
        Command::Status => status(cluster).await,
        Command::Keygen { .. } => Ok(()),
    }
}
