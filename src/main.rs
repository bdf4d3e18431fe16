mod keys;
mod probe;

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use keys::KeyReader;
use probe::{ProbeConfig, ProbeOutcome};

/// Usernames probed when none are given on the command line.
const DEFAULT_USERS: [&str; 5] = ["root", "devops", "debian", "ubuntu", "admin"];

#[derive(Parser, Debug)]
#[command(author, version, about = "Test which public keys an ssh server would accept")]
struct Args {
    /// Hostname or IP for the ssh server
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Ssh port
    #[arg(short, long, value_name = "PORT", default_value_t = 22)]
    port: u16,

    /// File containing public keys to attempt, one per line
    #[arg(short, long, value_name = "KEY_FILE")]
    keyfile: PathBuf,

    /// Username to attempt, repeatable
    #[arg(short, long = "user", value_name = "USER", default_values_t = DEFAULT_USERS.map(String::from))]
    users: Vec<String>,

    /// Attempt timeout in milliseconds, bounding the connection phase and
    /// each authentication exchange
    #[arg(long, value_name = "MILLIS", default_value_t = 1000)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let result = tokio::select! {
        result = run(args) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, aborting scan");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Probes every key in the file for every username, one fresh connection
/// per pair, reporting each outcome as it is produced.
///
/// Per-attempt failures are logged and skipped; only the key file itself
/// can end the run early.
async fn run(args: Args) -> anyhow::Result<()> {
    let addr = resolve(&args.host, args.port).await?;
    let file = File::open(&args.keyfile)
        .with_context(|| format!("opening key file {}", args.keyfile.display()))?;
    let config = ProbeConfig {
        timeout: Duration::from_millis(args.timeout),
    };

    for entry in KeyReader::new(BufReader::new(file)) {
        let key = entry.context("scanning key file")?;
        debug!(algorithm = key.algorithm(), encoded = %key.encoded(), "loaded candidate key");
        for user in &args.users {
            info!(%addr, user = %user, key = %key, "testing");
            match probe::probe_one(addr, user, &key, &config).await {
                ProbeOutcome::WouldAccept => {
                    info!(%addr, user = %user, key = %key, "server would accept this key")
                }
                ProbeOutcome::Rejected => {
                    info!(%addr, user = %user, key = %key, "key rejected")
                }
                ProbeOutcome::ConnectFailed(err) => {
                    warn!(%addr, user = %user, key = %key, error = %err, "connection failed")
                }
            }
        }
    }
    Ok(())
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("no address found for {host}:{port}"))
}
