use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use poet_verifier::block::MemoryBlockCache;
use poet_verifier::replay::{self, Report};
use poet_verifier::state::MemoryStateStore;
use poet_verifier::{logging, BlockVerifier, Config, Policy};

#[derive(Parser)]
#[command(author, version, about = "Replay a chain dump through the PoET block verifier", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// JSON chain dump with the state snapshots and blocks to check.
    #[arg(long, value_name = "FILE")]
    chain: PathBuf,
    /// Reject blocks whose wait certificate fails validation.
    #[arg(long)]
    strict: bool,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value_t = String::from("info"))]
    log: String,
}

fn run(cli: Cli) -> Result<Report, Box<dyn Error + Send + Sync>> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.strict {
        config.policy = Policy::Strict;
    }
    config.ensure_directories()?;

    let cache = Arc::new(MemoryBlockCache::default());
    let store = Arc::new(MemoryStateStore::default());
    let blocks = replay::load_chain(&cli.chain, &store)?;
    let verifier = BlockVerifier::new(cache.clone(), store, config);
    Ok(replay::replay(&verifier, &cache, blocks))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log) {
        eprintln!("unable to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(report) => {
            for (block_id, accepted) in &report.decisions {
                println!("{} {}", block_id, if *accepted { "accepted" } else { "rejected" });
            }
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!(error = %e, "poet-verify failed");
            ExitCode::from(2)
        }
    }
}
