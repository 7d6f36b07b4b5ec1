//! target-s3-jsonl
//!
//! Singer target that batches records per stream into JSON Lines objects
//! on S3 (or a local directory standing in for it).
//!
//! ```text
//! tap-foo | target-s3-jsonl --config config.json > state.json
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | info | Log filter |
//! | LOG_FORMAT | text | `json` for structured logs |
//! | AWS_ACCESS_KEY_ID | - | S3 credentials |
//! | AWS_SECRET_ACCESS_KEY | - | S3 credentials |
//! | AWS_REGION | - | S3 region (unless set in config) |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use target_s3_jsonl::observability::{init_tracing, LogFormat};
use target_s3_jsonl::sink::{create_store, SinkConfig};
use target_s3_jsonl::target::{Target, TargetError};
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "target-s3-jsonl", version, about = "Singer target writing JSON Lines batches to S3")]
struct CliArgs {
    /// Configuration file (.json or .toml)
    #[arg(long, short)]
    config: PathBuf,

    /// Read messages from this file instead of stdin
    #[arg(long, short)]
    input: Option<PathBuf>,
}

async fn run(args: CliArgs) -> Result<(), TargetError> {
    let config = SinkConfig::from_file(&args.config)?;
    let store = create_store(&config)?;
    let mut target = Target::new(config, store)?;
    let mut stdout = std::io::stdout().lock();

    let stats = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            target.run(BufReader::new(file), &mut stdout).await?
        }
        None => {
            target
                .run(BufReader::new(tokio::io::stdin()), &mut stdout)
                .await?
        }
    };

    info!(
        records = stats.records,
        batches = stats.batches_flushed,
        states = stats.states_emitted,
        "target finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::from_env());
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "target failed");
            ExitCode::FAILURE
        }
    }
}
