//! kvprobe: test UDP key-value servers listed in a targets file.
//!
//!   kvprobe servers.txt
//!   kvprobe --mode multi --config kvprobe.toml cluster.txt
//!   RUST_LOG=kvprobe=debug kvprobe --mode all --json report.json servers.txt

use anyhow::Context;
use clap::Parser;
use kvprobe_harness::{Config, Driver, Mode};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kvprobe",
    version,
    about = "Conformance, throughput and consistency tests for UDP key-value servers"
)]
struct Args {
    /// File with one host:port target per line
    targets: PathBuf,

    /// Log file the reports are appended to
    #[arg(short, long, env = "KVPROBE_OUTPUT", default_value = "kvprobe.log")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = "KVPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Suites to run
    #[arg(short, long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,

    /// Send SHUTDOWN to every target once its suites are done
    #[arg(long)]
    shutdown: bool,

    /// Per-request reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Key lifecycles started per node in the multi-node suite
    #[arg(long)]
    keys_per_node: Option<usize>,

    /// Wall-clock budget per suite in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Also write all reports as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kvprobe=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config.client.timeout_ms = timeout_ms;
    }
    if let Some(keys) = args.keys_per_node {
        config.multi_node.keys_per_node = keys;
    }
    if args.deadline_secs.is_some() {
        config.suite_deadline_secs = args.deadline_secs;
    }
    config.validate()?;

    let targets = std::fs::read_to_string(&args.targets)
        .with_context(|| format!("failed to read targets from {}", args.targets.display()))?;

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.output)
        .with_context(|| format!("failed to open {}", args.output.display()))?;
    let mut out = BufWriter::new(log);

    tracing::info!(
        "Running {:?} suites from {}, appending to {}",
        args.mode,
        args.targets.display(),
        args.output.display()
    );

    let driver = Driver::new(config, args.mode).with_shutdown(args.shutdown);
    let reports = driver.run(&targets, &mut out).await?;

    for report in &reports {
        println!("{}: {}", report.title(), report.summary());
    }

    if let Some(path) = &args.json {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &reports)?;
        writer.flush()?;
    }

    Ok(())
}
