use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use chanrelay::client::{ChannelRef, MockTransport, Transport};
use chanrelay::config::{Config, SessionConfig};
use chanrelay::driver::{spawn_log_subscriber, RunRequest, WorkflowDriver};
use chanrelay::report::RunMode;
use chanrelay::session::{SessionPool, TransportFactory};
use chanrelay::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "chanrelay")]
#[command(author, version, about = "Bulk media retrieval and redistribution for channel services")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", default_value = "chanrelay.yaml")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,

    /// Workflow mode
    #[arg(long, value_enum, default_value_t = Mode::Download)]
    mode: Mode,

    /// Source channel reference
    #[arg(long)]
    source: Option<String>,

    /// First message id of the range (inclusive)
    #[arg(long)]
    start: Option<i64>,

    /// Last message id of the range (inclusive)
    #[arg(long)]
    end: Option<i64>,

    /// Destination channels (forward mode only)
    #[arg(long = "targets", num_args = 1..)]
    targets: Vec<String>,

    /// Caption template override
    #[arg(long)]
    template: Option<String>,

    /// Send-batch size bound (1..=10)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Keep scratch of successfully distributed units
    #[arg(long)]
    no_cleanup_success: bool,

    /// Reclaim scratch of failed units too
    #[arg(long)]
    cleanup_failure: bool,

    /// Merge scratch units into full batches instead of preserving the
    /// source structure
    #[arg(long)]
    merge_batches: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Download,
    Forward,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Download => RunMode::Download,
            Mode::Forward => RunMode::Forward,
        }
    }
}

/// In-tree transport backend.
///
/// The production MTProto-like client library binds behind
/// [`TransportFactory`] out of tree; this factory serves the in-memory
/// backend used for rehearsal runs and tests.
struct MockFactory;

impl TransportFactory for MockFactory {
    fn artifact_exists(&self, config: &SessionConfig) -> bool {
        config.auth_file.exists()
    }

    fn create(&self, config: &SessionConfig) -> Arc<dyn Transport> {
        Arc::new(MockTransport::new(&config.name))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let mut config = Config::load(&args.config)?;

    init_tracing(&config.telemetry)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting chanrelay"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    // CLI overrides on the forward surface.
    if let Some(template) = &args.template {
        config.forward.template = template.clone();
    }
    if let Some(batch_size) = args.batch_size {
        anyhow::ensure!((1..=10).contains(&batch_size), "batch size must be in 1..=10");
        config.forward.batch_size = batch_size;
    }
    if args.no_cleanup_success {
        config.forward.cleanup_on_success = false;
    }
    if args.cleanup_failure {
        config.forward.cleanup_on_failure = true;
    }
    if args.merge_batches {
        config.forward.preserve_structure = false;
    }

    let request = RunRequest {
        mode: args.mode.into(),
        source: ChannelRef::new(args.source.ok_or_else(|| anyhow::anyhow!("--source is required"))?),
        start_id: args.start.ok_or_else(|| anyhow::anyhow!("--start is required"))?,
        end_id: args.end.ok_or_else(|| anyhow::anyhow!("--end is required"))?,
        targets: args.targets.iter().map(|t| ChannelRef::new(t.clone())).collect(),
        strategy: config.distribution.strategy,
    };

    let config = Arc::new(config);
    let pool = Arc::new(SessionPool::new(config.sessions.clone(), Box::new(MockFactory)));

    if let Err(e) = pool.start_enabled().await {
        eprintln!("fatal: {e}");
        std::process::exit(2);
    }

    let driver = WorkflowDriver::new(config.clone(), pool.clone());
    let _log_task = spawn_log_subscriber(driver.events());

    // Ctrl-C triggers cooperative cancellation; workers drain and
    // emergency cleanup runs where scratch exists.
    let cancel = driver.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let exit_code = match driver.run(request).await {
        Ok(report) => {
            println!("{}", report.summary());
            for (first_id, kind, message) in report.failed_units() {
                println!("  failed unit {first_id}: [{}] {message}", kind.name());
            }
            for scratch in &report.unreclaimed_scratch {
                println!(
                    "  retained scratch: session={} message_id={}",
                    scratch.session, scratch.message_id
                );
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            2
        }
    };

    pool.stop_all().await;
    std::process::exit(exit_code);
}
