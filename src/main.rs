use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use pitwall::{
    CaptureConfig, PitwallError,
    registry::{RegistryConfig, SessionRegistry, server},
    status::{now_epoch_s, read_status},
    telemetry::{Collector, producer::MockTelemetryProducer},
};
#[cfg(windows)]
use pitwall::telemetry::producer::IRacingTelemetryProducer;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the simulator, log every lap and push it to the session registry
    Capture {
        /// Session id shared by every driver of the team
        #[arg(short, long)]
        session_id: Option<String>,
        /// Registry append endpoint, e.g. http://host:8000/telemetry
        #[arg(short, long)]
        remote_url: Option<String>,
        #[arg(short, long)]
        log_dir: Option<PathBuf>,
        #[arg(long)]
        tick_ms: Option<u64>,
        #[arg(long)]
        settle_ms: Option<u64>,
        /// Replay recorded samples (JSON Lines) instead of reading the simulator
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Store the resulting settings as the defaults for the next run
        #[arg(long, default_value_t = false)]
        save: bool,
    },
    /// Run the session registry HTTP server
    Registry {
        #[arg(short, long, default_value = "0.0.0.0:8000")]
        bind: String,
        /// Keep at most this many records per session
        #[arg(short, long)]
        max_records: Option<usize>,
    },
    /// Print the connection status written by a running capture
    Status {
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

struct CaptureArgs {
    session_id: Option<String>,
    remote_url: Option<String>,
    log_dir: Option<PathBuf>,
    tick_ms: Option<u64>,
    settle_ms: Option<u64>,
    save: bool,
}

fn capture_config(args: CaptureArgs) -> Result<CaptureConfig, PitwallError> {
    let mut config = match CaptureConfig::from_local_file() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            warn!("Ignoring saved config: {e}");
            CaptureConfig::default()
        }
    };
    if let Some(session_id) = args.session_id {
        config.session_id = session_id;
    }
    if args.remote_url.is_some() {
        config.remote_url = args.remote_url;
    }
    if let Some(log_dir) = args.log_dir {
        config.log_dir = log_dir;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    if let Some(settle_ms) = args.settle_ms {
        config.settle_delay_ms = settle_ms;
    }
    if args.save {
        config.save()?;
        info!("Saved capture settings");
    }
    Ok(config)
}

fn capture(
    args: CaptureArgs,
    replay: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), PitwallError> {
    let config = capture_config(args)?;
    if let Some(replay) = replay {
        let producer = MockTelemetryProducer::from_file(&replay)?;
        info!("Replaying {} samples from {}", producer.remaining(), replay.display());
        Collector::from_config(producer, config)?.run(&shutdown);
        return Ok(());
    }

    #[cfg(windows)]
    {
        let producer = IRacingTelemetryProducer::new()?;
        Collector::from_config(producer, config)?.run(&shutdown);
        Ok(())
    }
    #[cfg(not(windows))]
    {
        let _ = (config, shutdown);
        Err(PitwallError::SourceUnavailable {
            description: "iRacing capture is only available on Windows, use --replay".to_string(),
        })
    }
}

fn registry(
    bind: String,
    max_records: Option<usize>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), PitwallError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| PitwallError::RuntimeError { source: e })?;
    let registry = Arc::new(SessionRegistry::new(RegistryConfig {
        max_records_per_session: max_records,
    }));
    runtime.block_on(async move {
        let listener = server::bind(&bind).await?;
        server::serve(listener, registry, async move {
            let mut poll = tokio::time::interval(Duration::from_millis(100));
            while !shutdown.load(Ordering::Relaxed) {
                poll.tick().await;
            }
        })
        .await
    })
}

fn status(path: Option<PathBuf>) {
    let path = path.unwrap_or_else(|| CaptureConfig::default().status_path());
    let status = read_status(&path, now_epoch_s());
    println!("{} | {} | {}", status.state, status.driver, status.track);
}

fn main() {
    colog::init();

    let cli = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        println!("Exiting...");
    })
    .expect("Could not set Ctrl-C handler");

    let result = match cli.command {
        Commands::Capture {
            session_id,
            remote_url,
            log_dir,
            tick_ms,
            settle_ms,
            replay,
            save,
        } => capture(
            CaptureArgs {
                session_id,
                remote_url,
                log_dir,
                tick_ms,
                settle_ms,
                save,
            },
            replay,
            shutdown,
        ),
        Commands::Registry { bind, max_records } => registry(bind, max_records, shutdown),
        Commands::Status { path } => {
            status(path);
            Ok(())
        }
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
