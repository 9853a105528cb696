use anyhow::Context;
use clap::{Parser, ValueEnum};
use pulselog::{
    ConsumePolicy, JsonLinesSink, LogSink, LogStore, MemoryStore, Pipeline, PipelineConfig, RecordSink, RecordStore,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulselog", version, about = "Periodic producer/consumer over a record log")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory (overrides store.path)
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Keep records in memory
    #[arg(long)]
    in_memory: bool,

    /// Run for this many seconds; 0 runs until interrupted
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Where observed records go
    #[arg(long, value_enum, default_value_t = Output::Log)]
    output: Output,

    /// How the consumer detects new records
    #[arg(long)]
    policy: Option<ConsumePolicy>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    /// One tracing event per record
    Log,
    /// One JSON object per line on stdout
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let store: Arc<dyn RecordStore> = if config.store.in_memory {
        Arc::new(MemoryStore::with_max_payload_len(config.store.max_payload_len))
    } else {
        let store = LogStore::open(config.log_store_config())
            .with_context(|| format!("failed to open store at {}", config.store.path.display()))?;
        Arc::new(store)
    };

    let sink: Arc<dyn RecordSink> = match cli.output {
        Output::Log => Arc::new(LogSink),
        Output::Json => Arc::new(JsonLinesSink::new(std::io::stdout())),
    };

    let running = Pipeline::new(config, store, sink)?
        .start()
        .context("failed to start pipeline")?;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let signals_handle = signals.handle();
    let stop = running.stop_handle();
    let signal_thread = thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "interrupted");
            stop.request_stop();
        }
    });

    let reason = running.wait();
    let report = running.shutdown(reason);

    signals_handle.close();
    let _ = signal_thread.join();

    if let (Some(producer), Some(consumer)) = (&report.producer, &report.consumer) {
        tracing::info!(
            appended = producer.appended,
            append_failures = producer.failed,
            rounds = consumer.rounds,
            emitted = consumer.emitted,
            read_failures = consumer.failed,
            "run summary"
        );
    }

    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(path) = &cli.store_path {
        config.store.path = path.clone();
    }
    if cli.in_memory {
        config.store.in_memory = true;
    }
    if let Some(secs) = cli.duration_secs {
        config.run.duration_ms = Some(secs.saturating_mul(1000));
    }
    if let Some(policy) = cli.policy {
        config.consumer.policy = policy;
    }

    config.validate()?;
    Ok(config)
}
