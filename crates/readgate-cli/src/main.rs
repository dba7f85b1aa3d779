//! readgate CLI: drive a reader concurrency semaphore with a synthetic workload.

use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::LocalSet;
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use readgate_core::prelude::{Resources, SemaphoreConfig};
use readgate_io::{make_tracked_file, MemoryFile};
use readgate_sem::ReaderConcurrencySemaphore;

#[derive(Parser)]
#[command(name = "readgate")]
#[command(about = "Admission control and memory accounting for storage-engine reads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic read workload and print a JSON summary
    Simulate {
        /// Path to a JSON semaphore config (defaults + READGATE_* env otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Concurrent read slots (overrides config)
        #[arg(long)]
        count: Option<i64>,

        /// Memory in bytes (overrides config)
        #[arg(long)]
        memory: Option<i64>,

        /// Wait queue bound (overrides config)
        #[arg(long)]
        max_queue: Option<usize>,

        /// Admission timeout in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Number of reads to start
        #[arg(long, default_value = "64")]
        readers: usize,

        /// Bytes each read asks for and buffers
        #[arg(long, default_value = "65536")]
        read_size: usize,

        /// How long a read holds its buffer, and how long it stays parked (ms)
        #[arg(long, default_value = "5")]
        hold_ms: u64,

        /// Park every n-th read as inactive after its first buffer (0 = never)
        #[arg(long, default_value = "3")]
        inactive_every: usize,
    },

    /// Print the effective configuration as JSON
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Workload {
    readers: usize,
    read_size: usize,
    hold: Duration,
    timeout: Duration,
    inactive_every: usize,
}

#[derive(Debug, Clone, Copy)]
enum ReadOutcome {
    Completed,
    Evicted,
    Overloaded,
    TimedOut,
    Failed,
}

#[derive(Debug, Default, Serialize)]
struct Report {
    semaphore: String,
    readers: usize,
    completed: usize,
    evicted: usize,
    overloaded: usize,
    timed_out: usize,
    failed: usize,
    peak_memory: i64,
    inactive_population: u64,
    permit_based_evictions: u64,
    final_available: Resources,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            count,
            memory,
            max_queue,
            timeout_ms,
            readers,
            read_size,
            hold_ms,
            inactive_every,
        } => {
            let result = load_config(config.as_ref()).and_then(|mut cfg| {
                if let Some(v) = count {
                    cfg.count = v;
                }
                if let Some(v) = memory {
                    cfg.memory_bytes = v;
                }
                if let Some(v) = max_queue {
                    cfg.max_queue_length = v;
                }
                if let Some(v) = timeout_ms {
                    cfg.default_timeout_ms = v;
                }
                cfg.validate()?;
                let workload = Workload {
                    readers,
                    read_size,
                    hold: Duration::from_millis(hold_ms),
                    timeout: cfg.default_timeout(),
                    inactive_every,
                };
                simulate(&cfg, workload)
            });
            match result {
                Ok(report) => print_json(&report),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config { config } => match load_config(config.as_ref()) {
            Ok(cfg) => print_json(&cfg),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SemaphoreConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            let json = fs::read_to_string(p)?;
            Ok(SemaphoreConfig::from_json(&json)?)
        }
        None => Ok(SemaphoreConfig::from_env()),
    }
}

fn simulate(
    cfg: &SemaphoreConfig,
    workload: Workload,
) -> Result<Report, Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = LocalSet::new();
    local.block_on(&rt, run_workload(cfg, workload))
}

async fn run_workload(
    cfg: &SemaphoreConfig,
    workload: Workload,
) -> Result<Report, Box<dyn std::error::Error>> {
    let sem = ReaderConcurrencySemaphore::from_config(cfg);
    let data = MemoryFile::with_contents(vec![0u8; workload.read_size]);
    info!(
        semaphore = sem.name(),
        readers = workload.readers,
        "starting simulated workload"
    );

    let handles: Vec<_> = (0..workload.readers)
        .map(|i| {
            let sem = sem.clone();
            let data = data.clone();
            tokio::task::spawn_local(run_read(i, sem, data, workload))
        })
        .collect();

    let mut report = Report {
        semaphore: sem.name().to_string(),
        readers: workload.readers,
        ..Report::default()
    };
    for handle in handles {
        match handle.await? {
            ReadOutcome::Completed => report.completed += 1,
            ReadOutcome::Evicted => report.evicted += 1,
            ReadOutcome::Overloaded => report.overloaded += 1,
            ReadOutcome::TimedOut => report.timed_out += 1,
            ReadOutcome::Failed => report.failed += 1,
        }
    }

    let stats = sem.inactive_read_stats();
    report.peak_memory = sem.peak_memory();
    report.inactive_population = stats.population;
    report.permit_based_evictions = stats.permit_based_evictions;
    report.final_available = sem.available_resources();
    Ok(report)
}

async fn run_read(
    index: usize,
    sem: ReaderConcurrencySemaphore,
    file: MemoryFile,
    workload: Workload,
) -> ReadOutcome {
    let deadline = Instant::now() + workload.timeout;
    let permit = match sem.wait_admission(workload.read_size, deadline).await {
        Ok(permit) => permit,
        Err(e) if e.is_overload() => return ReadOutcome::Overloaded,
        Err(e) if e.is_timed_out() => return ReadOutcome::TimedOut,
        Err(e) => {
            debug!(read = index, error = %e, "admission failed");
            return ReadOutcome::Failed;
        }
    };

    let tracked = make_tracked_file(file, permit);
    match tracked.read_bulk(0, workload.read_size) {
        Ok(buf) => {
            tokio::time::sleep(workload.hold).await;
            drop(buf);
        }
        Err(e) => {
            debug!(read = index, error = %e, "read failed");
            return ReadOutcome::Failed;
        }
    }

    if workload.inactive_every == 0 || index % workload.inactive_every != 0 {
        return ReadOutcome::Completed;
    }

    // Park the read; whoever evicts it drops the file and with it the permit.
    let evicted = Rc::new(Cell::new(false));
    let flag = Rc::clone(&evicted);
    let handle = sem.register_inactive_read(Box::new(move || {
        flag.set(true);
        drop(tracked);
    }));
    tokio::time::sleep(workload.hold).await;

    match sem.unregister_inactive_read(handle) {
        Some(read) => {
            // Resumed; finishing the read drops it without evicting.
            drop(read);
            ReadOutcome::Completed
        }
        None => {
            debug!(read = index, evicted = evicted.get(), "parked read was evicted");
            ReadOutcome::Evicted
        }
    }
}
