use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use syncwarden::config::EngineConfig;
use syncwarden::integrity::IntegrityScanner;
use syncwarden::queue::{ReplayRegistry, SledOperationLog, SyncOperationQueue};
use syncwarden::retry::RetryExecutor;
use syncwarden::storage::{LogAuditSink, MemoryCache, MemoryStore};
use syncwarden::ReliabilityEngine;

/// Log file writer that rolls `path` to `path.1 .. path.N` once it exceeds `max_size` bytes.
struct RotatingFile {
    path: String,
    max_size: u64,
    max_files: u32,
    file: File,
    current_size: u64,
}

impl RotatingFile {
    fn new(path: String, max_size: u64, max_files: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_size,
            max_files,
            file,
            current_size,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        for i in (1..self.max_files).rev() {
            let _ = std::fs::rename(format!("{}.{}", self.path, i), format!("{}.{}", self.path, i + 1));
        }
        let _ = std::fs::rename(&self.path, format!("{}.1", self.path));

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn init_logging() {
    let default_filter = std::env::var("SYNCWARDEN_LOG").unwrap_or_else(|_| "info".to_string());
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));

    if let Ok(path) = std::env::var("SYNCWARDEN_LOG_FILE") {
        let max_size_mb = std::env::var("SYNCWARDEN_LOG_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        let max_files = std::env::var("SYNCWARDEN_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);

        match RotatingFile::new(path.clone(), max_size_mb * 1024 * 1024, max_files) {
            Ok(rot) => {
                builder.target(env_logger::Target::Pipe(Box::new(rot)));
            }
            Err(e) => eprintln!("Cannot open log file {path}: {e}; logging to stderr"),
        }
    }

    builder.init();
}

#[derive(Parser)]
#[command(name = "syncwarden")]
#[command(about = "Store/cache reconciliation, integrity repair and health monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine and its periodic sweeps until Ctrl-C
    Run {
        /// Directory for the durable sync operation log
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON fixture used to seed the in-memory record store
        #[arg(short, long)]
        fixture: Option<PathBuf>,
    },

    /// Inspect or repair the sync operation log
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },

    /// Run an integrity scan against a JSON fixture and print the report
    Scan {
        #[arg(short, long)]
        fixture: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Apply automatic fixes after scanning
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Print operation counts and active rows as JSON
    Status {
        #[arg(short, long, default_value = "data")]
        data_dir: String,
    },
    /// Return operations abandoned in `processing` to `pending`
    Recover {
        #[arg(short, long, default_value = "data")]
        data_dir: String,
    },
}

fn load_fixture(path: &Path) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(MemoryStore::from_json(serde_json::from_str(&raw)?)?)
}

fn offline_queue(data_dir: &str) -> Result<SyncOperationQueue, Box<dyn std::error::Error>> {
    let config = EngineConfig::load(None)?;
    Ok(SyncOperationQueue::new(
        Arc::new(SledOperationLog::open(data_dir)?),
        Arc::new(MemoryCache::new()),
        Arc::new(LogAuditSink),
        ReplayRegistry::new(),
        config.queue,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            data_dir,
            config,
            fixture,
        } => {
            let mut config = EngineConfig::load(config.as_deref())?;
            config.queue.data_dir = data_dir;

            let store = match fixture {
                Some(path) => load_fixture(&path)?,
                None => MemoryStore::new(),
            };

            info!("Starting syncwarden with operation log in '{}'", config.queue.data_dir);
            let engine = ReliabilityEngine::builder()
                .config(config)
                .store(Arc::new(store))
                .build()
                .await?;

            let initial = engine.verify_system_integration().await;
            if !initial.success {
                error!("Initial verification failed: {:?}", initial.errors);
            }

            engine.start();
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            engine.shutdown().await;
        }
        Command::Queue { cmd } => match cmd {
            QueueCmd::Status { data_dir } => {
                let status = offline_queue(&data_dir)?.get_sync_queue_status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            QueueCmd::Recover { data_dir } => {
                let recovered = offline_queue(&data_dir)?.recover_stale_operations().await?;
                println!("{recovered}");
            }
        },
        Command::Scan {
            fixture,
            config,
            fix,
        } => {
            let config = EngineConfig::load(config.as_deref())?;
            let scanner = IntegrityScanner::new(
                Arc::new(load_fixture(&fixture)?),
                Arc::new(RetryExecutor::new(&config.retry)),
                Arc::new(LogAuditSink),
                config.integrity,
            );
            let mut report = scanner.check_data_integrity().await?;
            if fix {
                report = scanner.auto_fix_integrity_issues(report).await;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
