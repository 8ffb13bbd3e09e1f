use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use transfer_engine::config::{AppConfig, CliConfig, FileConfig};
use transfer_engine::storage::SqliteKvStore;
use transfer_engine::transfer::{
    HttpTransport, RegistryEvent, SystemClock, TransferKey, TransferKind, TransferParams,
    TransferRecord, TransferRequest, TransferResource, TransferStatus, Transport,
};
use transfer_engine::TransferEngine;

mod cli_style;
use cli_style::{colors, TableBuilder};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_kind(s: &str) -> Result<TransferKind, String> {
    TransferKind::from_str(s).ok_or_else(|| format!("unknown kind '{}', expected model or tool", s))
}

#[derive(Parser, Debug)]
#[command(name = "transfer-console", version, about = "Download models and tool packages", styles = cli_style::get_styles())]
struct CliArgs {
    /// Path to the SQLite database holding paused transfers.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Base URL of the model server.
    #[clap(long, global = true)]
    pub server_url: Option<String>,

    /// Timeout in seconds for tool package installs.
    #[clap(long, global = true, default_value_t = 120)]
    pub request_timeout_sec: u64,

    /// Path to a TOML config file. Its values override CLI arguments.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// "model" or "tool".
    #[clap(value_parser = parse_kind)]
    pub kind: TransferKind,

    /// Resource id, e.g. "qwen2:7b".
    pub id: String,

    /// Display name, defaults to the id.
    #[clap(long)]
    pub name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or resume a transfer and follow it until it settles.
    Download {
        #[command(flatten)]
        target: TargetArgs,

        #[clap(long)]
        service: Option<String>,

        #[clap(long)]
        provider: Option<String>,

        #[clap(long)]
        source: Option<String>,
    },
    /// Ask the server to abort a transfer.
    Cancel {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show transfers paused by an earlier run.
    List,
}

impl CliArgs {
    fn app_config(&self) -> Result<AppConfig> {
        let file_config = match &self.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };
        let cli = CliConfig {
            db_path: self.db_path.clone(),
            server_url: self.server_url.clone(),
            request_timeout_sec: self.request_timeout_sec,
        };
        AppConfig::resolve(&cli, file_config)
    }
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
    {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(e) = run(cli_args).await {
        cli_style::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli_args: CliArgs) -> Result<()> {
    let config = cli_args.app_config()?;
    match cli_args.command {
        Command::Download {
            target,
            service,
            provider,
            source,
        } => {
            let params = TransferParams {
                service_name: service,
                service_source: source,
                provider_name: provider,
            };
            download(&config, target, params).await
        }
        Command::Cancel { target } => cancel(&config, target).await,
        Command::List => list(&config),
    }
}

async fn download(config: &AppConfig, target: TargetArgs, params: TransferParams) -> Result<()> {
    let engine = TransferEngine::from_config(config)?;
    let report = engine.init()?;
    if report.restored > 0 {
        info!("{} paused transfer(s) restored", report.restored);
    }

    let key = TransferKey::new(target.kind, target.id.clone());
    let mut events = engine.registry().subscribe();
    let started = match engine.registry().get(&key) {
        Some(record) if record.status == TransferStatus::Paused => {
            engine.orchestrator().resume(key.kind, &key.id)
        }
        _ => {
            let name = target.name.unwrap_or_else(|| target.id.clone());
            engine
                .orchestrator()
                .start(TransferResource::new(key.kind, key.id.clone(), name).with_params(params))
        }
    };
    let record = match started {
        Ok(record) => record,
        Err(e) => {
            engine.shutdown().await?;
            bail!(e);
        }
    };

    let bar = cli_style::transfer_bar(&key.id);
    bar.set_position(record.percentage() as u64);
    bar.set_message(record.status_label());

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, pausing {}", key);
                break None;
            }
        };
        let record = match event {
            Ok(RegistryEvent::Upserted(record)) if record.key() == key => record,
            Ok(RegistryEvent::Removed(removed)) if removed == key => {
                break engine.registry().get(&key);
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => match engine.registry().get(&key) {
                Some(record) => record,
                None => break None,
            },
            Err(RecvError::Closed) => break engine.registry().get(&key),
        };

        bar.set_position(record.percentage() as u64);
        bar.set_message(record.status_label());
        if !record.status.is_active() {
            break Some(record);
        }
    };

    bar.finish_and_clear();
    let snapshotted = engine.shutdown().await?;
    report_outcome(&key, outcome, snapshotted)
}

fn report_outcome(key: &TransferKey, outcome: Option<TransferRecord>, snapshotted: usize) -> Result<()> {
    match outcome {
        Some(record) if record.status == TransferStatus::Completed => {
            cli_style::print_success(&format!("{} {}", key, record.status_label()));
            Ok(())
        }
        Some(record) if record.status == TransferStatus::Failed => {
            bail!(
                "{} {}: {}",
                key,
                record.status_label(),
                record.error.unwrap_or_default()
            )
        }
        Some(record) => {
            cli_style::print_warning(&format!(
                "{} {} at {}%",
                key,
                record.status_label(),
                record.percentage()
            ));
            Ok(())
        }
        None if snapshotted > 0 => {
            cli_style::print_warning(&format!(
                "{} paused, run download again to resume",
                key
            ));
            Ok(())
        }
        None => bail!("{} is no longer tracked", key),
    }
}

async fn cancel(config: &AppConfig, target: TargetArgs) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(
        config.server_url.clone(),
        config.request_timeout(),
    )?);
    let store = SqliteKvStore::new(&config.db_path)?;
    let engine = TransferEngine::new(
        Arc::new(SystemClock),
        transport.clone(),
        Arc::new(store),
        &config.transfers,
        &config.reconciler,
    );
    engine.init()?;

    let cancelled = engine.orchestrator().cancel(target.kind, &target.id).await;
    let result = match cancelled {
        Some(record) => {
            cli_style::print_success(&format!("{} {}", record.key(), record.status_label()));
            Ok(())
        }
        None => {
            // Not paused locally, the stream may belong to another process.
            let name = target.name.unwrap_or_else(|| target.id.clone());
            let request = TransferRequest::from(&TransferResource::new(
                target.kind,
                target.id.clone(),
                name,
            ));
            transport
                .abort(&request)
                .await
                .with_context(|| format!("Failed to abort {}:{}", target.kind, target.id))
                .map(|()| {
                    cli_style::print_success(&format!("Abort sent for {}:{}", target.kind, target.id))
                })
        }
    };
    engine.shutdown().await?;
    result
}

fn list(config: &AppConfig) -> Result<()> {
    let engine = TransferEngine::from_config(config)?;

    let mut table = TableBuilder::new(vec!["KIND", "ID", "STATUS", "PROGRESS", "UPDATED"]);
    let mut rows = 0;
    for kind in TransferKind::ALL {
        for record in engine.lifecycle().stored_records(kind)? {
            let updated = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(record.updated_at)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            table.add_row(vec![
                (kind.to_string(), colors::DIM),
                (record.id.clone(), colors::WHITE),
                (
                    record.status_label().to_string(),
                    cli_style::status_color(record.status),
                ),
                (format!("{}%", record.percentage()), colors::WHITE),
                (updated, colors::DIM),
            ]);
            rows += 1;
        }
    }

    if rows == 0 {
        cli_style::print_empty_list("No paused transfers");
    } else {
        table.print();
    }
    Ok(())
}
