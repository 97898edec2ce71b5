use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plate_stream::export;
use plate_stream::media::{FfmpegSourceConfig, MediaSourceFactory, SourceSpec};
use plate_stream::{create_router, AppState, Config, HistoryClient, SessionConfig, StreamSession};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Time left for the service to answer the last frames of a finished video
const RESPONSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream camera or video frames to a plate recognition service")]
struct Cli {
    /// Config file, extension optional
    #[arg(long, default_value = "config/plate-stream")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a camera until Ctrl-C
    Live {
        /// Capture device
        #[arg(long, default_value = "/dev/video0")]
        device: String,

        /// Write the detection history as CSV on exit
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Stream a video file until it ends or Ctrl-C
    Video {
        path: PathBuf,

        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Run the HTTP control API
    Serve,
    /// Manage the persisted detection history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Delete { id: i64 },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Recognition service: {}", cfg.recognition.endpoint);

    match cli.command {
        Command::Live { device, export } => {
            stream(&cfg, SourceSpec::Camera { device }, export).await
        }
        Command::Video { path, export } => stream(&cfg, SourceSpec::File { path }, export).await,
        Command::Serve => serve(cfg).await,
        Command::History { action } => history(&cfg, action).await,
    }
}

/// Run one session in the foreground
async fn stream(cfg: &Config, spec: SourceSpec, export_path: Option<PathBuf>) -> Result<()> {
    let kind = spec.kind();
    let source = MediaSourceFactory::create(spec, FfmpegSourceConfig::from(&cfg.sampling))?;
    let session = StreamSession::new(SessionConfig::from_config(cfg, kind));

    session.connect().await?;
    session.select_source(source).await;

    if !session.start().await? {
        warn!("Session did not start");
        session.stop().await?;
        return Ok(());
    }

    info!("Streaming, press Ctrl-C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
        _ = session.wait_until_idle() => {
            info!("Sampling finished");
            tokio::time::sleep(RESPONSE_GRACE).await;
        }
    }

    let stats = session.stop().await?;
    info!(
        "Sent {} frames, {} detections ({} duplicates suppressed)",
        stats.frames_sent, stats.detections_count, stats.suppressed_count
    );

    let records = session.history().await;
    for record in &records {
        println!(
            "{}  {}  {}",
            record.display_time,
            record.plate,
            export::confidence_percent(record.confidence)
        );
    }

    if let Some(path) = export_path {
        let path = if path.is_dir() {
            path.join(export::default_file_name(chrono::Local::now()))
        } else {
            path
        };
        export::save_csv(&records, &path)?;
    }

    Ok(())
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let app = create_router(AppState::new(cfg));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP API");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn history(cfg: &Config, action: HistoryAction) -> Result<()> {
    let client = HistoryClient::new(cfg.history.base_url.clone());

    match action {
        HistoryAction::List => {
            for record in client.list().await? {
                println!(
                    "{:>6}  {}  {:<10}  {:<6}  {}",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.plate_number,
                    record.source,
                    export::confidence_percent(record.confidence)
                );
            }
        }
        HistoryAction::Delete { id } => {
            client.delete(id).await?;
            println!("Deleted record {}", id);
        }
        HistoryAction::Clear => {
            let deleted = client.clear().await?;
            println!("Deleted {} records", deleted);
        }
    }

    Ok(())
}
