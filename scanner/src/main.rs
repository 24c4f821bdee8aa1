// barscan - barcode scanning pipeline
// Command line entry point

use anyhow::{anyhow, Context};
use barscan::app::AppState;
use barscan::services::SettingKey;
use barscan::session::{NoopCamera, ScanSessionController, TerminalFeedback};
use barscan::vision::{AnalysisOutcome, Frame, FrameAnalyzer, QrDecoder};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "barscan")]
#[command(about = "Scan barcodes into a local history")]
#[command(version)]
struct Cli {
    /// Directory holding the database and scan images
    /// (default: the platform data directory + /barscan)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run still images through the scan pipeline
    Scan {
        /// Image files to scan, one scan session each
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Clockwise rotation needed to make the images upright
        #[arg(short, long, default_value = "0")]
        rotation: i32,
    },

    /// Inspect or edit the scan history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Inspect or edit settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List scans, newest first
    List,

    /// Delete one scan and its image
    Delete { id: i64 },

    /// Delete scans older than the retention window
    Purge {
        /// Retention in days (default: the stored setting)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Delete every scan
    Clear,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every setting
    Show,

    /// Change one setting
    Set { key: String, value: String },

    /// Restore every default
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    // RUST_LOG overrides, e.g. RUST_LOG=barscan=trace
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "barscan=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .map(|dir| dir.join("barscan"))
            .ok_or_else(|| anyhow!("No data directory on this platform, pass --data-dir"))?,
    };

    tracing::info!("Starting barscan");

    let state = AppState::initialize(&data_dir)
        .await
        .context("Failed to initialize application")?;

    let result = match cli.command {
        Commands::Scan { images, rotation } => scan(&state, &images, rotation).await,
        Commands::History { action } => history(&state, action).await,
        Commands::Settings { action } => settings(&state, action).await,
    };

    if let Err(e) = state.shutdown().await {
        tracing::warn!("Shutdown incomplete: {}", e);
    }

    result
}

async fn scan(state: &AppState, images: &[PathBuf], rotation: i32) -> anyhow::Result<()> {
    let purged = state.start_history_cleanup().await?;
    if purged > 0 {
        tracing::info!("Removed {} expired scans", purged);
    }

    let controller = state.scan_session(Arc::new(NoopCamera), Arc::new(TerminalFeedback))?;
    let analyzer = FrameAnalyzer::new(Arc::new(QrDecoder::new()), Arc::new(controller.clone()));

    // A scan left over from an interrupted run is not replayed
    state.settings.clear_last_scan().await?;
    controller.start().await;

    for path in images {
        let report = scan_image(&controller, &analyzer, path, rotation).await;
        println!("{}", serde_json::to_string(&report)?);
        controller.reset().await;
    }

    controller.shutdown().await?;
    Ok(())
}

async fn scan_image(
    controller: &ScanSessionController,
    analyzer: &FrameAnalyzer,
    path: &Path,
    rotation: i32,
) -> serde_json::Value {
    let image = match image::open(path) {
        Ok(image) => image.to_rgba8(),
        Err(e) => {
            return json!({ "file": path, "found": false, "error": e.to_string() });
        }
    };

    let frame = Frame::from_rgba(&image, rotation);
    let outcome = analyzer.analyze(frame).await;
    controller.flush().await;

    let error = controller.take_error().map(|e| e.user_message().to_string());

    match outcome {
        AnalysisOutcome::Found(barcode) => json!({
            "file": path,
            "found": true,
            "payload": barcode.payload,
            "format": barcode.format_name(),
            "format_code": barcode.format_code,
            "bounding_box": barcode.bounding_box,
            "error": error,
        }),
        AnalysisOutcome::NotFound(reason) => json!({
            "file": path,
            "found": false,
            "error": reason.or(error),
        }),
    }
}

async fn history(state: &AppState, action: HistoryAction) -> anyhow::Result<()> {
    match action {
        HistoryAction::List => {
            state.scheduler.run_now().await?;
            let entries = state.history.list_all().await?;
            for entry in &entries {
                let preview = state.history.preview_path(entry).await;
                println!(
                    "{}",
                    serde_json::to_string(&json!({
                        "id": entry.id,
                        "date": entry.date,
                        "time": entry.time,
                        "code_type": entry.code_type,
                        "code_value": entry.code_value,
                        "note": entry.note,
                        "image": preview,
                    }))?
                );
            }
        }
        HistoryAction::Delete { id } => {
            if state.history.delete_by_id(id).await? {
                println!("Deleted scan {}", id);
            } else {
                println!("No scan with id {}", id);
            }
        }
        HistoryAction::Purge { days } => {
            let purged = match days {
                Some(days) => state.history.purge_older_than(days).await?,
                None => state.scheduler.run_now().await?,
            };
            println!("Purged {} scans", purged);
        }
        HistoryAction::Clear => {
            state.history.delete_all().await?;
            println!("History cleared");
        }
    }

    Ok(())
}

async fn settings(state: &AppState, action: SettingsAction) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = state.settings.load().await?;
            for key in SettingKey::ALL {
                println!("{} = {}", key, settings.get(key));
            }
        }
        SettingsAction::Set { key, value } => {
            let change = state.settings.set_from_str(&key, &value).await?;
            println!("{} = {}", change.key, change.value);
        }
        SettingsAction::Reset => {
            state.settings.reset_to_defaults().await?;
            println!("Settings reset to defaults");
        }
    }

    Ok(())
}
