use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceshape::{config, predict::PredictClient, scan, upload, Detector, ModelBundle};
use log::info;

#[derive(Parser)]
#[command(name = "faceshape")]
#[command(
    version,
    about = "face shape scanner - guided camera capture and single-image upload"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guided three-step camera scan
    Scan,
    /// Validate a single image and send it for classification
    Upload {
        /// Path to the image file
        image: PathBuf,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Scan => scan::run(&cfg),
        Commands::Upload { image } => upload_image(&cfg, &image),
        Commands::Config => open_config(),
    }
}

fn upload_image(cfg: &config::Config, path: &Path) -> Result<()> {
    info!(
        "loading face detection models from {}",
        cfg.model_dir.display()
    );
    let models =
        ModelBundle::load(&cfg.model_dir).context("face detection models failed to load")?;
    let mut detector = Detector::new(models).with_score_threshold(cfg.detector_score_threshold);

    let mut flow = upload::UploadFlow::new();
    let attempt = flow.select(path);
    let outcome = upload::validate_image(&mut detector, path);
    flow.apply(attempt, &outcome);
    outcome?;

    let selected = flow
        .selected()
        .context("no validated image selected")?
        .to_path_buf();

    info!("face found, submitting {}", selected.display());

    let bytes = std::fs::read(&selected)
        .with_context(|| format!("reading image {}", selected.display()))?;
    let filename = selected
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.jpg");

    let client = PredictClient::new(cfg.api_url.clone());
    let prediction = client.predict(bytes, filename, upload::guess_mime(&selected), None)?;

    info!(
        "face shape: {} ({:.1}% confidence)",
        prediction.shape,
        prediction.confidence_percent()
    );
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
