//! `vigil detect`: run one request and print the result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tempfile::TempDir;
use tracing::{debug, info};
use vigil_serving::{
    DetectionRequest, DetectionService, MediaMode, RequestInput, RequestOptions, ServingConfig,
};

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Kind of media in the input file
    #[arg(long, value_enum)]
    pub mode: ModeArg,

    /// Image or video file to run detection on
    #[arg(short, long)]
    pub input: PathBuf,

    /// Asset id naming the image result (images only)
    #[arg(long)]
    pub asset_id: Option<String>,

    /// Confidence threshold in [0, 1]
    #[arg(long)]
    pub min_score: Option<f32>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Image,
    Video,
}

impl From<ModeArg> for MediaMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Image => Self::Image,
            ModeArg::Video => Self::Video,
        }
    }
}

pub async fn execute(config: ServingConfig, args: DetectArgs) -> Result<()> {
    let options = RequestOptions {
        mode: args.mode.into(),
        asset_id: args.asset_id,
        min_score: args.min_score,
    };

    // The video pipeline consumes its input, so work on a staged copy.
    let mut staging = None;
    let input = match options.mode {
        MediaMode::Image => {
            let bytes = std::fs::read(&args.input)
                .with_context(|| format!("Failed to read {}", args.input.display()))?;
            RequestInput::Bytes(bytes)
        }
        MediaMode::Video => {
            let dir = TempDir::new_in(ensure_dir(&config.results_dir)?)
                .context("Failed to create staging directory")?;
            let staged = stage(&args.input, dir.path())?;
            staging = Some(dir);
            RequestInput::StagedFile(staged)
        }
    };

    let request = DetectionRequest::from_parts(options, Some(input))?;
    let service = DetectionService::new(config)?;
    info!(mode = %request.mode(), input = %args.input.display(), "Running detection");

    let outcome = service.detect(request).await;
    service.shutdown();
    drop(staging);

    let result = outcome.map_err(|e| anyhow::anyhow!("Detection failed (status {}): {e}", e.status()))?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<&Path> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// Copy `input` into `dir`, keeping its file name.
fn stage(input: &Path, dir: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .with_context(|| format!("Input has no file name: {}", input.display()))?;
    let staged = dir.join(name);
    std::fs::copy(input, &staged).with_context(|| format!("Failed to stage {}", input.display()))?;
    debug!(from = %input.display(), to = %staged.display(), "Staged video input");
    Ok(staged)
}
