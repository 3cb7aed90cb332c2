use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tumor_lens::architectures::{PixelSegmenter, PooledClassifier};
use tumor_lens::checkpoint::write_checkpoint;
use tumor_lens::config::{load_settings, Cli, Command, Settings};
use tumor_lens::{AppContext, Architecture, BatchRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ort=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_level(true)
                .with_thread_names(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.config)
        .with_context(|| format!("Failed to load settings: {}", cli.config.display()))?;

    match cli.command {
        Command::Predict { image, overlay } => {
            let bytes = fs::read(&image)
                .with_context(|| format!("Failed to read image: {}", image.display()))?;
            let context = Arc::new(AppContext::from_settings(&settings)?);
            let result = context.predict_async(bytes).await?;

            if let Some(overlay) = overlay {
                let png = general_purpose::STANDARD
                    .decode(&result.segmentation)
                    .context("Overlay is not valid base64")?;
                fs::write(&overlay, png)
                    .with_context(|| format!("Failed to save overlay: {}", overlay.display()))?;
            }
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Batch {
            input_dir,
            output_dir,
        } => {
            let context = AppContext::from_settings(&settings)?;
            let summary = tokio::task::spawn_blocking(move || {
                BatchRunner::new(&context, input_dir, output_dir).process_directory()
            })
            .await??;
            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                "done"
            );
        }
        Command::Check => {
            let context = AppContext::from_settings(&settings)?;
            println!("{}", serde_json::to_string_pretty(context.summary())?);
        }
        Command::InitCheckpoints {
            segmentation,
            classification,
        } => init_checkpoints(&settings, &segmentation, &classification)?,
    }

    Ok(())
}

/// Writes fresh parameters shaped by the settings. Nothing is validated
/// because the checkpoints this produces are usually what makes the settings
/// valid.
fn init_checkpoints(settings: &Settings, segmentation: &Path, classification: &Path) -> Result<()> {
    let segmenter = PixelSegmenter {
        num_classes: settings.segmentation.num_classes,
        hidden_width: settings.segmentation.hidden_width,
        seed: settings.init_seed,
    };
    let classifier = PooledClassifier {
        num_classes: settings.class_names.len(),
        hidden_width: settings.classification.hidden_width,
        seed: settings.init_seed.wrapping_add(1),
    };

    write_checkpoint(segmentation, &segmenter.initial_parameters())?;
    write_checkpoint(classification, &classifier.initial_parameters())?;
    info!(
        segmentation = %segmentation.display(),
        classification = %classification.display(),
        "checkpoints written"
    );
    Ok(())
}
