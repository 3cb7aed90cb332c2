use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::errors::{PredictorError, Result};

/// One line of `predictions.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub image: String,
    pub overlay: String,
    pub classification: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Name of the index file written next to the overlays.
pub const INDEX_FILE: &str = "predictions.jsonl";

/// Runs every image under `input_dir` through the shared context.
///
/// Overlays mirror the input tree under `output_dir`, each named after its
/// source file with `.png` appended.
/// Undecodable files are skipped with a warning; any other failure stops the
/// batch.
pub struct BatchRunner<'a> {
    context: &'a AppContext,
    input_dir: PathBuf,
    output_dir: PathBuf,
    show_progress: bool,
}

impl<'a> BatchRunner<'a> {
    pub fn new(context: &'a AppContext, input_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            context,
            input_dir,
            output_dir,
            show_progress: true,
        }
    }

    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn process_directory(&self) -> Result<BatchSummary> {
        let input_path = &self.input_dir;
        let output_path = &self.output_dir;

        if !input_path.is_dir() {
            return Err(PredictorError::FileSystem {
                path: input_path.clone(),
                operation: "ディレクトリ存在確認".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "入力ディレクトリが存在しません",
                ),
            });
        }

        fs::create_dir_all(output_path).map_err(|e| PredictorError::FileSystem {
            path: output_path.clone(),
            operation: "出力ディレクトリ作成".to_string(),
            source: e,
        })?;

        let image_files = collect_image_files(input_path);
        if image_files.is_empty() {
            info!(input = %input_path.display(), "no images to process");
            return Ok(BatchSummary::default());
        }

        let progress_bar = if self.show_progress {
            ProgressBar::new(image_files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .map_err(|e| PredictorError::Configuration {
                message: format!("progress bar template: {}", e),
            })?
            .progress_chars("#>-"),
        );

        let outcomes = image_files
            .par_iter()
            .progress_with(progress_bar.clone())
            .map(|input_file| (input_file, self.process_single_image(input_file)))
            .collect::<Vec<_>>();
        progress_bar.finish();

        let mut summary = BatchSummary::default();
        let mut records = Vec::with_capacity(outcomes.len());
        for (input_file, outcome) in outcomes {
            match outcome {
                Ok(record) => {
                    summary.processed += 1;
                    records.push(record);
                }
                Err(e) if e.is_client_error() => {
                    warn!(path = %input_file.display(), error = %e, "skipping image");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.write_index(&records)?;
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            output = %output_path.display(),
            "batch complete"
        );
        Ok(summary)
    }

    fn process_single_image(&self, input_file: &Path) -> Result<BatchRecord> {
        let bytes = fs::read(input_file).map_err(|e| PredictorError::FileSystem {
            path: input_file.to_path_buf(),
            operation: "画像読み込み".to_string(),
            source: e,
        })?;
        let result = self.context.predict(&bytes)?;

        let relative_path = self.get_relative_path(input_file)?;
        let output_file = self.overlay_path(&relative_path);
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| PredictorError::FileSystem {
                path: parent.to_path_buf(),
                operation: "出力ディレクトリ作成".to_string(),
                source: e,
            })?;
        }

        let png = general_purpose::STANDARD
            .decode(&result.segmentation)
            .map_err(|e| PredictorError::Encoding {
                operation: "オーバーレイのBase64デコード".to_string(),
                source: Box::new(e),
            })?;
        fs::write(&output_file, png).map_err(|e| PredictorError::FileSystem {
            path: output_file.clone(),
            operation: "画像保存".to_string(),
            source: e,
        })?;

        Ok(BatchRecord {
            image: relative_path.display().to_string(),
            overlay: output_file
                .strip_prefix(&self.output_dir)
                .unwrap_or(&output_file)
                .display()
                .to_string(),
            classification: result.classification,
            confidence: result.confidence,
        })
    }

    fn write_index(&self, records: &[BatchRecord]) -> Result<()> {
        let index_path = self.output_dir.join(INDEX_FILE);
        let io_error = |e: std::io::Error| PredictorError::FileSystem {
            path: index_path.clone(),
            operation: "インデックス書き込み".to_string(),
            source: e,
        };

        let mut file = fs::File::create(&index_path).map_err(io_error)?;
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| PredictorError::Encoding {
                operation: "インデックスレコード変換".to_string(),
                source: Box::new(e),
            })?;
            writeln!(file, "{}", line).map_err(io_error)?;
        }
        Ok(())
    }

    /// `scan.jpg` becomes `scan.jpg.png`, so `scan.jpg` and `scan.png` never
    /// share an overlay.
    pub fn overlay_path(&self, relative_path: &Path) -> PathBuf {
        let mut file_name = relative_path.as_os_str().to_owned();
        file_name.push(".png");
        self.output_dir.join(file_name)
    }

    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        input_file
            .strip_prefix(&self.input_dir)
            .map(|p| p.to_path_buf())
            .map_err(|_| PredictorError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "相対パス取得".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "入力ファイルが入力ディレクトリ内にありません",
                ),
            })
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "tif"
        )
    } else {
        false
    }
}

/// Sorted so the index lists images in a stable order.
fn collect_image_files(input_path: &Path) -> Vec<PathBuf> {
    let mut image_files = WalkDir::new(input_path)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|path| path.is_file() && is_supported_image_format(path))
        .collect::<Vec<_>>();
    image_files.sort();
    image_files
}
