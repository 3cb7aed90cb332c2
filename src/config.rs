use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::checkpoint::LoadPolicy;
use crate::device::DeviceSelection;
use crate::errors::{PredictorError, Result};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML settings file; `APP_*` environment variables override it.
    #[arg(short, long, global = true, default_value = "configuration/base.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Predict a single image and print the JSON record.
    Predict {
        image: PathBuf,

        /// Also write the overlay as a PNG file.
        #[arg(short, long)]
        overlay: Option<PathBuf>,
    },

    /// Predict every image under a directory.
    Batch {
        input_dir: PathBuf,

        #[arg(default_value = "output")]
        output_dir: PathBuf,
    },

    /// Load both models, run a warm-up pass and print a summary.
    Check,

    /// Write freshly initialized checkpoints for the built-in architectures.
    InitCheckpoints {
        segmentation: PathBuf,
        classification: PathBuf,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSelection,
    /// 順序付き：インデックス `i` が分類器の出力 `i` の名前
    pub class_names: Vec<String>,
    pub segmentation: SegmentationSettings,
    pub classification: ClassificationSettings,
    /// 初期化するパラメータスロットの乱数シード
    #[serde(default)]
    pub init_seed: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentationSettings {
    pub checkpoint: PathBuf,
    #[serde(default = "default_segmentation_classes")]
    pub num_classes: usize,
    #[serde(default = "default_hidden_width")]
    pub hidden_width: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationSettings {
    pub checkpoint: PathBuf,
    #[serde(default = "default_min_match_ratio")]
    pub min_match_ratio: f64,
    #[serde(default = "default_hidden_width")]
    pub hidden_width: usize,
}

fn default_segmentation_classes() -> usize {
    4
}

fn default_hidden_width() -> usize {
    16
}

fn default_min_match_ratio() -> f64 {
    0.5
}

impl ClassificationSettings {
    pub fn load_policy(&self) -> LoadPolicy {
        LoadPolicy::Permissive {
            min_match_ratio: self.min_match_ratio,
        }
    }
}

impl Settings {
    /// モデルを読み込む前に確認できる設定値をすべて検証
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(PredictorError::Configuration { message });

        if self.class_names.is_empty() {
            return invalid("class_names must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.class_names.iter().find(|name| !seen.insert(*name)) {
            return invalid(format!("class name `{}` appears more than once", duplicate));
        }
        if self.segmentation.num_classes == 0 {
            return invalid("segmentation.num_classes must be positive".to_string());
        }
        if self.segmentation.hidden_width == 0 || self.classification.hidden_width == 0 {
            return invalid("hidden_width must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.classification.min_match_ratio) {
            return invalid(format!(
                "classification.min_match_ratio {} is outside [0, 1]",
                self.classification.min_match_ratio
            ));
        }
        for path in [&self.segmentation.checkpoint, &self.classification.checkpoint] {
            if !path.exists() {
                return invalid(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

/// YAML ファイルを読み込み、`APP_` 環境変数で上書きする
/// （例：`APP_DEVICE=cpu`、`APP_CLASSIFICATION__MIN_MATCH_RATIO=0.8`）
pub fn load_settings(path: &Path) -> Result<Settings> {
    let to_error = |e: config::ConfigError| PredictorError::Configuration {
        message: e.to_string(),
    };

    config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .map_err(to_error)?
        .try_deserialize::<Settings>()
        .map_err(to_error)
}
