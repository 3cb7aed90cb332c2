//! 脳MRI画像の腫瘍分類とセグメンテーションオーバーレイ
//!
//! RGB画像1枚から、クラス名・信頼度・Base64 PNG のヒートマップオーバーレイを返す。
//! 2つのモデルは起動時に一度だけ読み込み、全リクエストで読み取り専用に共有する。

pub mod architectures;
pub mod batch;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod context;
pub mod device;
pub mod errors;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod preprocess;
pub mod traits;

pub mod mocks;

pub use batch::{BatchRunner, BatchSummary};
pub use checkpoint::{LoadPolicy, MergeReport, ParameterMap};
pub use config::{load_settings, Settings};
pub use context::{AppContext, ContextSummary, PredictionResponse};
pub use device::{Device, DeviceSelection};
pub use errors::{PredictorError, Result};
pub use model::OnnxModel;
pub use pipeline::{DualModel, Pipeline, PredictionResult};
pub use traits::*;
