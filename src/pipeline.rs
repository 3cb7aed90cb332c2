use std::time::Instant;

use image::RgbImage;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify;
use crate::errors::{PredictorError, Result};
use crate::overlay;
use crate::preprocess::{self, INPUT_SIZE};
use crate::traits::InferenceModel;

/// 1件の予測結果（テキスト応答用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub classification: String,
    /// `[0, 100]` のパーセント値（小数点以下2桁）
    pub confidence: f64,
    /// Base64 エンコードした 224x224 RGB の PNG
    pub segmentation: String,
}

/// 同じ入力テンソルを共有する2つの推論モデル
pub struct DualModel {
    segmentation: Box<dyn InferenceModel>,
    classification: Box<dyn InferenceModel>,
    segmentation_classes: usize,
    classification_classes: usize,
}

impl DualModel {
    pub fn new(
        segmentation: Box<dyn InferenceModel>,
        classification: Box<dyn InferenceModel>,
        segmentation_classes: usize,
        classification_classes: usize,
    ) -> Self {
        Self {
            segmentation,
            classification,
            segmentation_classes,
            classification_classes,
        }
    }

    pub fn segmentation_name(&self) -> &str {
        self.segmentation.name()
    }

    pub fn classification_name(&self) -> &str {
        self.classification.name()
    }

    /// 2つのモデルを順番に実行し、出力形状を検証
    ///
    /// `[1, C_seg, 224, 224]` と `[1, C_cls]` の生スコアを返す
    pub fn infer(&self, tensor: ArrayView4<f32>) -> Result<(Array4<f32>, Array2<f32>)> {
        let size = INPUT_SIZE as usize;
        if tensor.shape() != [1, 3, size, size] {
            return Err(PredictorError::shape_mismatch(
                "inference input",
                format!("[1, 3, {}, {}]", size, size),
                tensor.shape(),
            ));
        }

        let segmentation_expected = [1, self.segmentation_classes, size, size];
        let segmentation = self.segmentation.forward(tensor)?;
        if segmentation.shape() != segmentation_expected {
            return Err(PredictorError::shape_mismatch(
                "segmentation output",
                format!("{:?}", segmentation_expected),
                segmentation.shape(),
            ));
        }

        let classification_expected = [1, self.classification_classes];
        let classification = self.classification.forward(tensor)?;
        if classification.shape() != classification_expected {
            return Err(PredictorError::shape_mismatch(
                "classification output",
                format!("{:?}", classification_expected),
                classification.shape(),
            ));
        }

        Ok((
            segmentation.into_dimensionality::<Ix4>()?,
            classification.into_dimensionality::<Ix2>()?,
        ))
    }
}

/// 前処理・2モデル推論・両デコーダーをまとめたパイプライン
pub struct Pipeline {
    models: DualModel,
    class_names: Vec<String>,
}

impl Pipeline {
    pub fn new(models: DualModel, class_names: Vec<String>) -> Self {
        Self {
            models,
            class_names,
        }
    }

    pub fn models(&self) -> &DualModel {
        &self.models
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn predict_image(&self, image: &RgbImage) -> Result<PredictionResult> {
        let started = Instant::now();
        let tensor = preprocess::prepare(image);
        let (segmentation_scores, classification_scores) = self.models.infer(tensor.view())?;
        let inferred = started.elapsed();

        let (classification, confidence) =
            classify::decode(classification_scores.view(), &self.class_names)?;
        let segmentation = overlay::compose(segmentation_scores.view(), image)?;

        debug!(
            classification = %classification,
            confidence,
            inference_ms = inferred.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "prediction complete"
        );

        Ok(PredictionResult {
            classification,
            confidence,
            segmentation,
        })
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let image = preprocess::decode_image(bytes)?;
        self.predict_image(&image)
    }
}
