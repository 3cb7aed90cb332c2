use std::path::Path;
use std::sync::Arc;

use ndarray::Array4;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::architectures::{PixelSegmenter, PooledClassifier};
use crate::checkpoint::{self, LoadPolicy};
use crate::config::Settings;
use crate::device::Device;
use crate::errors::{PredictorError, Result};
use crate::model::OnnxModel;
use crate::pipeline::{DualModel, Pipeline, PredictionResult};
use crate::preprocess::INPUT_SIZE;
use crate::traits::{Architecture, InferenceModel};

/// Everything a request needs, loaded once at startup and shared read-only.
pub struct AppContext {
    pipeline: Pipeline,
    device: Device,
    summary: ContextSummary,
}

/// What was loaded, as reported by the `check` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub device: String,
    pub class_names: Vec<String>,
    pub segmentation_model: String,
    pub segmentation_output: Vec<usize>,
    pub classification_model: String,
    pub classification_output: Vec<usize>,
}

/// Result of one request as sent back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Success(PredictionResult),
    Failure { error: String, message: String },
}

impl AppContext {
    /// Resolves the device, loads both models and runs the warm-up pass.
    ///
    /// Any error here means the process must not serve requests.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let device = Device::resolve(settings.device);
        info!(device = %device, "compute device selected");

        let segmentation = load_model(
            &PixelSegmenter {
                num_classes: settings.segmentation.num_classes,
                hidden_width: settings.segmentation.hidden_width,
                seed: settings.init_seed,
            },
            &settings.segmentation.checkpoint,
            device,
            LoadPolicy::Strict,
        )?;
        let classification = load_model(
            &PooledClassifier {
                num_classes: settings.class_names.len(),
                hidden_width: settings.classification.hidden_width,
                seed: settings.init_seed.wrapping_add(1),
            },
            &settings.classification.checkpoint,
            device,
            settings.classification.load_policy(),
        )?;

        let models = DualModel::new(
            segmentation,
            classification,
            settings.segmentation.num_classes,
            settings.class_names.len(),
        );
        Self::new(models, settings.class_names.clone(), device)
    }

    /// Wraps already loaded models. Runs one forward pass on a zero tensor so
    /// that a model whose output disagrees with the class table fails here
    /// rather than on the first request.
    pub fn new(models: DualModel, class_names: Vec<String>, device: Device) -> Result<Self> {
        let size = INPUT_SIZE as usize;
        let warm_up_input = Array4::<f32>::zeros((1, 3, size, size));
        let (segmentation, classification) =
            models
                .infer(warm_up_input.view())
                .map_err(|e| PredictorError::Configuration {
                    message: format!("warm-up forward pass failed: {}", e),
                })?;

        let summary = ContextSummary {
            device: device.to_string(),
            class_names: class_names.clone(),
            segmentation_model: models.segmentation_name().to_string(),
            segmentation_output: segmentation.shape().to_vec(),
            classification_model: models.classification_name().to_string(),
            classification_output: classification.shape().to_vec(),
        };
        info!(
            segmentation = %summary.segmentation_model,
            classification = %summary.classification_model,
            classes = class_names.len(),
            "models ready"
        );

        Ok(Self {
            pipeline: Pipeline::new(models, class_names),
            device,
            summary,
        })
    }

    pub const fn device(&self) -> Device {
        self.device
    }

    pub fn class_names(&self) -> &[String] {
        self.pipeline.class_names()
    }

    pub fn summary(&self) -> &ContextSummary {
        &self.summary
    }

    /// Full pipeline on the calling thread.
    pub fn predict(&self, bytes: &[u8]) -> Result<PredictionResult> {
        self.pipeline.predict_bytes(bytes)
    }

    /// Runs [`AppContext::predict`] on the blocking pool so an async caller's
    /// executor thread stays free.
    pub async fn predict_async(self: Arc<Self>, bytes: Vec<u8>) -> Result<PredictionResult> {
        tokio::task::spawn_blocking(move || self.predict(&bytes))
            .await
            .map_err(|e| PredictorError::Model {
                operation: "blocking prediction task".to_string(),
                source: Box::new(e),
            })?
    }

    /// Request boundary: every failure becomes an error record.
    pub fn respond(&self, bytes: &[u8]) -> PredictionResponse {
        match self.predict(bytes) {
            Ok(result) => PredictionResponse::Success(result),
            Err(e) => {
                if e.is_client_error() {
                    warn!(error = %e, "rejected prediction request");
                } else {
                    error!(error = %e, "prediction failed");
                }
                PredictionResponse::Failure {
                    error: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}

/// `.onnx` files are opaque sessions; anything else is a safetensors
/// checkpoint for `architecture`.
fn load_model<A: Architecture>(
    architecture: &A,
    path: &Path,
    device: Device,
    policy: LoadPolicy,
) -> Result<Box<dyn InferenceModel>> {
    let is_onnx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        info!(
            path = %path.display(),
            ?policy,
            "onnx graph carries its own weights; checkpoint policy not applied"
        );
        return Ok(Box::new(OnnxModel::new(path, device)?));
    }

    let (model, _report) = checkpoint::load(architecture, path, device, policy)?;
    Ok(Box::new(model))
}
