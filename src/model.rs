use std::path::Path;

use crate::{
    device::Device,
    errors::{PredictorError, Result},
    traits::InferenceModel,
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{
        CUDAExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
    },
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::info;

/// ONNX Runtime で実行するエクスポート済みネットワーク
///
/// 重みはグラフに埋め込まれているため、チェックポイントの読み込みポリシーは適用しない。
/// `Session::run` は排他アクセスが必要なので、同時リクエストはミューテックスで順番待ちになる。
pub struct OnnxModel {
    name: String,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

/// ビルダーとセッションのエラーを同じ形に揃えるため、メッセージのみ保持する
fn model_error<E: std::fmt::Display>(
    operation: impl Into<String>,
) -> impl FnOnce(E) -> PredictorError {
    let operation = operation.into();
    move |e| PredictorError::Model {
        operation,
        source: e.to_string().into(),
    }
}

/// TensorRT、CUDA の順に登録する（利用できないものは ONNX Runtime がスキップし、CPU にフォールバック）
fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cuda(device_id) => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ],
        Device::Cpu => Vec::new(),
    }
}

impl OnnxModel {
    pub fn new(model_path: &Path, device: Device) -> Result<Self> {
        let providers = execution_providers(device);

        let session = SessionBuilder::new()
            .map_err(model_error("セッションビルダー初期化"))?
            .with_execution_providers(providers)
            .map_err(model_error("実行プロバイダー設定"))?
            .with_memory_pattern(true)
            .map_err(model_error("メモリパターン設定"))?
            .commit_from_file(model_path)
            .map_err(model_error(format!(
                "モデルファイル読み込み: {}",
                model_path.display()
            )))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PredictorError::Configuration {
                message: format!("{} declares no inputs", model_path.display()),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PredictorError::Configuration {
                message: format!("{} declares no outputs", model_path.display()),
            })?;

        let name = model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            model = %name,
            device = %device,
            input = %input_name,
            output = %output_name,
            "onnx session ready"
        );

        Ok(Self {
            name,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl InferenceModel for OnnxModel {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&input.as_standard_layout())?
        ])?;
        let scores = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<IxDyn>()?
            .to_owned();
        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
