use crate::checkpoint::ParameterMap;
use crate::device::Device;
use crate::errors::Result;
use ndarray::prelude::*;

/// 推論専用ネットワークの抽象化（テンソル1つを入力し、テンソル1つを返す）
///
/// パイプラインはこのトレイトにのみ依存するため、ONNXモデル・組み込み
/// アーキテクチャ・テスト用スタブを差し替えられる。
/// `forward` は `&self` を取り、リクエスト間で状態を持たず、パラメータも更新しない。
pub trait InferenceModel: Send + Sync {
    /// `[N, 3, H, W]` バッチの順伝播を実行
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>>;

    /// ログやサマリーに表示するモデル名
    fn name(&self) -> &str;
}

impl<M: InferenceModel + ?Sized> InferenceModel for Box<M> {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        (**self).forward(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// チェックポイントからパラメータスロットを埋められるアーキテクチャ
pub trait Architecture {
    type Model: InferenceModel + 'static;

    /// チェックポイント互換性エラーに使う名前
    fn name(&self) -> &str;

    /// 全パラメータスロットと、その初期値
    fn initial_parameters(&self) -> ParameterMap;

    /// 完全なパラメータマップから推論用モデルを構築
    fn build(&self, parameters: ParameterMap, device: Device) -> Result<Self::Model>;
}
