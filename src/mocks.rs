use crate::errors::Result;
use crate::traits::InferenceModel;
use ndarray::prelude::*;

/// テスト用のモックモデル：全クラスに同じスコアを返す
#[derive(Debug, Clone)]
pub struct UniformScoreModel {
    classes: usize,
    per_pixel: bool,
}

impl UniformScoreModel {
    /// `[N, classes, H, W]` のゼロテンソルを返す
    pub const fn segmentation(classes: usize) -> Self {
        Self {
            classes,
            per_pixel: true,
        }
    }

    /// `[N, classes]` のゼロテンソルを返す
    pub const fn classification(classes: usize) -> Self {
        Self {
            classes,
            per_pixel: false,
        }
    }
}

impl InferenceModel for UniformScoreModel {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let (batch, _, height, width) = input.dim();
        let output = if self.per_pixel {
            ArrayD::zeros(IxDyn(&[batch, self.classes, height, width]))
        } else {
            ArrayD::zeros(IxDyn(&[batch, self.classes]))
        };
        Ok(output)
    }

    fn name(&self) -> &str {
        "uniform-stub"
    }
}

/// テスト用の分類器：どの画像にも同じスコアを返す
#[derive(Debug, Clone)]
pub struct FixedScoreModel {
    pub scores: Array1<f32>,
}

impl InferenceModel for FixedScoreModel {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let batch = input.dim().0;
        let rows = self
            .scores
            .broadcast((batch, self.scores.len()))
            .map(|view| view.to_owned())
            .unwrap_or_else(|| Array2::zeros((batch, self.scores.len())));
        Ok(rows.into_dyn())
    }

    fn name(&self) -> &str {
        "fixed-stub"
    }
}

/// テスト用：どの段階の出力形状にも一致しないテンソルを返す
#[derive(Debug, Clone)]
pub struct ShapeMismatchModel;

impl InferenceModel for ShapeMismatchModel {
    fn forward(&self, _input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&[1, 1])))
    }

    fn name(&self) -> &str {
        "mismatch-stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_shapes() -> Result<()> {
        let input = Array4::<f32>::zeros((2, 3, 8, 6));

        let segmentation = UniformScoreModel::segmentation(4).forward(input.view())?;
        assert_eq!(segmentation.shape(), &[2, 4, 8, 6]);

        let classification = UniformScoreModel::classification(3).forward(input.view())?;
        assert_eq!(classification.shape(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn test_fixed_scores_repeat_per_image() -> Result<()> {
        let model = FixedScoreModel {
            scores: arr1(&[1.0, 2.0]),
        };
        let output = model.forward(Array4::<f32>::zeros((3, 3, 2, 2)).view())?;
        assert_eq!(output, arr2(&[[1.0f32, 2.0], [1.0, 2.0], [1.0, 2.0]]).into_dyn());
        Ok(())
    }
}
