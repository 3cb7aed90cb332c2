//! Small reference architectures implementing [`InferenceModel`].
//!
//! Production networks are loaded as opaque ONNX graphs (see [`crate::model`]);
//! these two exist so safetensors checkpoints can be filled strictly or
//! permissively, saved back, and served end to end without an external
//! runtime. Both evaluate on the host with `ndarray`.

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::checkpoint::ParameterMap;
use crate::device::Device;
use crate::errors::{PredictorError, Result};
use crate::traits::{Architecture, InferenceModel};

const INPUT_CHANNELS: usize = 3;

/// Per-pixel two-layer perceptron producing `[N, classes, H, W]` scores.
#[derive(Debug, Clone)]
pub struct PixelSegmenter {
    pub num_classes: usize,
    pub hidden_width: usize,
    pub seed: u64,
}

/// Per-pixel projection, global average pool and a linear head producing
/// `[N, classes]` scores. `fc.*` is the head whose shape follows the class
/// count.
#[derive(Debug, Clone)]
pub struct PooledClassifier {
    pub num_classes: usize,
    pub hidden_width: usize,
    pub seed: u64,
}

/// Dense layer `y = W x + b` applied column-wise.
#[derive(Debug, Clone)]
struct Dense {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    fn take(
        parameters: &mut ParameterMap,
        model: &str,
        prefix: &str,
        out: usize,
        inp: usize,
    ) -> Result<Self> {
        let weight = take_slot(parameters, model, &format!("{}.weight", prefix), &[out, inp])?
            .into_dimensionality::<Ix2>()?;
        let bias = take_slot(parameters, model, &format!("{}.bias", prefix), &[out])?
            .into_dimensionality::<Ix1>()?;
        Ok(Self { weight, bias })
    }

    /// `columns` is `[in, n]`; returns `[out, n]`.
    fn apply(&self, columns: ArrayView2<f32>) -> Array2<f32> {
        self.weight.dot(&columns) + &self.bias.view().insert_axis(Axis(1))
    }
}

fn take_slot(
    parameters: &mut ParameterMap,
    model: &str,
    name: &str,
    shape: &[usize],
) -> Result<ArrayD<f32>> {
    let tensor = parameters
        .remove(name)
        .ok_or_else(|| PredictorError::CheckpointIncompatible {
            model: model.to_string(),
            reason: format!("missing slots [{}]", name),
        })?;
    if tensor.shape() != shape {
        return Err(PredictorError::CheckpointIncompatible {
            model: model.to_string(),
            reason: format!(
                "shape mismatches [{} expected {:?} found {:?}]",
                name,
                shape,
                tensor.shape()
            ),
        });
    }
    Ok(tensor)
}

/// Uniform in `±1/sqrt(fan_in)`, the default for linear layers.
fn init_dense(
    parameters: &mut ParameterMap,
    rng: &mut StdRng,
    prefix: &str,
    out: usize,
    inp: usize,
) {
    let bound = 1.0 / (inp as f32).sqrt();
    let weight = Array::from_shape_fn(IxDyn(&[out, inp]), |_| rng.random_range(-bound..bound));
    let bias = Array::from_shape_fn(IxDyn(&[out]), |_| rng.random_range(-bound..bound));
    parameters.insert(format!("{}.weight", prefix), weight);
    parameters.insert(format!("{}.bias", prefix), bias);
}

fn check_input(stage: &'static str, input: &ArrayView4<f32>) -> Result<()> {
    if input.shape()[1] != INPUT_CHANNELS {
        return Err(PredictorError::shape_mismatch(
            stage,
            "[N, 3, H, W]",
            input.shape(),
        ));
    }
    Ok(())
}

/// Flattens one image of the batch to `[3, H * W]`.
fn pixel_columns(input: &ArrayView4<f32>, n: usize) -> Result<Array2<f32>> {
    let (_, c, h, w) = input.dim();
    let image = input.slice(s![n, .., .., ..]);
    Ok(image.to_shape((c, h * w))?.into_owned())
}

fn relu(mut values: Array2<f32>) -> Array2<f32> {
    values.mapv_inplace(|v| v.max(0.0));
    values
}

impl Architecture for PixelSegmenter {
    type Model = FrozenSegmenter;

    fn name(&self) -> &str {
        "pixel-segmenter"
    }

    fn initial_parameters(&self) -> ParameterMap {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut parameters = ParameterMap::new();
        init_dense(
            &mut parameters,
            &mut rng,
            "encoder",
            self.hidden_width,
            INPUT_CHANNELS,
        );
        init_dense(
            &mut parameters,
            &mut rng,
            "head",
            self.num_classes,
            self.hidden_width,
        );
        parameters
    }

    fn build(&self, mut parameters: ParameterMap, device: Device) -> Result<FrozenSegmenter> {
        let name = self.name();
        let encoder = Dense::take(
            &mut parameters,
            name,
            "encoder",
            self.hidden_width,
            INPUT_CHANNELS,
        )?;
        let head = Dense::take(
            &mut parameters,
            name,
            "head",
            self.num_classes,
            self.hidden_width,
        )?;
        if device.is_accelerator() {
            debug!(device = %device, "pixel-segmenter evaluates on the host");
        }
        Ok(FrozenSegmenter { encoder, head })
    }
}

impl Architecture for PooledClassifier {
    type Model = FrozenClassifier;

    fn name(&self) -> &str {
        "pooled-classifier"
    }

    fn initial_parameters(&self) -> ParameterMap {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut parameters = ParameterMap::new();
        init_dense(
            &mut parameters,
            &mut rng,
            "backbone",
            self.hidden_width,
            INPUT_CHANNELS,
        );
        init_dense(
            &mut parameters,
            &mut rng,
            "fc",
            self.num_classes,
            self.hidden_width,
        );
        parameters
    }

    fn build(&self, mut parameters: ParameterMap, device: Device) -> Result<FrozenClassifier> {
        let name = self.name();
        let backbone = Dense::take(
            &mut parameters,
            name,
            "backbone",
            self.hidden_width,
            INPUT_CHANNELS,
        )?;
        let fc = Dense::take(
            &mut parameters,
            name,
            "fc",
            self.num_classes,
            self.hidden_width,
        )?;
        if device.is_accelerator() {
            debug!(device = %device, "pooled-classifier evaluates on the host");
        }
        Ok(FrozenClassifier { backbone, fc })
    }
}

#[derive(Debug, Clone)]
pub struct FrozenSegmenter {
    encoder: Dense,
    head: Dense,
}

impl InferenceModel for FrozenSegmenter {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        check_input("segmentation forward", &input)?;
        let (batch, _, h, w) = input.dim();
        let classes = self.head.bias.len();
        let mut output = Array4::<f32>::zeros((batch, classes, h, w));

        for n in 0..batch {
            let hidden = relu(self.encoder.apply(pixel_columns(&input, n)?.view()));
            let scores = self.head.apply(hidden.view());
            output
                .slice_mut(s![n, .., .., ..])
                .assign(&scores.to_shape((classes, h, w))?);
        }

        Ok(output.into_dyn())
    }

    fn name(&self) -> &str {
        "pixel-segmenter"
    }
}

#[derive(Debug, Clone)]
pub struct FrozenClassifier {
    backbone: Dense,
    fc: Dense,
}

impl InferenceModel for FrozenClassifier {
    fn forward(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        check_input("classification forward", &input)?;
        let batch = input.dim().0;
        let classes = self.fc.bias.len();
        let mut output = Array2::<f32>::zeros((batch, classes));

        for n in 0..batch {
            let features = relu(self.backbone.apply(pixel_columns(&input, n)?.view()));
            let pooled = features.mean_axis(Axis(1)).ok_or_else(|| {
                PredictorError::shape_mismatch(
                    "classification forward",
                    "non-empty image",
                    input.shape(),
                )
            })?;
            let scores = self.fc.apply(pooled.view().insert_axis(Axis(1)));
            output.row_mut(n).assign(&scores.column(0));
        }

        Ok(output.into_dyn())
    }

    fn name(&self) -> &str {
        "pooled-classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> PixelSegmenter {
        PixelSegmenter {
            num_classes: 4,
            hidden_width: 8,
            seed: 7,
        }
    }

    fn classifier(num_classes: usize) -> PooledClassifier {
        PooledClassifier {
            num_classes,
            hidden_width: 8,
            seed: 11,
        }
    }

    #[test]
    fn test_initialization_is_seeded() {
        assert_eq!(segmenter().initial_parameters(), segmenter().initial_parameters());

        let mut other = segmenter();
        other.seed = 8;
        assert_ne!(segmenter().initial_parameters(), other.initial_parameters());
    }

    #[test]
    fn test_initial_values_within_bound() {
        let parameters = classifier(4).initial_parameters();
        let bound = 1.0 / (8f32).sqrt();
        assert!(parameters["fc.weight"].iter().all(|v| v.abs() <= bound));
        assert_eq!(parameters["fc.weight"].shape(), &[4, 8]);
        assert_eq!(parameters["backbone.weight"].shape(), &[8, 3]);
    }

    #[test]
    fn test_segmenter_output_shape() -> Result<()> {
        let arch = segmenter();
        let model = arch.build(arch.initial_parameters(), Device::Cpu)?;
        let input = Array4::<f32>::from_elem((2, 3, 5, 7), 0.5);

        let output = model.forward(input.view())?;
        assert_eq!(output.shape(), &[2, 4, 5, 7]);
        Ok(())
    }

    #[test]
    fn test_classifier_output_shape() -> Result<()> {
        let arch = classifier(3);
        let model = arch.build(arch.initial_parameters(), Device::Cpu)?;
        let input = Array4::<f32>::from_elem((1, 3, 6, 6), 0.25);

        let output = model.forward(input.view())?;
        assert_eq!(output.shape(), &[1, 3]);
        Ok(())
    }

    #[test]
    fn test_segmenter_matches_hand_computation() -> Result<()> {
        let arch = PixelSegmenter {
            num_classes: 2,
            hidden_width: 1,
            seed: 0,
        };
        let mut parameters = ParameterMap::new();
        parameters.insert("encoder.weight".into(), arr2(&[[1.0f32, 1.0, 1.0]]).into_dyn());
        parameters.insert("encoder.bias".into(), arr1(&[-1.0f32]).into_dyn());
        parameters.insert("head.weight".into(), arr2(&[[2.0f32], [-1.0]]).into_dyn());
        parameters.insert("head.bias".into(), arr1(&[0.0f32, 0.5]).into_dyn());
        let model = arch.build(parameters, Device::Cpu)?;

        let mut input = Array4::<f32>::zeros((1, 3, 1, 2));
        input.slice_mut(s![0, .., 0, 1]).fill(1.0);
        let output = model.forward(input.view())?;

        // pixel (0,0): hidden = relu(-1) = 0; pixel (0,1): hidden = relu(2) = 2
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
        assert_eq!(output[[0, 1, 0, 0]], 0.5);
        assert_eq!(output[[0, 0, 0, 1]], 4.0);
        assert_eq!(output[[0, 1, 0, 1]], -1.5);
        Ok(())
    }

    #[test]
    fn test_build_rejects_wrong_shape() {
        let arch = classifier(4);
        let parameters = classifier(2).initial_parameters();

        let err = arch.build(parameters, Device::Cpu).unwrap_err();
        assert!(matches!(err, PredictorError::CheckpointIncompatible { .. }));
    }

    #[test]
    fn test_forward_rejects_grayscale_input() -> Result<()> {
        let arch = segmenter();
        let model = arch.build(arch.initial_parameters(), Device::Cpu)?;
        let input = Array4::<f32>::zeros((1, 1, 4, 4));

        let err = model.forward(input.view()).unwrap_err();
        assert!(matches!(err, PredictorError::TensorShapeMismatch { .. }));
        Ok(())
    }
}
