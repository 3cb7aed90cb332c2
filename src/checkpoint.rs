use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tracing::{info, warn};

use crate::device::Device;
use crate::errors::{PredictorError, Result};
use crate::traits::Architecture;

/// Parameter-slot name to weight tensor, ordered by name.
pub type ParameterMap = BTreeMap<String, ArrayD<f32>>;

/// How strictly a checkpoint has to match the target architecture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadPolicy {
    /// Every slot present with an identical shape, and nothing else.
    Strict,
    /// Apply matching slots, keep fresh values for the rest. Fails only when
    /// the applied share of slots drops below `min_match_ratio`.
    Permissive { min_match_ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeConflict {
    pub name: String,
    pub expected: Vec<usize>,
    pub found: Vec<usize>,
}

/// Outcome of merging a checkpoint into an architecture's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: Vec<String>,
    pub skipped_missing: Vec<String>,
    pub skipped_shape_mismatch: Vec<ShapeConflict>,
    /// Checkpoint keys the architecture does not declare.
    pub unexpected: Vec<String>,
}

impl MergeReport {
    pub fn total_slots(&self) -> usize {
        self.applied.len() + self.retained()
    }

    /// Slots that kept their freshly initialized value.
    pub fn retained(&self) -> usize {
        self.skipped_missing.len() + self.skipped_shape_mismatch.len()
    }

    pub fn match_ratio(&self) -> f64 {
        match self.total_slots() {
            0 => 1.0,
            total => self.applied.len() as f64 / total as f64,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.retained() == 0 && self.unexpected.is_empty()
    }

    fn describe_conflicts(&self) -> String {
        let mut parts = Vec::new();
        if !self.skipped_missing.is_empty() {
            parts.push(format!("missing slots [{}]", self.skipped_missing.join(", ")));
        }
        if !self.skipped_shape_mismatch.is_empty() {
            let conflicts = self
                .skipped_shape_mismatch
                .iter()
                .map(|c| format!("{} expected {:?} found {:?}", c.name, c.expected, c.found))
                .collect::<Vec<_>>();
            parts.push(format!("shape mismatches [{}]", conflicts.join(", ")));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("unexpected keys [{}]", self.unexpected.join(", ")));
        }
        parts.join("; ")
    }
}

/// Overlays `saved` onto `defaults`, slot by slot.
///
/// A saved tensor replaces a default only when the key exists in both and the
/// shapes are identical. The returned mapping always has exactly the keys of
/// `defaults`.
pub fn merge_parameters(
    defaults: ParameterMap,
    mut saved: ParameterMap,
) -> (ParameterMap, MergeReport) {
    let mut report = MergeReport::default();
    let mut merged = ParameterMap::new();

    for (name, default) in defaults {
        let value = match saved.remove(&name) {
            Some(candidate) if candidate.shape() == default.shape() => {
                report.applied.push(name.clone());
                candidate
            }
            Some(candidate) => {
                report.skipped_shape_mismatch.push(ShapeConflict {
                    name: name.clone(),
                    expected: default.shape().to_vec(),
                    found: candidate.shape().to_vec(),
                });
                default
            }
            None => {
                report.skipped_missing.push(name.clone());
                default
            }
        };
        merged.insert(name, value);
    }

    report.unexpected = saved.into_keys().collect();
    (merged, report)
}

/// Reads a safetensors checkpoint. Only f32 tensors are accepted.
pub fn read_checkpoint(path: &Path) -> Result<ParameterMap> {
    let bytes = fs::read(path).map_err(|e| PredictorError::FileSystem {
        path: path.to_path_buf(),
        operation: "checkpoint read".to_string(),
        source: e,
    })?;
    let checkpoint_error = |reason: String| PredictorError::Checkpoint {
        path: path.to_path_buf(),
        reason,
    };

    let tensors =
        SafeTensors::deserialize(&bytes).map_err(|e| checkpoint_error(e.to_string()))?;

    let mut parameters = ParameterMap::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(checkpoint_error(format!(
                "slot `{}` has dtype {:?}, only F32 is supported",
                name,
                view.dtype()
            )));
        }
        let values = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();
        let tensor = ArrayD::from_shape_vec(IxDyn(view.shape()), values)
            .map_err(|e| checkpoint_error(format!("slot `{}`: {}", name, e)))?;
        parameters.insert(name, tensor);
    }

    Ok(parameters)
}

/// Writes a parameter mapping as a safetensors checkpoint.
pub fn write_checkpoint(path: &Path, parameters: &ParameterMap) -> Result<()> {
    let buffers = parameters
        .iter()
        .map(|(name, tensor)| {
            let data = tensor
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            (name.as_str(), tensor.shape().to_vec(), data)
        })
        .collect::<Vec<_>>();

    let views = buffers
        .iter()
        .map(|(name, shape, data)| -> Result<(&str, TensorView<'_>)> {
            Ok((*name, TensorView::new(Dtype::F32, shape.clone(), data)?))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize_to_file(views, &None, path).map_err(|e| PredictorError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Loads a checkpoint into a fresh instance of `architecture`.
pub fn load<A: Architecture>(
    architecture: &A,
    path: &Path,
    device: Device,
    policy: LoadPolicy,
) -> Result<(A::Model, MergeReport)> {
    let saved = read_checkpoint(path)?;
    let (merged, report) = merge_parameters(architecture.initial_parameters(), saved);
    check_policy(architecture.name(), &report, policy)?;

    info!(
        model = architecture.name(),
        path = %path.display(),
        device = %device,
        applied = report.applied.len(),
        retained = report.retained(),
        unexpected = report.unexpected.len(),
        "checkpoint loaded"
    );

    let model = architecture.build(merged, device)?;
    Ok((model, report))
}

fn check_policy(model: &str, report: &MergeReport, policy: LoadPolicy) -> Result<()> {
    match policy {
        LoadPolicy::Strict if !report.is_exact() => Err(PredictorError::CheckpointIncompatible {
            model: model.to_string(),
            reason: report.describe_conflicts(),
        }),
        LoadPolicy::Strict => Ok(()),
        LoadPolicy::Permissive { min_match_ratio } => {
            if report.match_ratio() < min_match_ratio {
                return Err(PredictorError::CheckpointIncompatible {
                    model: model.to_string(),
                    reason: format!(
                        "only {} of {} slots matched (ratio {:.2} below minimum {:.2}); {}",
                        report.applied.len(),
                        report.total_slots(),
                        report.match_ratio(),
                        min_match_ratio,
                        report.describe_conflicts()
                    ),
                });
            }
            if report.retained() > 0 {
                warn!(
                    model,
                    retained = report.retained(),
                    conflicts = %report.describe_conflicts(),
                    "checkpoint slots kept their initial values"
                );
            }
            Ok(())
        }
    }
}
