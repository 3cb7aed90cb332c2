use ndarray::Array4;
use std::fs;
use tempfile::TempDir;

use tumor_lens::architectures::{PixelSegmenter, PooledClassifier};
use tumor_lens::checkpoint::{self, read_checkpoint, write_checkpoint, LoadPolicy};
use tumor_lens::config::{ClassificationSettings, SegmentationSettings, Settings};
use tumor_lens::{AppContext, Architecture, Device, DeviceSelection, InferenceModel};
use tumor_lens::{PredictorError, Result};

fn segmenter(hidden_width: usize) -> PixelSegmenter {
    PixelSegmenter {
        num_classes: 4,
        hidden_width,
        seed: 3,
    }
}

fn classifier(num_classes: usize, seed: u64) -> PooledClassifier {
    PooledClassifier {
        num_classes,
        hidden_width: 8,
        seed,
    }
}

fn sample_batch() -> Array4<f32> {
    Array4::from_shape_fn((1, 3, 6, 5), |(_, c, y, x)| {
        (c as f32 * 0.3 + y as f32 * 0.1 - x as f32 * 0.05).sin()
    })
}

#[test]
fn test_strict_reload_reproduces_forward_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("seg.safetensors");
    let architecture = segmenter(8);
    let parameters = architecture.initial_parameters();
    write_checkpoint(&path, &parameters)?;

    let original = architecture.build(parameters, Device::Cpu)?;
    let (reloaded, report) = checkpoint::load(&architecture, &path, Device::Cpu, LoadPolicy::Strict)?;

    assert!(report.is_exact());
    assert_eq!(
        original.forward(sample_batch().view())?,
        reloaded.forward(sample_batch().view())?
    );
    Ok(())
}

#[test]
fn test_strict_load_rejects_other_hidden_width() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("seg.safetensors");
    write_checkpoint(&path, &segmenter(8).initial_parameters())?;

    let err = checkpoint::load(&segmenter(16), &path, Device::Cpu, LoadPolicy::Strict).unwrap_err();
    match err {
        PredictorError::CheckpointIncompatible { model, reason } => {
            assert_eq!(model, "pixel-segmenter");
            assert!(reason.contains("encoder.weight"));
        }
        other => panic!("Expected CheckpointIncompatible, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_permissive_load_keeps_fresh_head() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cls.safetensors");

    // 別シードのインスタンスから backbone のみを保存
    let mut saved = classifier(4, 99).initial_parameters();
    saved.retain(|name, _| name.starts_with("backbone."));
    write_checkpoint(&path, &saved)?;

    let architecture = classifier(4, 5);
    let (loaded, report) = checkpoint::load(
        &architecture,
        &path,
        Device::Cpu,
        LoadPolicy::Permissive {
            min_match_ratio: 0.5,
        },
    )?;
    assert_eq!(report.applied, vec!["backbone.bias", "backbone.weight"]);
    assert_eq!(report.skipped_missing, vec!["fc.bias", "fc.weight"]);

    let mut expected = architecture.initial_parameters();
    expected.extend(saved);
    let expected = architecture.build(expected, Device::Cpu)?;
    assert_eq!(
        loaded.forward(sample_batch().view())?,
        expected.forward(sample_batch().view())?
    );
    Ok(())
}

#[test]
fn test_permissive_load_skips_resized_head() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cls.safetensors");
    write_checkpoint(&path, &classifier(3, 1).initial_parameters())?;

    let (loaded, report) = checkpoint::load(
        &classifier(4, 1),
        &path,
        Device::Cpu,
        LoadPolicy::Permissive {
            min_match_ratio: 0.5,
        },
    )?;

    assert_eq!(report.skipped_shape_mismatch.len(), 2);
    assert_eq!(loaded.forward(sample_batch().view())?.shape(), &[1, 4]);
    Ok(())
}

#[test]
fn test_permissive_load_enforces_minimum_ratio() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cls.safetensors");
    write_checkpoint(&path, &classifier(3, 1).initial_parameters())?;

    let err = checkpoint::load(
        &classifier(4, 1),
        &path,
        Device::Cpu,
        LoadPolicy::Permissive {
            min_match_ratio: 0.75,
        },
    )
    .unwrap_err();
    assert!(matches!(err, PredictorError::CheckpointIncompatible { .. }));
    Ok(())
}

#[test]
fn test_written_checkpoint_reads_back() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("seg.safetensors");
    let parameters = segmenter(8).initial_parameters();
    write_checkpoint(&path, &parameters)?;

    assert_eq!(read_checkpoint(&path)?, parameters);
    Ok(())
}

#[test]
fn test_startup_fails_on_strict_mismatch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let seg = temp_dir.path().join("seg.safetensors");
    let cls = temp_dir.path().join("cls.safetensors");
    write_checkpoint(&seg, &segmenter(8).initial_parameters())?;
    write_checkpoint(&cls, &classifier(2, 1).initial_parameters())?;

    let settings = Settings {
        device: DeviceSelection::Cpu,
        class_names: vec!["a".to_string(), "b".to_string()],
        segmentation: SegmentationSettings {
            checkpoint: seg,
            num_classes: 4,
            hidden_width: 16,
        },
        classification: ClassificationSettings {
            checkpoint: cls,
            min_match_ratio: 0.5,
            hidden_width: 8,
        },
        init_seed: 0,
    };

    let err = AppContext::from_settings(&settings)
        .err()
        .expect("startup must fail");
    assert!(matches!(err, PredictorError::CheckpointIncompatible { .. }));
    Ok(())
}

#[test]
fn test_garbage_checkpoint_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.safetensors");
    fs::write(&path, b"definitely not safetensors")?;

    let err = checkpoint::load(&segmenter(8), &path, Device::Cpu, LoadPolicy::Strict).unwrap_err();
    assert!(matches!(err, PredictorError::Checkpoint { .. }));
    Ok(())
}
