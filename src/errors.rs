use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the prediction pipeline.
///
/// Startup failures (`Configuration`, `FileSystem`, `Checkpoint`,
/// `CheckpointIncompatible`, `ClassIndexOutOfRange`) abort initialization.
/// Per-request failures (`UnsupportedImage`, `TensorShapeMismatch`, `Model`,
/// `Encoding`) are turned into an error response at the request boundary and
/// leave the shared models untouched.
#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint error: {reason} (file: {path:?})")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("Checkpoint incompatible with {model}: {reason}")]
    CheckpointIncompatible { model: String, reason: String },

    #[error("Unsupported image: input cannot be decoded as a color raster")]
    UnsupportedImage {
        #[source]
        source: image::ImageError,
    },

    #[error("Tensor shape mismatch in {stage}: expected {expected}, got {actual:?}")]
    TensorShapeMismatch {
        stage: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Class index {index} out of range for a table of {len} class names")]
    ClassIndexOutOfRange { index: usize, len: usize },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Encoding error: {operation} failed")]
    Encoding {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, PredictorError>;

impl PredictorError {
    /// Short machine-readable name used in error responses.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::FileSystem { .. } => "filesystem",
            Self::Checkpoint { .. } => "checkpoint",
            Self::CheckpointIncompatible { .. } => "checkpoint_incompatible",
            Self::UnsupportedImage { .. } => "unsupported_image",
            Self::TensorShapeMismatch { .. } => "tensor_shape_mismatch",
            Self::ClassIndexOutOfRange { .. } => "class_index_out_of_range",
            Self::Model { .. } => "model",
            Self::Encoding { .. } => "encoding",
        }
    }

    /// Whether the caller sent something we cannot process, as opposed to a
    /// defect on our side.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedImage { .. })
    }

    pub(crate) fn shape_mismatch(
        stage: &'static str,
        expected: impl Into<String>,
        actual: &[usize],
    ) -> Self {
        Self::TensorShapeMismatch {
            stage,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path construct `PredictorError::FileSystem`
/// directly; this is the fallback for the ones that don't.
impl From<std::io::Error> for PredictorError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Image crate errors surfacing outside of decoding come from the PNG writer.
impl From<image::ImageError> for PredictorError {
    fn from(err: image::ImageError) -> Self {
        Self::Encoding {
            operation: "image encoding".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for PredictorError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only happen while reshaping model inputs or outputs, so they
/// are reported against the forward pass.
impl From<ndarray::ShapeError> for PredictorError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<safetensors::SafeTensorError> for PredictorError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint {
            path: PathBuf::from("unknown"),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err = PredictorError::ClassIndexOutOfRange { index: 4, len: 4 };
        assert_eq!(err.kind(), "class_index_out_of_range");
        assert!(!err.is_client_error());

        let err = PredictorError::shape_mismatch("classification", "[1, 4]", &[1, 3]);
        assert_eq!(err.kind(), "tensor_shape_mismatch");
        assert_eq!(
            err.to_string(),
            "Tensor shape mismatch in classification: expected [1, 4], got [1, 3]"
        );
    }

    #[test]
    fn test_unsupported_image_is_client_error() {
        let source = image::load_from_memory(b"not an image").unwrap_err();
        let err = PredictorError::UnsupportedImage { source };
        assert!(err.is_client_error());
        assert_eq!(err.kind(), "unsupported_image");
    }
}
