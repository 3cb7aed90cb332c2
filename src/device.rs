use std::fmt;
use std::str::FromStr;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::Deserialize;

/// Device requested in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum DeviceSelection {
    #[default]
    Auto,
    Cpu,
    Cuda(i32),
}

impl FromStr for DeviceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(id) => id
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| format!("{} is not a valid CUDA device id", id)),
                None => Err(format!(
                    "{} is not a supported device. Use `auto`, `cpu`, `cuda` or `cuda:<id>`.",
                    other
                )),
            },
        }
    }
}

impl TryFrom<String> for DeviceSelection {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Compute device resolved once at startup and fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(i32),
}

impl Device {
    /// Resolves `auto` to the first CUDA device when the CUDA execution
    /// provider is usable, otherwise to the CPU.
    pub fn resolve(selection: DeviceSelection) -> Self {
        match selection {
            DeviceSelection::Cpu => Self::Cpu,
            DeviceSelection::Cuda(id) => Self::Cuda(id),
            DeviceSelection::Auto => {
                let available = CUDAExecutionProvider::default()
                    .is_available()
                    .unwrap_or(false);
                if available {
                    Self::Cuda(0)
                } else {
                    Self::Cpu
                }
            }
        }
    }

    pub const fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}
