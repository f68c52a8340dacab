// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod codec;
pub mod device;
pub mod engine;
pub mod io_map;
pub mod link;
pub mod pattern;
pub mod shaper;

pub use device::{Device, DeviceError, DeviceKind, DeviceResult};
pub use engine::{FifoEngine, PatternEngine, RegisterEngine, RunOptions};
pub use io_map::IoMap;
pub use pattern::{Direction, Pattern, PatternId};
pub use shaper::{shape, CaptureResult, ShapeSpec};

/// Phase of a run in which a device call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Load,
    Trigger,
    Drain,
    Poll,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Load => "load",
            Stage::Trigger => "trigger",
            Stage::Drain => "drain",
            Stage::Poll => "idle poll",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),
    #[error(
        "Channel '{channel}' on '{resource}' mixes to-device and from-device signals, \
         but family '{family}' drives whole channels in one direction"
    )]
    PortDirectionConflict {
        resource: String,
        channel: String,
        family: String,
    },
    #[error(
        "Batch spans {} devices ({}); cross-device triggering is not supported",
        .0.len(),
        .0.join(", ")
    )]
    UnsupportedConcurrentHardware(Vec<String>),
    #[error("Transport failure on '{resource}' during {stage}: {source}")]
    TransportFailure {
        resource: String,
        stage: Stage,
        #[source]
        source: DeviceError,
    },
    #[error("'{resource}' still busy after {attempts} status polls")]
    IdlePollUnbounded { resource: String, attempts: u32 },
    #[error("Captured {actual} samples, expected {expected}")]
    CaptureLengthMismatch { expected: usize, actual: usize },
    #[error("Cannot decimate {len} samples by time scale {time_scale}")]
    UndecimatableCapture { len: usize, time_scale: u32 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn transport(resource: &str, stage: Stage, source: DeviceError) -> Self {
        EngineError::TransportFailure {
            resource: resource.to_string(),
            stage,
            source,
        }
    }

    /// Validation errors are raised before any device write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigurationMismatch(_)
                | EngineError::PortDirectionConflict { .. }
                | EngineError::UnsupportedConcurrentHardware(_)
                | EngineError::InvalidRequest(_)
        )
    }
}
