// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod driver;
pub mod dut;
pub mod loopback;
pub mod virtual_regs;

pub use driver::{BenchDriver, Driver};
pub use dut::DutModel;
pub use loopback::{LoopbackFifoDevice, LoopbackSettings};
pub use virtual_regs::{AccessKind, RegisterAccess, VirtualRegisterDevice};

use patternbench_config::{ApgRegisterNames, FamilyDescriptor, FamilyKind, FifoRegisterNames};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Unknown register '{0}'")]
    UnknownRegister(String),
    #[error("Unknown FIFO '{0}'")]
    UnknownFifo(String),
    #[error("Register '{register}' does not allow {access}")]
    AccessViolation {
        register: String,
        access: &'static str,
    },
    #[error("Operation not supported: {0}")]
    Unsupported(String),
    #[error("FIFO '{fifo}' holds {capacity} samples, {requested} requested")]
    CapacityExceeded {
        fifo: String,
        capacity: usize,
        requested: usize,
    },
    #[error("Timed out on FIFO '{fifo}' after {received} of {expected} samples")]
    Timeout {
        fifo: String,
        received: usize,
        expected: usize,
    },
    #[error("Control link error: {0}")]
    Link(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        DeviceError::Io(e.to_string())
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Synchronous register and FIFO access to one physical resource.
///
/// Methods take `&self` because FIFO readers run on their own threads while the owner keeps
/// driving registers; implementations synchronize internally.
pub trait Device: std::fmt::Debug + Send + Sync {
    fn resource_id(&self) -> &str;

    fn get_register(&self, name: &str) -> DeviceResult<u64>;

    fn set_register(&self, name: &str, value: u64) -> DeviceResult<()>;

    /// Apply a batch of register writes in order.
    fn configure(&self, settings: &[(&str, u64)]) -> DeviceResult<()> {
        for (name, value) in settings {
            self.set_register(name, *value)?;
        }
        Ok(())
    }

    fn get_fifo_capacity(&self, fifo: &str) -> DeviceResult<usize> {
        Err(DeviceError::Unsupported(format!(
            "FIFO '{}' on '{}'",
            fifo,
            self.resource_id()
        )))
    }

    fn set_fifo_capacity(&self, fifo: &str, _capacity: usize) -> DeviceResult<()> {
        Err(DeviceError::Unsupported(format!(
            "FIFO '{}' on '{}'",
            fifo,
            self.resource_id()
        )))
    }

    fn write_fifo(&self, fifo: &str, _samples: &[u64]) -> DeviceResult<()> {
        Err(DeviceError::Unsupported(format!(
            "FIFO '{}' on '{}'",
            fifo,
            self.resource_id()
        )))
    }

    /// Block until `count` samples have been read from `fifo`.
    fn read_fifo(&self, fifo: &str, _count: usize) -> DeviceResult<Vec<u64>> {
        Err(DeviceError::Unsupported(format!(
            "FIFO '{}' on '{}'",
            fifo,
            self.resource_id()
        )))
    }

    /// As [`Device::read_fifo`], calling `on_attached` once the read is pending on the device,
    /// so that samples emitted from then on cannot be lost.
    ///
    /// Devices that cannot report attachment call it just before the read.
    fn read_fifo_attached(
        &self,
        fifo: &str,
        count: usize,
        on_attached: &dyn Fn(),
    ) -> DeviceResult<Vec<u64>> {
        on_attached();
        self.read_fifo(fifo, count)
    }
}

fn expand(template: &str, channel: &str) -> String {
    template.replace("{channel}", channel)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoCapabilities {
    pub pipeline_offset: u32,
    pub sample_period: Duration,
    pub per_bit_direction: bool,
    pub names: FifoRegisterNames,
}

impl FifoCapabilities {
    pub fn trigger(&self) -> &str {
        &self.names.trigger
    }

    pub fn store(&self) -> &str {
        &self.names.store
    }

    pub fn recall(&self) -> &str {
        &self.names.recall
    }

    pub fn transfer_size(&self, channel: &str) -> String {
        expand(&self.names.transfer_size, channel)
    }

    pub fn direction(&self, channel: &str) -> String {
        expand(&self.names.direction, channel)
    }

    pub fn default_level(&self, channel: &str) -> String {
        expand(&self.names.default_level, channel)
    }

    pub fn write_fifo(&self, channel: &str) -> String {
        expand(&self.names.write_fifo, channel)
    }

    pub fn read_fifo(&self, channel: &str) -> String {
        expand(&self.names.read_fifo, channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCapabilities {
    pub pipeline_offset: u32,
    pub sample_period: Duration,
    pub names: ApgRegisterNames,
}

/// Transport variant of a resource family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    FifoBacked(FifoCapabilities),
    RegisterMapped(RegisterCapabilities),
}

impl DeviceKind {
    pub fn from_family(family: &FamilyDescriptor) -> Self {
        let sample_period = Duration::from_nanos(family.sample_period_ns);
        match family.kind {
            FamilyKind::FifoBacked => DeviceKind::FifoBacked(FifoCapabilities {
                pipeline_offset: family.pipeline_offset,
                sample_period,
                per_bit_direction: family.per_bit_direction,
                names: family.fifo_registers.clone(),
            }),
            FamilyKind::RegisterMapped => DeviceKind::RegisterMapped(RegisterCapabilities {
                pipeline_offset: family.pipeline_offset,
                sample_period,
                names: family.apg_registers.clone(),
            }),
        }
    }

    pub fn pipeline_offset(&self) -> u32 {
        match self {
            DeviceKind::FifoBacked(c) => c.pipeline_offset,
            DeviceKind::RegisterMapped(c) => c.pipeline_offset,
        }
    }

    pub fn sample_period(&self) -> Duration {
        match self {
            DeviceKind::FifoBacked(c) => c.sample_period,
            DeviceKind::RegisterMapped(c) => c.sample_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_names_expand_channel() {
        let caps = FifoCapabilities {
            pipeline_offset: 3,
            sample_period: Duration::from_nanos(100),
            per_bit_direction: true,
            names: FifoRegisterNames::default(),
        };
        assert_eq!(caps.trigger(), "Run_Pattern");
        assert_eq!(caps.transfer_size("se_io"), "se_io_Transfer_Size");
        assert_eq!(caps.write_fifo("lvds"), "lvds_fifo_from_pc");
        assert_eq!(caps.read_fifo("lvds"), "lvds_fifo_to_pc");
    }

    #[test]
    fn test_kind_from_family() {
        let family: FamilyDescriptor = serde_yaml::from_str(
            "{ id: apg, kind: register_mapped, pipeline_offset: 2, sample_period_ns: 10 }",
        )
        .unwrap();
        let kind = DeviceKind::from_family(&family);
        assert!(matches!(kind, DeviceKind::RegisterMapped(_)));
        assert_eq!(kind.pipeline_offset(), 2);
        assert_eq!(kind.sample_period(), Duration::from_nanos(10));
    }
}
