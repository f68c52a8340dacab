// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Device, DeviceError, DeviceKind, DeviceResult, LoopbackFifoDevice, VirtualRegisterDevice};
use crate::link::LinkDevice;
use patternbench_config::{BackendKind, ResourceDescriptor};
use std::sync::Arc;

/// Opens device handles for bench resources.
pub trait Driver {
    /// `channels` lists the channels the caller intends to use on a FIFO-backed resource.
    fn open(
        &self,
        resource: &ResourceDescriptor,
        kind: &DeviceKind,
        channels: &[String],
    ) -> DeviceResult<Arc<dyn Device>>;
}

/// Driver for the backends a bench manifest can name.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchDriver;

impl Driver for BenchDriver {
    fn open(
        &self,
        resource: &ResourceDescriptor,
        kind: &DeviceKind,
        channels: &[String],
    ) -> DeviceResult<Arc<dyn Device>> {
        tracing::info!("Opening '{}' ({:?} backend)", resource.id, resource.backend);
        match (resource.backend, kind) {
            (BackendKind::Loopback, DeviceKind::FifoBacked(caps)) => Ok(Arc::new(
                LoopbackFifoDevice::from_resource(resource, caps.clone(), channels)?,
            )),
            (BackendKind::Virtual, DeviceKind::RegisterMapped(_)) => {
                Ok(Arc::new(VirtualRegisterDevice::from_resource(resource, kind)?))
            }
            (BackendKind::Link, DeviceKind::RegisterMapped(_)) => {
                let host = resource.config_str("host").unwrap_or("127.0.0.1");
                let port = resource.config_u64("port").ok_or_else(|| {
                    DeviceError::Link(format!("resource '{}' has no port", resource.id))
                })?;
                let device_type = resource.config_str("device").unwrap_or("Caribou");
                Ok(Arc::new(LinkDevice::connect(
                    &resource.id,
                    &format!("{}:{}", host, port),
                    device_type,
                )?))
            }
            (backend, kind) => Err(DeviceError::Unsupported(format!(
                "{:?} backend cannot host a {} resource",
                backend,
                match kind {
                    DeviceKind::FifoBacked(_) => "FIFO-backed",
                    DeviceKind::RegisterMapped(_) => "register-mapped",
                }
            ))),
        }
    }
}
