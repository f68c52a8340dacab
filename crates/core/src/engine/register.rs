// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{PatternEngine, RunOptions};
use crate::device::{Device, DeviceKind, Driver, RegisterCapabilities};
use crate::pattern::{Direction, Pattern};
use crate::shaper::{shape, CaptureResult, ShapeSpec};
use crate::{EngineError, EngineResult, Stage};
use patternbench_config::{ApgRegisterNames, BenchManifest, IdlePollConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApgState {
    Idle,
    Loading,
    Running,
}

/// Pattern generator driven one register access at a time.
///
/// Works the same over a control link or against a digital twin; it only sees [`Device`].
#[derive(Debug)]
pub struct RegisterEngine {
    resource_id: String,
    channel_id: String,
    device: Arc<dyn Device>,
    caps: RegisterCapabilities,
    poll: IdlePollConfig,
    state: ApgState,
}

impl RegisterEngine {
    pub fn new(
        resource_id: impl Into<String>,
        channel_id: impl Into<String>,
        device: Arc<dyn Device>,
        caps: RegisterCapabilities,
        poll: IdlePollConfig,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            channel_id: channel_id.into(),
            device,
            caps,
            poll,
            state: ApgState::Idle,
        }
    }

    pub fn from_bench(
        bench: &BenchManifest,
        resource_id: &str,
        driver: &dyn Driver,
    ) -> EngineResult<Self> {
        let resource = bench.resource(resource_id).ok_or_else(|| {
            EngineError::ConfigurationMismatch(format!("unknown resource '{}'", resource_id))
        })?;
        let family = bench.family(&resource.family).ok_or_else(|| {
            EngineError::ConfigurationMismatch(format!(
                "resource '{}' has unknown family '{}'",
                resource_id, resource.family
            ))
        })?;
        let kind = DeviceKind::from_family(family);
        let DeviceKind::RegisterMapped(caps) = &kind else {
            return Err(EngineError::ConfigurationMismatch(format!(
                "resource '{}' (family '{}') is not register-mapped",
                resource_id, family.id
            )));
        };

        let channel_id = resource.channel_id().to_string();
        let device = driver
            .open(resource, &kind, std::slice::from_ref(&channel_id))
            .map_err(|e| {
                EngineError::ConfigurationMismatch(format!("cannot open '{}': {}", resource_id, e))
            })?;

        Ok(Self::new(
            resource_id,
            channel_id,
            device,
            caps.clone(),
            bench.idle_poll,
        ))
    }

    pub fn state(&self) -> ApgState {
        self.state
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn run(
        &mut self,
        pattern: &Pattern,
        time_scale: u32,
        drain: bool,
    ) -> EngineResult<Option<CaptureResult>> {
        self.run_with(
            pattern,
            &RunOptions {
                time_scale,
                drain,
                ..Default::default()
            },
        )
    }

    pub fn run_with(
        &mut self,
        pattern: &Pattern,
        options: &RunOptions,
    ) -> EngineResult<Option<CaptureResult>> {
        self.validate(pattern, options)?;
        let names = self.caps.names.clone();
        let scaled = pattern.scaled(options.time_scale);
        let offset = self.caps.pipeline_offset as usize;

        self.wait_idle()?;
        if let Err(e) = self.play(&names, &scaled) {
            self.state = ApgState::Idle;
            return Err(e);
        }

        if !options.drain {
            self.write(&names.clear, 1, Stage::Drain)?;
            return Ok(None);
        }

        let total = scaled.len() + offset;
        let mut raw = Vec::with_capacity(total);
        for _ in 0..total {
            raw.push(
                self.device
                    .get_register(&names.pop)
                    .map_err(|e| EngineError::transport(&self.resource_id, Stage::Drain, e))?,
            );
        }

        shape(
            raw,
            ShapeSpec {
                requested_len: scaled.len(),
                pipeline_offset: self.caps.pipeline_offset,
                time_scale: options.time_scale,
                descale: options.descale,
            },
            pattern.id().clone(),
            self.caps.sample_period,
        )
        .map(Some)
    }

    /// Load `scaled` into the generator, run it and wait for completion.
    fn play(&mut self, names: &ApgRegisterNames, scaled: &[u64]) -> EngineResult<()> {
        self.state = ApgState::Loading;
        self.write(&names.clear, 1, Stage::Load)?;
        self.write(&names.sample_count, scaled.len() as u64, Stage::Load)?;
        for &sample in scaled {
            self.write(&names.push, sample, Stage::Load)?;
        }
        tracing::debug!("{}: loaded {} samples", self.resource_id, scaled.len());

        self.write(&names.run, 1, Stage::Trigger)?;
        self.state = ApgState::Running;
        self.wait_idle()?;
        self.state = ApgState::Idle;
        Ok(())
    }

    fn validate(&self, pattern: &Pattern, options: &RunOptions) -> EngineResult<()> {
        options.check_time_scale()?;
        if pattern.resource_id() != self.resource_id || pattern.channel_id() != self.channel_id {
            return Err(EngineError::ConfigurationMismatch(format!(
                "pattern {} does not target {}/{}",
                pattern.id(),
                self.resource_id,
                self.channel_id
            )));
        }
        if pattern.direction() != Direction::Write {
            return Err(EngineError::InvalidRequest(format!(
                "pattern {} is a capture, not a write pattern",
                pattern.id()
            )));
        }
        if pattern.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "pattern {} has no samples",
                pattern.id()
            )));
        }
        Ok(())
    }

    fn write(&self, register: &str, value: u64, stage: Stage) -> EngineResult<()> {
        self.device
            .set_register(register, value)
            .map_err(|e| EngineError::transport(&self.resource_id, stage, e))
    }

    /// Poll status until it reads zero, at most `max_attempts` times.
    fn wait_idle(&self) -> EngineResult<()> {
        let interval = Duration::from_micros(self.poll.interval_us);
        for attempt in 0..self.poll.max_attempts {
            let status = self
                .device
                .get_register(&self.caps.names.status)
                .map_err(|e| EngineError::transport(&self.resource_id, Stage::Poll, e))?;
            if status == 0 {
                if attempt > 0 {
                    tracing::debug!("{}: idle after {} polls", self.resource_id, attempt + 1);
                }
                return Ok(());
            }
            std::thread::sleep(interval);
        }
        Err(EngineError::IdlePollUnbounded {
            resource: self.resource_id.clone(),
            attempts: self.poll.max_attempts,
        })
    }
}

impl PatternEngine for RegisterEngine {
    fn execute(
        &mut self,
        patterns: &[Pattern],
        options: &RunOptions,
    ) -> EngineResult<Vec<CaptureResult>> {
        let [pattern] = patterns else {
            return Err(EngineError::InvalidRequest(format!(
                "register-mapped engines run one pattern at a time, got {}",
                patterns.len()
            )));
        };
        Ok(self.run_with(pattern, options)?.into_iter().collect())
    }
}
