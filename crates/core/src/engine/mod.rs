// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod fifo;
pub mod register;

pub use fifo::FifoEngine;
pub use register::{ApgState, RegisterEngine};

use crate::device::Driver;
use crate::io_map::IoMap;
use crate::pattern::Pattern;
use crate::shaper::CaptureResult;
use crate::{EngineError, EngineResult};
use patternbench_config::{BenchManifest, FamilyKind};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub time_scale: u32,
    /// Decimate captures back to the unscaled length.
    pub descale: bool,
    /// Register-mapped engines only: read the capture back.
    pub drain: bool,
    /// Extra wait between reader confirmation and trigger assertion.
    pub pre_trigger_delay: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            time_scale: 1,
            descale: false,
            drain: true,
            pre_trigger_delay: None,
        }
    }
}

impl RunOptions {
    pub(crate) fn check_time_scale(&self) -> EngineResult<()> {
        if self.time_scale == 0 {
            return Err(EngineError::InvalidRequest(
                "time scale must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load, trigger, drain and shape a batch of patterns.
pub trait PatternEngine {
    fn execute(
        &mut self,
        patterns: &[Pattern],
        options: &RunOptions,
    ) -> EngineResult<Vec<CaptureResult>>;
}

/// Build the engine that serves `resource_id`, chosen by its family.
pub fn build_engine(
    bench: &BenchManifest,
    io_map: &IoMap,
    driver: &dyn Driver,
    resource_id: &str,
) -> EngineResult<Box<dyn PatternEngine>> {
    let family = bench.family_of(resource_id).ok_or_else(|| {
        EngineError::ConfigurationMismatch(format!("unknown resource '{}'", resource_id))
    })?;

    match family.kind {
        FamilyKind::FifoBacked => {
            let fifo_only = io_map.restricted(|r| {
                bench
                    .family_of(r)
                    .map_or(true, |f| f.kind == FamilyKind::FifoBacked)
            });
            Ok(Box::new(FifoEngine::new(bench, &fifo_only, driver)?))
        }
        FamilyKind::RegisterMapped => Ok(Box::new(RegisterEngine::from_bench(
            bench,
            resource_id,
            driver,
        )?)),
    }
}
