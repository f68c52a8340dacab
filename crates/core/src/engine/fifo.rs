// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Playback and capture on FIFO-backed bitstreams.
//!
//! A batch runs in four phases on a single device:
//! 1. validation, with no device access;
//! 2. per-pattern setup: grow both FIFOs, program the transfer size, load the samples;
//! 3. one scoped reader thread per pattern, trigger asserted only after every read is pending
//!    on the device, de-asserted after every reader has joined;
//! 4. shaping of each raw capture in input order.
//!
//! Memory mode splits the same batch across three calls: [`FifoEngine::store_pattern`] loads once
//! and strobes the samples into on-device pattern memory, [`FifoEngine::run_stored`] replays them,
//! and [`FifoEngine::read_stored`] streams the latest replay back through the reader threads.

use super::{PatternEngine, RunOptions};
use crate::device::{Device, DeviceError, DeviceKind, DeviceResult, Driver, FifoCapabilities};
use crate::io_map::IoMap;
use crate::pattern::{Direction, Pattern};
use crate::shaper::{shape, CaptureResult, ShapeSpec};
use crate::{EngineError, EngineResult, Stage};
use patternbench_config::BenchManifest;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Debug)]
struct FifoResource {
    device: Arc<dyn Device>,
    caps: FifoCapabilities,
    channels: BTreeSet<String>,
}

/// One pattern after setup, ready for its reader thread.
#[derive(Debug)]
struct Job<'a> {
    pattern: &'a Pattern,
    read_fifo: String,
    transported: usize,
}

/// Batch held in on-device pattern memory.
#[derive(Debug)]
struct StoredBatch {
    resource_id: String,
    patterns: Vec<Pattern>,
    transported: Vec<usize>,
    time_scale: u32,
    unread_run: bool,
}

#[derive(Debug)]
pub struct FifoEngine {
    resources: BTreeMap<String, FifoResource>,
    stored: Option<StoredBatch>,
}

impl FifoEngine {
    /// Open and program every resource referenced by `io_map`.
    ///
    /// All resolution and direction checks complete before the first register write.
    pub fn new(bench: &BenchManifest, io_map: &IoMap, driver: &dyn Driver) -> EngineResult<Self> {
        let referenced = io_map.resources();
        if referenced.is_empty() {
            return Err(EngineError::ConfigurationMismatch(
                "IO map references no resources".to_string(),
            ));
        }

        let mut planned = Vec::new();
        for resource_id in referenced {
            let resource = bench.resource(resource_id).ok_or_else(|| {
                EngineError::ConfigurationMismatch(format!("unknown resource '{}'", resource_id))
            })?;
            let family = bench.family(&resource.family).ok_or_else(|| {
                EngineError::ConfigurationMismatch(format!(
                    "resource '{}' has unknown family '{}'",
                    resource_id, resource.family
                ))
            })?;
            let DeviceKind::FifoBacked(caps) = DeviceKind::from_family(family) else {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "resource '{}' (family '{}') is not FIFO-backed",
                    resource_id, family.id
                )));
            };

            let channels: BTreeSet<String> = io_map
                .channels(resource_id)
                .into_iter()
                .map(str::to_string)
                .collect();
            if !caps.per_bit_direction {
                if let Some(channel) = channels
                    .iter()
                    .find(|c| io_map.has_mixed_direction(resource_id, c))
                {
                    return Err(EngineError::PortDirectionConflict {
                        resource: resource_id.to_string(),
                        channel: channel.clone(),
                        family: family.id.clone(),
                    });
                }
            }
            planned.push((resource, caps, channels));
        }

        let mut resources = BTreeMap::new();
        for (resource, caps, channels) in planned {
            let requested: Vec<String> = channels.iter().cloned().collect();
            let device = driver
                .open(resource, &DeviceKind::FifoBacked(caps.clone()), &requested)
                .map_err(|e| {
                    EngineError::ConfigurationMismatch(format!(
                        "cannot open '{}': {}",
                        resource.id, e
                    ))
                })?;
            for channel in &channels {
                for fifo in [caps.write_fifo(channel), caps.read_fifo(channel)] {
                    device.get_fifo_capacity(&fifo).map_err(|e| {
                        EngineError::ConfigurationMismatch(format!(
                            "'{}' does not expose FIFO '{}': {}",
                            resource.id, fifo, e
                        ))
                    })?;
                }
            }
            resources.insert(
                resource.id.clone(),
                FifoResource {
                    device,
                    caps,
                    channels,
                },
            );
        }

        for (resource_id, res) in &resources {
            for channel in &res.channels {
                let direction = io_map.direction_mask(resource_id, channel);
                let defaults = io_map.default_mask(resource_id, channel);
                tracing::debug!(
                    "{}/{}: direction {:#x}, defaults {:#x}",
                    resource_id,
                    channel,
                    direction,
                    defaults
                );
                res.device
                    .configure(&[
                        (res.caps.direction(channel).as_str(), direction),
                        (res.caps.default_level(channel).as_str(), defaults),
                    ])
                    .map_err(|e| EngineError::transport(resource_id, Stage::Setup, e))?;
            }
        }

        tracing::info!("FIFO engine ready with {} resource(s)", resources.len());
        Ok(Self {
            resources,
            stored: None,
        })
    }

    pub fn device(&self, resource_id: &str) -> Option<Arc<dyn Device>> {
        self.resources.get(resource_id).map(|r| Arc::clone(&r.device))
    }

    pub fn run(&mut self, patterns: &[Pattern], time_scale: u32) -> EngineResult<Vec<CaptureResult>> {
        self.run_with(
            patterns,
            &RunOptions {
                time_scale,
                ..Default::default()
            },
        )
    }

    pub fn run_with(
        &mut self,
        patterns: &[Pattern],
        options: &RunOptions,
    ) -> EngineResult<Vec<CaptureResult>> {
        let resource_id = self.validate(patterns, options)?;
        let res = self.resource(&resource_id)?;
        tracing::info!(
            "Running {} pattern(s) on '{}' at time scale {}",
            patterns.len(),
            resource_id,
            options.time_scale
        );

        let mut jobs = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            jobs.push(
                load(res, pattern, options.time_scale)
                    .map_err(|e| EngineError::transport(&resource_id, Stage::Load, e))?,
            );
        }

        let raw = trigger_and_drain(res, res.caps.trigger(), &jobs, options, &resource_id)?;

        shape_all(res, &jobs, raw, options)
    }

    /// Load `patterns` once and move them into pattern memory. Replaces any stored batch.
    pub fn store_pattern(&mut self, patterns: &[Pattern], time_scale: u32) -> EngineResult<()> {
        let options = RunOptions {
            time_scale,
            ..Default::default()
        };
        let resource_id = self.validate(patterns, &options)?;
        self.stored = None;
        let res = self.resource(&resource_id)?;

        let mut transported = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let job = load(res, pattern, time_scale)
                .map_err(|e| EngineError::transport(&resource_id, Stage::Load, e))?;
            transported.push(job.transported);
        }
        pulse(res.device.as_ref(), res.caps.store())
            .map_err(|e| EngineError::transport(&resource_id, Stage::Load, e))?;
        tracing::info!(
            "Stored {} pattern(s) in '{}' pattern memory",
            patterns.len(),
            resource_id
        );

        self.stored = Some(StoredBatch {
            resource_id,
            patterns: patterns.to_vec(),
            transported,
            time_scale,
            unread_run: false,
        });
        Ok(())
    }

    /// Replay the stored batch. Its capture stays on the device until [`FifoEngine::read_stored`].
    pub fn run_stored(&mut self) -> EngineResult<()> {
        let Some(stored) = self.stored.as_ref() else {
            return Err(EngineError::InvalidRequest(
                "no pattern stored in device memory".to_string(),
            ));
        };
        let res = self.resource(&stored.resource_id)?;
        pulse(res.device.as_ref(), res.caps.trigger())
            .map_err(|e| EngineError::transport(&stored.resource_id, Stage::Trigger, e))?;
        tracing::debug!("Replayed stored batch on '{}'", stored.resource_id);

        if let Some(stored) = self.stored.as_mut() {
            stored.unread_run = true;
        }
        Ok(())
    }

    /// Stream the capture of the latest [`FifoEngine::run_stored`] back and shape it.
    pub fn read_stored(&mut self, descale: bool) -> EngineResult<Vec<CaptureResult>> {
        let Some(stored) = self.stored.as_ref() else {
            return Err(EngineError::InvalidRequest(
                "no pattern stored in device memory".to_string(),
            ));
        };
        if !stored.unread_run {
            return Err(EngineError::InvalidRequest(
                "stored pattern has not been run since the last read".to_string(),
            ));
        }
        let res = self.resource(&stored.resource_id)?;
        let options = RunOptions {
            time_scale: stored.time_scale,
            descale,
            ..Default::default()
        };
        let jobs: Vec<Job<'_>> = stored
            .patterns
            .iter()
            .zip(&stored.transported)
            .map(|(pattern, &transported)| Job {
                pattern,
                read_fifo: res.caps.read_fifo(pattern.channel_id()),
                transported,
            })
            .collect();

        let raw = trigger_and_drain(res, res.caps.recall(), &jobs, &options, &stored.resource_id)?;
        let results = shape_all(res, &jobs, raw, &options)?;
        drop(jobs);
        if let Some(stored) = self.stored.as_mut() {
            stored.unread_run = false;
        }
        Ok(results)
    }

    fn resource(&self, resource_id: &str) -> EngineResult<&FifoResource> {
        self.resources.get(resource_id).ok_or_else(|| {
            EngineError::ConfigurationMismatch(format!("unknown resource '{}'", resource_id))
        })
    }

    /// Reject the batch before any device access. Returns the single target resource.
    fn validate(&self, patterns: &[Pattern], options: &RunOptions) -> EngineResult<String> {
        options.check_time_scale()?;
        if patterns.is_empty() {
            return Err(EngineError::InvalidRequest("empty pattern batch".to_string()));
        }

        let mut seen = HashSet::new();
        let mut devices = BTreeSet::new();
        for pattern in patterns {
            if pattern.direction() != Direction::Write {
                return Err(EngineError::InvalidRequest(format!(
                    "pattern {} is a capture, not a write pattern",
                    pattern.id()
                )));
            }
            let Some(res) = self.resources.get(pattern.resource_id()) else {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "pattern {} targets a resource this engine has not opened",
                    pattern.id()
                )));
            };
            if !res.channels.contains(pattern.channel_id()) {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "pattern {} targets a channel missing from the IO map",
                    pattern.id()
                )));
            }
            if !seen.insert(pattern.id().clone()) {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "channel {} appears twice in one batch",
                    pattern.id()
                )));
            }
            devices.insert(pattern.resource_id().to_string());
        }

        if devices.len() > 1 {
            return Err(EngineError::UnsupportedConcurrentHardware(
                devices.into_iter().collect(),
            ));
        }
        devices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::InvalidRequest("empty pattern batch".to_string()))
    }
}

fn ensure_capacity(device: &dyn Device, fifo: &str, needed: usize) -> DeviceResult<()> {
    let current = device.get_fifo_capacity(fifo)?;
    if current < needed {
        tracing::debug!("Growing '{}' from {} to {} samples", fifo, current, needed);
        device.set_fifo_capacity(fifo, needed)?;
    }
    Ok(())
}

fn load<'a>(res: &FifoResource, pattern: &'a Pattern, time_scale: u32) -> DeviceResult<Job<'a>> {
    let channel = pattern.channel_id();
    let scaled = pattern.scaled(time_scale);
    let needed = scaled.len() + res.caps.pipeline_offset as usize;
    let write_fifo = res.caps.write_fifo(channel);
    let read_fifo = res.caps.read_fifo(channel);

    ensure_capacity(res.device.as_ref(), &write_fifo, needed)?;
    ensure_capacity(res.device.as_ref(), &read_fifo, needed)?;
    res.device
        .set_register(&res.caps.transfer_size(channel), needed.saturating_sub(1) as u64)?;
    res.device.write_fifo(&write_fifo, &scaled)?;
    tracing::debug!("Loaded {} samples into '{}'", scaled.len(), write_fifo);

    Ok(Job {
        pattern,
        read_fifo,
        transported: scaled.len(),
    })
}

fn shape_all(
    res: &FifoResource,
    jobs: &[Job<'_>],
    raw: Vec<Vec<u64>>,
    options: &RunOptions,
) -> EngineResult<Vec<CaptureResult>> {
    jobs.iter()
        .zip(raw)
        .map(|(job, samples)| {
            shape(
                samples,
                ShapeSpec {
                    requested_len: job.transported,
                    pipeline_offset: res.caps.pipeline_offset,
                    time_scale: options.time_scale,
                    descale: options.descale,
                },
                job.pattern.id().clone(),
                res.caps.sample_period,
            )
        })
        .collect()
}

fn pulse(device: &dyn Device, register: &str) -> DeviceResult<()> {
    let asserted = device.set_register(register, 1);
    let deasserted = device.set_register(register, 0);
    asserted.and(deasserted)
}

/// Start one reader per job, assert `strobe` once all are attached, de-assert after they join.
fn trigger_and_drain(
    res: &FifoResource,
    strobe: &str,
    jobs: &[Job<'_>],
    options: &RunOptions,
    resource_id: &str,
) -> EngineResult<Vec<Vec<u64>>> {
    let offset = res.caps.pipeline_offset as usize;
    let device = res.device.as_ref();

    std::thread::scope(|scope| -> EngineResult<Vec<Vec<u64>>> {
        let (attached_tx, attached_rx) = crossbeam_channel::bounded::<usize>(jobs.len());
        let readers: Vec<_> = jobs
            .iter()
            .enumerate()
            .map(|(index, job)| {
                let attached = attached_tx.clone();
                scope.spawn(move || {
                    device.read_fifo_attached(&job.read_fifo, job.transported + offset, &|| {
                        let _ = attached.send(index);
                    })
                })
            })
            .collect();
        drop(attached_tx);

        for _ in 0..readers.len() {
            match attached_rx.recv() {
                Ok(index) => tracing::debug!("Reader for {} attached", jobs[index].pattern.id()),
                Err(_) => break,
            }
        }
        if let Some(delay) = options.pre_trigger_delay {
            std::thread::sleep(delay);
        }

        let asserted = device.set_register(strobe, 1);
        let mut raw = Vec::with_capacity(readers.len());
        let mut failure = None;
        for handle in readers {
            match handle.join() {
                Ok(Ok(samples)) => raw.push(samples),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(DeviceError::Io("reader thread panicked".to_string()));
                }
            }
        }
        let deasserted = device.set_register(strobe, 0);

        asserted
            .and(deasserted)
            .map_err(|e| EngineError::transport(resource_id, Stage::Trigger, e))?;
        if let Some(e) = failure {
            return Err(EngineError::transport(resource_id, Stage::Drain, e));
        }
        Ok(raw)
    })
}

impl PatternEngine for FifoEngine {
    fn execute(
        &mut self,
        patterns: &[Pattern],
        options: &RunOptions,
    ) -> EngineResult<Vec<CaptureResult>> {
        self.run_with(patterns, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BenchDriver;

    const BENCH: &str = r#"
name: "unit"
families:
  - id: glue
    kind: fifo_backed
    pipeline_offset: 3
  - id: apg
    kind: register_mapped
    pipeline_offset: 2
resources:
  - id: PXI1Slot5
    family: glue
    backend: loopback
  - id: car
    family: apg
    backend: virtual
signals:
  - { name: mclk, bit: 0, direction: to_device, resource: PXI1Slot5, channel: se_io }
  - { name: din, bit: 1, direction: to_device, resource: PXI1Slot5, channel: se_io }
"#;

    fn engine(yaml: &str) -> EngineResult<FifoEngine> {
        let bench = BenchManifest::from_yaml(yaml).unwrap();
        let io_map = IoMap::from_manifest(&bench).unwrap();
        FifoEngine::new(&bench, &io_map, &BenchDriver)
    }

    #[test]
    fn test_round_trip() {
        let mut engine = engine(BENCH).unwrap();
        let pattern = Pattern::write("PXI1Slot5", "se_io", vec![1, 2, 3, 0, 3]);
        let results = engine.run(std::slice::from_ref(&pattern), 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data, vec![1, 2, 3, 0, 3]);
        assert_eq!(results[0].origin, *pattern.id());
    }

    #[test]
    fn test_programs_direction_and_defaults() {
        let yaml = BENCH.replace(
            "channel: se_io }\n  - { name: din",
            "channel: se_io, default_level: 1 }\n  - { name: din",
        );
        let engine = engine(&yaml).unwrap();
        let device = engine.device("PXI1Slot5").unwrap();
        assert_eq!(device.get_register("se_io_Data_Dir").unwrap(), 0b11);
        assert_eq!(device.get_register("se_io_Data_Default").unwrap(), 0b01);
    }

    #[test]
    fn test_mixed_channel_needs_per_bit_direction() {
        let yaml = BENCH.replace(
            "bit: 1, direction: to_device",
            "bit: 1, direction: from_device",
        );
        let err = engine(&yaml).unwrap_err();
        assert!(matches!(err, EngineError::PortDirectionConflict { .. }));

        let yaml = yaml.replace("pipeline_offset: 3", "pipeline_offset: 3\n    per_bit_direction: true");
        assert!(engine(&yaml).is_ok());
    }

    #[test]
    fn test_register_mapped_resource_rejected() {
        let yaml = format!(
            "{}  - {{ name: apg_in, bit: 0, direction: to_device, resource: car, channel: car }}\n",
            BENCH
        );
        let err = engine(&yaml).unwrap_err();
        assert!(err.to_string().contains("not FIFO-backed"));
    }

    #[test]
    fn test_batch_validation() {
        let mut engine = engine(BENCH).unwrap();
        let a = Pattern::write("PXI1Slot5", "se_io", vec![1]);

        let err = engine.run(&[a.clone(), a.clone()], 1).unwrap_err();
        assert!(err.to_string().contains("appears twice"));

        let err = engine.run(&[Pattern::write("PXI1Slot5", "lvds", vec![1])], 1).unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationMismatch(_)));

        assert!(matches!(
            engine.run(&[a.clone()], 0),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(engine.run(&[], 1), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn test_capacity_beyond_device_maximum_fails_in_load() {
        let yaml = BENCH.replacen(
            "backend: loopback",
            "backend: loopback\n    config: { initial_capacity: 8, max_capacity: 16 }",
            1,
        );
        let mut engine = engine(&yaml).unwrap();
        let err = engine
            .run(&[Pattern::write("PXI1Slot5", "se_io", vec![1; 20])], 1)
            .unwrap_err();
        match err {
            EngineError::TransportFailure {
                resource,
                stage,
                source,
            } => {
                assert_eq!(resource, "PXI1Slot5");
                assert_eq!(stage, Stage::Load);
                assert!(matches!(
                    source,
                    DeviceError::CapacityExceeded {
                        capacity: 16,
                        requested: 23,
                        ..
                    }
                ));
            }
            other => panic!("unexpected error: {}", other),
        }
        let device = engine.device("PXI1Slot5").unwrap();
        assert_eq!(device.get_register("Run_Pattern").unwrap(), 0);
    }

    #[test]
    fn test_stored_pattern_runs_twice() {
        let mut engine = engine(BENCH).unwrap();
        let pattern = Pattern::write("PXI1Slot5", "se_io", vec![1, 2, 3, 0, 3]);
        engine.store_pattern(std::slice::from_ref(&pattern), 1).unwrap();

        for _ in 0..2 {
            engine.run_stored().unwrap();
            let results = engine.read_stored(false).unwrap();
            assert_eq!(results[0].data, vec![1, 2, 3, 0, 3]);
            assert_eq!(results[0].origin, *pattern.id());
        }
    }

    #[test]
    fn test_stored_pattern_call_order() {
        let mut engine = engine(BENCH).unwrap();
        assert!(matches!(engine.run_stored(), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(
            engine.read_stored(false),
            Err(EngineError::InvalidRequest(_))
        ));

        engine
            .store_pattern(&[Pattern::write("PXI1Slot5", "se_io", vec![1])], 1)
            .unwrap();
        let err = engine.read_stored(false).unwrap_err();
        assert!(err.to_string().contains("not been run"));

        engine.run_stored().unwrap();
        engine.read_stored(false).unwrap();
        assert!(matches!(
            engine.read_stored(false),
            Err(EngineError::InvalidRequest(_))
        ));
    }
}
