// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Device, DeviceError, DeviceKind, DeviceResult, DutModel, RegisterCapabilities};
use patternbench_config::{ApgRegisterNames, RegisterMapEntry, ResourceDescriptor};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const JOURNAL_LIMIT: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One successful register access, oldest first in [`VirtualRegisterDevice::accesses`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAccess {
    pub register: String,
    pub kind: AccessKind,
    pub value: u64,
}

#[derive(Debug, Clone, Copy)]
struct RegisterSpec {
    readable: bool,
    writeable: bool,
    value: u64,
}

impl RegisterSpec {
    fn new(readable: bool, writeable: bool) -> Self {
        Self {
            readable,
            writeable,
            value: 0,
        }
    }
}

#[derive(Debug)]
struct ApgBlock {
    names: ApgRegisterNames,
    pipeline_offset: usize,
    sample_period: Duration,
    dut: DutModel,
    pushed: Vec<u64>,
    captured: VecDeque<u64>,
    busy_until: Option<Instant>,
}

impl ApgBlock {
    fn is_busy(&self) -> bool {
        self.busy_until.is_some_and(|t| Instant::now() < t)
    }

    fn start(&mut self, n_samples: u64) {
        let offset = self.pipeline_offset;
        let total = n_samples as usize + offset;
        self.captured = (0..total)
            .map(|k| {
                if k < offset {
                    0
                } else {
                    self.pushed.get(k - offset).map_or(0, |&s| self.dut.apply(s))
                }
            })
            .collect();
        let busy = self
            .sample_period
            .checked_mul(u32::try_from(n_samples).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX);
        self.busy_until = Instant::now().checked_add(busy);
    }
}

#[derive(Debug, Default)]
struct State {
    registers: BTreeMap<String, RegisterSpec>,
    apg: Option<ApgBlock>,
    journal: VecDeque<RegisterAccess>,
}

impl State {
    fn record(&mut self, register: &str, kind: AccessKind, value: u64) {
        if self.journal.len() == JOURNAL_LIMIT {
            self.journal.pop_front();
        }
        self.journal.push_back(RegisterAccess {
            register: register.to_string(),
            kind,
            value,
        });
    }
}

/// Register file of a simulated AXI target, optionally carrying a pattern generator block.
#[derive(Debug)]
pub struct VirtualRegisterDevice {
    resource_id: String,
    state: Mutex<State>,
}

impl VirtualRegisterDevice {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_register(self, name: &str, readable: bool, writeable: bool) -> Self {
        self.lock()
            .registers
            .insert(name.to_string(), RegisterSpec::new(readable, writeable));
        self
    }

    pub fn with_register_map(self, entries: &[RegisterMapEntry]) -> Self {
        {
            let mut state = self.lock();
            for entry in entries {
                state.registers.insert(
                    entry.name.clone(),
                    RegisterSpec::new(entry.readable, entry.writeable),
                );
            }
        }
        self
    }

    /// Attach a pattern generator. Its registers keep any access flags already defined.
    pub fn with_apg(self, caps: &RegisterCapabilities, dut: DutModel) -> Self {
        {
            let mut state = self.lock();
            let names = &caps.names;
            let defaults = [
                (&names.push, false, true),
                (&names.pop, true, false),
                (&names.sample_count, true, true),
                (&names.run, true, true),
                (&names.status, true, false),
                (&names.clear, false, true),
            ];
            for (name, readable, writeable) in defaults {
                state
                    .registers
                    .entry(name.clone())
                    .or_insert_with(|| RegisterSpec::new(readable, writeable));
            }
            state.apg = Some(ApgBlock {
                names: names.clone(),
                pipeline_offset: caps.pipeline_offset as usize,
                sample_period: caps.sample_period,
                dut,
                pushed: Vec::new(),
                captured: VecDeque::new(),
                busy_until: None,
            });
        }
        self
    }

    pub fn from_resource(resource: &ResourceDescriptor, kind: &DeviceKind) -> DeviceResult<Self> {
        let mut device = Self::new(resource.id.clone());
        for name in &resource.registers {
            device = device.with_register(name, true, true);
        }
        if let Some(path) = &resource.register_map {
            let text = std::fs::read_to_string(path)
                .map_err(|e| DeviceError::Io(format!("{}: {}", path, e)))?;
            let entries = patternbench_config::parse_register_map(&text)
                .map_err(|e| DeviceError::Io(format!("{}: {}", path, e)))?;
            tracing::debug!("Loaded {} registers from {}", entries.len(), path);
            device = device.with_register_map(&entries);
        }
        if let DeviceKind::RegisterMapped(caps) = kind {
            let dut = match resource.config_str("dut") {
                Some(name) => name.parse().map_err(DeviceError::Unsupported)?,
                None => DutModel::default(),
            };
            device = device.with_apg(caps, dut);
        }
        Ok(device)
    }

    pub fn accesses(&self) -> Vec<RegisterAccess> {
        self.lock().journal.iter().cloned().collect()
    }

    pub fn clear_accesses(&self) {
        self.lock().journal.clear();
    }

    pub fn register_names(&self) -> Vec<String> {
        self.lock().registers.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Device for VirtualRegisterDevice {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn get_register(&self, name: &str) -> DeviceResult<u64> {
        let mut state = self.lock();
        let spec = *state
            .registers
            .get(name)
            .ok_or_else(|| DeviceError::UnknownRegister(name.to_string()))?;
        if !spec.readable {
            return Err(DeviceError::AccessViolation {
                register: name.to_string(),
                access: "read",
            });
        }

        let value = match state.apg.as_mut() {
            Some(apg) if *name == apg.names.status => u64::from(apg.is_busy()),
            Some(apg) if *name == apg.names.pop => apg.captured.pop_front().unwrap_or(0),
            _ => spec.value,
        };
        state.record(name, AccessKind::Read, value);
        Ok(value)
    }

    fn set_register(&self, name: &str, value: u64) -> DeviceResult<()> {
        let mut state = self.lock();
        let spec = state
            .registers
            .get(name)
            .copied()
            .ok_or_else(|| DeviceError::UnknownRegister(name.to_string()))?;
        if !spec.writeable {
            return Err(DeviceError::AccessViolation {
                register: name.to_string(),
                access: "write",
            });
        }

        let n_samples = match &state.apg {
            Some(apg) => state
                .registers
                .get(&apg.names.sample_count)
                .map_or(0, |r| r.value),
            None => 0,
        };
        let mut stored = value;
        if let Some(apg) = state.apg.as_mut() {
            if *name == apg.names.push {
                apg.pushed.push(value);
            } else if *name == apg.names.clear && value != 0 {
                apg.pushed.clear();
                apg.captured.clear();
                stored = 0;
            } else if *name == apg.names.run && value != 0 {
                if apg.is_busy() {
                    tracing::warn!("'{}': run requested while busy, ignored", self.resource_id);
                } else {
                    apg.start(n_samples);
                }
                stored = 0;
            }
        }

        if let Some(reg) = state.registers.get_mut(name) {
            reg.value = stored;
        }
        state.record(name, AccessKind::Write, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(offset: u32, period: Duration) -> RegisterCapabilities {
        RegisterCapabilities {
            pipeline_offset: offset,
            sample_period: period,
            names: ApgRegisterNames::default(),
        }
    }

    #[test]
    fn test_unknown_and_access_violation() {
        let dev = VirtualRegisterDevice::new("car")
            .with_register("firmware_id", true, false)
            .with_register("pulse", false, true);
        assert!(matches!(
            dev.get_register("nope"),
            Err(DeviceError::UnknownRegister(_))
        ));
        assert!(matches!(
            dev.set_register("firmware_id", 1),
            Err(DeviceError::AccessViolation { access: "write", .. })
        ));
        assert!(matches!(
            dev.get_register("pulse"),
            Err(DeviceError::AccessViolation { access: "read", .. })
        ));
        assert!(dev.accesses().is_empty());
    }

    #[test]
    fn test_apg_capture_with_offset() {
        let dev = VirtualRegisterDevice::new("car").with_apg(&caps(2, Duration::ZERO), DutModel::Echo);
        dev.set_register("clear", 1).unwrap();
        dev.set_register("n_samples", 3).unwrap();
        for v in [5, 6, 7] {
            dev.set_register("write_channel", v).unwrap();
        }
        dev.set_register("run", 1).unwrap();
        assert_eq!(dev.get_register("status").unwrap(), 0);

        let out: Vec<u64> = (0..5).map(|_| dev.get_register("read_channel").unwrap()).collect();
        assert_eq!(out, vec![0, 0, 5, 6, 7]);
        assert_eq!(dev.get_register("read_channel").unwrap(), 0);
    }

    #[test]
    fn test_apg_busy_while_running() {
        let dev = VirtualRegisterDevice::new("car")
            .with_apg(&caps(0, Duration::from_millis(10)), DutModel::Echo);
        dev.set_register("n_samples", 5).unwrap();
        dev.set_register("run", 1).unwrap();
        assert_eq!(dev.get_register("status").unwrap(), 1);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(dev.get_register("status").unwrap(), 0);
    }

    #[test]
    fn test_register_map_overrides_apg_flags() {
        let entries = patternbench_config::parse_register_map(
            "status,0x400000000,0,32,1,0\nread_channel,0x400000000,4,32,1,0\n",
        )
        .unwrap();
        let dev = VirtualRegisterDevice::new("car")
            .with_register_map(&entries)
            .with_apg(&caps(2, Duration::ZERO), DutModel::Echo);
        assert!(dev.set_register("status", 1).is_err());
        assert!(dev.register_names().contains(&"write_channel".to_string()));
    }
}
