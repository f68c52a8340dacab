// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulated FIFO-backed bitstream.
//!
//! Each channel has a host-to-device FIFO, a device-to-host FIFO and its own transfer-size,
//! direction and default-level registers. A rising edge on the shared trigger register starts one
//! emitter thread per loaded channel. The emitter streams `pipeline_offset` idle samples followed
//! by the loaded samples passed through the DUT model, `transfer_size + 1` samples in total, into
//! a bounded on-device buffer. Without a pending host read, samples that overflow that buffer are
//! lost, which mirrors the reader-attach race on real hardware.
//!
//! Memory mode: a rising edge on the store strobe moves each loaded channel into pattern memory.
//! A trigger then replays memory into a per-channel recording instead of streaming, and a rising
//! edge on the recall strobe streams the latest recording to the host like a normal run.

use super::{Device, DeviceError, DeviceResult, DutModel, FifoCapabilities};
use patternbench_config::ResourceDescriptor;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackSettings {
    pub dut: DutModel,
    pub initial_capacity: usize,
    pub max_capacity: usize,
    /// Samples the device can hold before the host reads them.
    pub device_depth: usize,
    pub read_timeout: Duration,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            dut: DutModel::Echo,
            initial_capacity: 1024,
            max_capacity: 1 << 20,
            device_depth: 4096,
            read_timeout: Duration::from_secs(2),
        }
    }
}

impl LoopbackSettings {
    pub fn from_resource(resource: &ResourceDescriptor) -> DeviceResult<Self> {
        let mut settings = Self::default();
        if let Some(dut) = resource.config_str("dut") {
            settings.dut = dut.parse().map_err(DeviceError::Unsupported)?;
        }
        if let Some(v) = resource.config_u64("initial_capacity") {
            settings.initial_capacity = v as usize;
        }
        if let Some(v) = resource.config_u64("max_capacity") {
            settings.max_capacity = v as usize;
        }
        if let Some(v) = resource.config_u64("device_depth") {
            settings.device_depth = (v as usize).max(1);
        }
        if let Some(v) = resource.config_u64("read_timeout_ms") {
            settings.read_timeout = Duration::from_millis(v);
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy)]
enum RegisterSlot {
    Trigger,
    Store,
    Recall,
    TransferSize,
    Direction,
    DefaultLevel,
}

#[derive(Debug, Clone, Copy)]
enum FifoSide {
    HostToDevice,
    DeviceToHost,
}

#[derive(Debug, Default)]
struct ChannelState {
    loaded: Vec<u64>,
    buffer: VecDeque<u64>,
    write_capacity: usize,
    read_capacity: usize,
    transfer_size: u64,
    direction: u64,
    default_level: u64,
    pending_reads: usize,
    dropped: usize,
    memory: Vec<u64>,
    recording: Vec<u64>,
}

#[derive(Debug, Default)]
struct State {
    channels: BTreeMap<String, ChannelState>,
    trigger: u64,
    store: u64,
    recall: u64,
    mutations: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct LoopbackFifoDevice {
    resource_id: String,
    caps: FifoCapabilities,
    settings: LoopbackSettings,
    registers: HashMap<String, (RegisterSlot, Option<String>)>,
    fifos: HashMap<String, (FifoSide, String)>,
    shared: Arc<Shared>,
    emitters: Mutex<Vec<JoinHandle<()>>>,
}

impl LoopbackFifoDevice {
    pub fn new(
        resource_id: impl Into<String>,
        caps: FifoCapabilities,
        channels: &[String],
        settings: LoopbackSettings,
    ) -> Self {
        let mut registers = HashMap::new();
        let mut fifos = HashMap::new();
        let mut state = State::default();

        registers.insert(caps.trigger().to_string(), (RegisterSlot::Trigger, None));
        registers.insert(caps.store().to_string(), (RegisterSlot::Store, None));
        registers.insert(caps.recall().to_string(), (RegisterSlot::Recall, None));
        for channel in channels {
            registers.insert(
                caps.transfer_size(channel),
                (RegisterSlot::TransferSize, Some(channel.clone())),
            );
            registers.insert(
                caps.direction(channel),
                (RegisterSlot::Direction, Some(channel.clone())),
            );
            registers.insert(
                caps.default_level(channel),
                (RegisterSlot::DefaultLevel, Some(channel.clone())),
            );
            fifos.insert(
                caps.write_fifo(channel),
                (FifoSide::HostToDevice, channel.clone()),
            );
            fifos.insert(
                caps.read_fifo(channel),
                (FifoSide::DeviceToHost, channel.clone()),
            );
            state.channels.insert(
                channel.clone(),
                ChannelState {
                    write_capacity: settings.initial_capacity,
                    read_capacity: settings.initial_capacity,
                    ..Default::default()
                },
            );
        }

        Self {
            resource_id: resource_id.into(),
            caps,
            settings,
            registers,
            fifos,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
            emitters: Mutex::new(Vec::new()),
        }
    }

    /// Channels come from the resource's `channels` config list, else from `requested`.
    pub fn from_resource(
        resource: &ResourceDescriptor,
        caps: FifoCapabilities,
        requested: &[String],
    ) -> DeviceResult<Self> {
        let configured: Vec<String> = resource
            .config
            .get("channels")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let channels = if configured.is_empty() {
            requested.to_vec()
        } else {
            configured
        };
        let settings = LoopbackSettings::from_resource(resource)?;
        tracing::debug!(
            "Loopback '{}' with channels {:?}, DUT {:?}",
            resource.id,
            channels,
            settings.dut
        );
        Ok(Self::new(resource.id.clone(), caps, &channels, settings))
    }

    /// Register writes, capacity changes and FIFO loads seen so far.
    pub fn mutation_count(&self) -> usize {
        self.shared.lock().mutations
    }

    pub fn dropped(&self, channel: &str) -> usize {
        self.shared
            .lock()
            .channels
            .get(channel)
            .map_or(0, |c| c.dropped)
    }

    /// Samples held in pattern memory for `channel`.
    pub fn stored_len(&self, channel: &str) -> usize {
        self.shared
            .lock()
            .channels
            .get(channel)
            .map_or(0, |c| c.memory.len())
    }

    pub fn pending_reads(&self, channel: &str) -> usize {
        self.shared
            .lock()
            .channels
            .get(channel)
            .map_or(0, |c| c.pending_reads)
    }

    fn register(&self, name: &str) -> DeviceResult<(RegisterSlot, Option<&str>)> {
        self.registers
            .get(name)
            .map(|(slot, channel)| (*slot, channel.as_deref()))
            .ok_or_else(|| DeviceError::UnknownRegister(name.to_string()))
    }

    fn fifo(&self, name: &str) -> DeviceResult<(FifoSide, &str)> {
        self.fifos
            .get(name)
            .map(|(side, channel)| (*side, channel.as_str()))
            .ok_or_else(|| DeviceError::UnknownFifo(name.to_string()))
    }

    /// `pipeline_offset` idle samples, then the DUT response, `transfer_size + 1` in total.
    fn response(&self, loaded: &[u64], transfer_size: u64) -> Vec<u64> {
        let offset = self.caps.pipeline_offset as usize;
        let dut = self.settings.dut;
        (0..transfer_size as usize + 1)
            .map(|k| {
                if k < offset {
                    0
                } else {
                    loaded.get(k - offset).map_or(0, |&s| dut.apply(s))
                }
            })
            .collect()
    }

    fn spawn_emitter(&self, channel: &str, output: Vec<u64>) -> JoinHandle<()> {
        tracing::debug!(
            "{}: emitting {} samples on '{}'",
            self.resource_id,
            output.len(),
            channel
        );
        let shared = Arc::clone(&self.shared);
        let channel = channel.to_string();
        let depth = self.settings.device_depth;
        std::thread::spawn(move || emit(&shared, &channel, output, depth))
    }

    /// Trigger edge: stream loaded channels, replay stored channels into their recording.
    fn start_run(&self, state: &mut State) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (channel, ch) in state.channels.iter_mut() {
            if !ch.loaded.is_empty() {
                let loaded = std::mem::take(&mut ch.loaded);
                let output = self.response(&loaded, ch.transfer_size);
                handles.push(self.spawn_emitter(channel, output));
            } else if !ch.memory.is_empty() {
                ch.recording = self.response(&ch.memory, ch.transfer_size);
                tracing::debug!(
                    "{}: replayed {} stored samples on '{}'",
                    self.resource_id,
                    ch.memory.len(),
                    channel
                );
            }
        }
        handles
    }

    fn store_loaded(&self, state: &mut State) {
        for (channel, ch) in state.channels.iter_mut() {
            if !ch.loaded.is_empty() {
                ch.memory = std::mem::take(&mut ch.loaded);
                ch.recording.clear();
                tracing::debug!(
                    "{}: stored {} samples for '{}'",
                    self.resource_id,
                    ch.memory.len(),
                    channel
                );
            }
        }
    }

    fn start_recall(&self, state: &mut State) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (channel, ch) in state.channels.iter_mut() {
            if !ch.recording.is_empty() {
                let output = std::mem::take(&mut ch.recording);
                handles.push(self.spawn_emitter(channel, output));
            }
        }
        handles
    }

    fn join_emitters(&self) {
        let handles = std::mem::take(
            &mut *self
                .emitters
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("{}: emitter thread panicked", self.resource_id);
            }
        }
    }
}

fn emit(shared: &Shared, channel: &str, output: Vec<u64>, depth: usize) {
    let mut state = shared.lock();
    for sample in output {
        loop {
            let Some(ch) = state.channels.get_mut(channel) else {
                return;
            };
            if ch.buffer.len() < depth {
                ch.buffer.push_back(sample);
                shared.changed.notify_all();
                break;
            }
            if ch.pending_reads == 0 {
                ch.dropped += 1;
                break;
            }
            state = shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
    if let Some(ch) = state.channels.get(channel) {
        if ch.dropped > 0 {
            tracing::warn!(
                "Channel '{}' dropped {} samples with no reader attached",
                channel,
                ch.dropped
            );
        }
    }
}

impl Device for LoopbackFifoDevice {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn get_register(&self, name: &str) -> DeviceResult<u64> {
        let (slot, channel) = self.register(name)?;
        let state = self.shared.lock();
        let ch = channel.and_then(|c| state.channels.get(c));
        Ok(match (slot, ch) {
            (RegisterSlot::Trigger, _) => state.trigger,
            (RegisterSlot::Store, _) => state.store,
            (RegisterSlot::Recall, _) => state.recall,
            (RegisterSlot::TransferSize, Some(ch)) => ch.transfer_size,
            (RegisterSlot::Direction, Some(ch)) => ch.direction,
            (RegisterSlot::DefaultLevel, Some(ch)) => ch.default_level,
            _ => return Err(DeviceError::UnknownRegister(name.to_string())),
        })
    }

    fn set_register(&self, name: &str, value: u64) -> DeviceResult<()> {
        let (slot, channel) = self.register(name)?;
        let mut state = self.shared.lock();
        state.mutations += 1;

        let previous = match slot {
            RegisterSlot::Trigger => Some(std::mem::replace(&mut state.trigger, value)),
            RegisterSlot::Store => Some(std::mem::replace(&mut state.store, value)),
            RegisterSlot::Recall => Some(std::mem::replace(&mut state.recall, value)),
            _ => None,
        };
        if let Some(previous) = previous {
            let rising = previous == 0 && value != 0;
            let falling = previous != 0 && value == 0;
            let handles = match slot {
                RegisterSlot::Trigger if rising => self.start_run(&mut state),
                RegisterSlot::Recall if rising => self.start_recall(&mut state),
                RegisterSlot::Store if rising => {
                    self.store_loaded(&mut state);
                    Vec::new()
                }
                _ => Vec::new(),
            };
            drop(state);
            if !handles.is_empty() {
                self.emitters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(handles);
            }
            if falling && !matches!(slot, RegisterSlot::Store) {
                self.join_emitters();
            }
            return Ok(());
        }

        let ch = channel
            .and_then(|c| state.channels.get_mut(c))
            .ok_or_else(|| DeviceError::UnknownRegister(name.to_string()))?;
        match slot {
            RegisterSlot::TransferSize => ch.transfer_size = value,
            RegisterSlot::Direction => ch.direction = value,
            RegisterSlot::DefaultLevel => ch.default_level = value,
            RegisterSlot::Trigger | RegisterSlot::Store | RegisterSlot::Recall => {}
        }
        Ok(())
    }

    fn get_fifo_capacity(&self, fifo: &str) -> DeviceResult<usize> {
        let (side, channel) = self.fifo(fifo)?;
        let state = self.shared.lock();
        let ch = state
            .channels
            .get(channel)
            .ok_or_else(|| DeviceError::UnknownFifo(fifo.to_string()))?;
        Ok(match side {
            FifoSide::HostToDevice => ch.write_capacity,
            FifoSide::DeviceToHost => ch.read_capacity,
        })
    }

    fn set_fifo_capacity(&self, fifo: &str, capacity: usize) -> DeviceResult<()> {
        let (side, channel) = self.fifo(fifo)?;
        if capacity > self.settings.max_capacity {
            return Err(DeviceError::CapacityExceeded {
                fifo: fifo.to_string(),
                capacity: self.settings.max_capacity,
                requested: capacity,
            });
        }
        let mut state = self.shared.lock();
        state.mutations += 1;
        let ch = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| DeviceError::UnknownFifo(fifo.to_string()))?;
        match side {
            FifoSide::HostToDevice => ch.write_capacity = capacity,
            FifoSide::DeviceToHost => ch.read_capacity = capacity,
        }
        Ok(())
    }

    fn write_fifo(&self, fifo: &str, samples: &[u64]) -> DeviceResult<()> {
        let (side, channel) = self.fifo(fifo)?;
        if let FifoSide::DeviceToHost = side {
            return Err(DeviceError::AccessViolation {
                register: fifo.to_string(),
                access: "write",
            });
        }
        let mut state = self.shared.lock();
        state.mutations += 1;
        let ch = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| DeviceError::UnknownFifo(fifo.to_string()))?;
        let requested = ch.loaded.len() + samples.len();
        if requested > ch.write_capacity {
            return Err(DeviceError::CapacityExceeded {
                fifo: fifo.to_string(),
                capacity: ch.write_capacity,
                requested,
            });
        }
        ch.loaded.extend_from_slice(samples);
        Ok(())
    }

    fn read_fifo(&self, fifo: &str, count: usize) -> DeviceResult<Vec<u64>> {
        self.read_fifo_attached(fifo, count, &|| {})
    }

    fn read_fifo_attached(
        &self,
        fifo: &str,
        count: usize,
        on_attached: &dyn Fn(),
    ) -> DeviceResult<Vec<u64>> {
        let (side, channel) = self.fifo(fifo)?;
        if let FifoSide::HostToDevice = side {
            return Err(DeviceError::AccessViolation {
                register: fifo.to_string(),
                access: "read",
            });
        }

        let deadline = Instant::now() + self.settings.read_timeout;
        let mut state = self.shared.lock();
        {
            let ch = state
                .channels
                .get_mut(channel)
                .ok_or_else(|| DeviceError::UnknownFifo(fifo.to_string()))?;
            if count > ch.read_capacity {
                return Err(DeviceError::CapacityExceeded {
                    fifo: fifo.to_string(),
                    capacity: ch.read_capacity,
                    requested: count,
                });
            }
            ch.pending_reads += 1;
        }
        // The pending read already holds back the emitter, so the lock can be released here.
        drop(state);
        on_attached();
        let mut state = self.shared.lock();

        let mut out = Vec::with_capacity(count);
        let result = loop {
            let Some(ch) = state.channels.get_mut(channel) else {
                break Err(DeviceError::UnknownFifo(fifo.to_string()));
            };
            while out.len() < count {
                match ch.buffer.pop_front() {
                    Some(sample) => out.push(sample),
                    None => break,
                }
            }
            self.shared.changed.notify_all();
            if out.len() == count {
                break Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                break Err(DeviceError::Timeout {
                    fifo: fifo.to_string(),
                    received: out.len(),
                    expected: count,
                });
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        if let Some(ch) = state.channels.get_mut(channel) {
            ch.pending_reads -= 1;
        }
        self.shared.changed.notify_all();
        result.map(|()| out)
    }
}
