// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{EngineError, EngineResult};
use patternbench_config::{BenchManifest, SignalDescriptor, SignalDirection};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalInfo {
    pub bit: u8,
    pub direction: SignalDirection,
    pub default_level: u8,
    pub resource_id: String,
    pub channel_id: String,
}

/// Setup-time signal metadata: which bit of which channel carries each named signal.
#[derive(Debug, Clone, Default)]
pub struct IoMap {
    signals: BTreeMap<String, SignalInfo>,
}

impl IoMap {
    pub fn from_descriptors(descriptors: &[SignalDescriptor]) -> EngineResult<Self> {
        let mut signals = BTreeMap::new();
        let mut bits: HashMap<(&str, &str, u8), &str> = HashMap::new();

        for desc in descriptors {
            if desc.bit >= 64 {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signal '{}' uses bit {} outside the 64-bit sample word",
                    desc.name, desc.bit
                )));
            }
            if let Some(other) = bits.insert(
                (desc.resource.as_str(), desc.channel.as_str(), desc.bit),
                desc.name.as_str(),
            ) {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signals '{}' and '{}' share bit {} on {}/{}",
                    other, desc.name, desc.bit, desc.resource, desc.channel
                )));
            }
            let info = SignalInfo {
                bit: desc.bit,
                direction: desc.direction,
                default_level: desc.default_level.min(1),
                resource_id: desc.resource.clone(),
                channel_id: desc.channel.clone(),
            };
            if signals.insert(desc.name.clone(), info).is_some() {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signal '{}' is mapped twice",
                    desc.name
                )));
            }
        }

        Ok(Self { signals })
    }

    pub fn from_manifest(bench: &BenchManifest) -> EngineResult<Self> {
        Self::from_descriptors(&bench.signals)
    }

    /// A copy holding only the signals of resources accepted by `keep`.
    pub fn restricted<F: Fn(&str) -> bool>(&self, keep: F) -> Self {
        Self {
            signals: self
                .signals
                .iter()
                .filter(|(_, s)| keep(&s.resource_id))
                .map(|(n, s)| (n.clone(), s.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SignalInfo> {
        self.signals.get(name)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Distinct resources referenced by any signal, sorted.
    pub fn resources(&self) -> BTreeSet<&str> {
        self.signals
            .values()
            .map(|s| s.resource_id.as_str())
            .collect()
    }

    /// Distinct channels of `resource_id`, sorted.
    pub fn channels(&self, resource_id: &str) -> BTreeSet<&str> {
        self.signals
            .values()
            .filter(|s| s.resource_id == resource_id)
            .map(|s| s.channel_id.as_str())
            .collect()
    }

    pub fn signals_on<'a>(
        &'a self,
        resource_id: &'a str,
        channel_id: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a SignalInfo)> + 'a {
        self.signals
            .iter()
            .filter(move |(_, s)| s.resource_id == resource_id && s.channel_id == channel_id)
            .map(|(name, s)| (name.as_str(), s))
    }

    /// Bits driven into the device under test.
    pub fn direction_mask(&self, resource_id: &str, channel_id: &str) -> u64 {
        self.signals_on(resource_id, channel_id)
            .filter(|(_, s)| s.direction == SignalDirection::ToDevice)
            .fold(0, |mask, (_, s)| mask | (1 << s.bit))
    }

    pub fn default_mask(&self, resource_id: &str, channel_id: &str) -> u64 {
        self.signals_on(resource_id, channel_id)
            .filter(|(_, s)| s.default_level != 0)
            .fold(0, |mask, (_, s)| mask | (1 << s.bit))
    }

    pub fn has_mixed_direction(&self, resource_id: &str, channel_id: &str) -> bool {
        let mut to_device = false;
        let mut from_device = false;
        for (_, s) in self.signals_on(resource_id, channel_id) {
            match s.direction {
                SignalDirection::ToDevice => to_device = true,
                SignalDirection::FromDevice => from_device = true,
            }
        }
        to_device && from_device
    }
}
