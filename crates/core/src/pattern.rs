// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::codec::{CodecError, WaveformCodec};
use crate::io_map::IoMap;
use crate::{EngineError, EngineResult};
use patternbench_config::SignalDirection;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Played into the device.
    Write,
    /// Captured from the device.
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct PatternId {
    pub resource_id: String,
    pub channel_id: String,
}

impl PatternId {
    pub fn new(resource_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.channel_id)
    }
}

/// An immutable per-cycle sample vector addressed to one resource channel.
///
/// Samples are opaque to the engines; only the generator helpers below look at bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    id: PatternId,
    direction: Direction,
    samples: Vec<u64>,
}

impl Pattern {
    pub fn new(id: PatternId, direction: Direction, samples: Vec<u64>) -> Self {
        Self {
            id,
            direction,
            samples,
        }
    }

    /// A pattern to be played into `resource`/`channel`.
    pub fn write(
        resource_id: impl Into<String>,
        channel_id: impl Into<String>,
        samples: Vec<u64>,
    ) -> Self {
        Self::new(
            PatternId::new(resource_id, channel_id),
            Direction::Write,
            samples,
        )
    }

    /// Load a write pattern from a codec artifact on disk.
    pub fn from_artifact<P: AsRef<Path>>(
        path: P,
        codec: &dyn WaveformCodec,
        id: PatternId,
    ) -> Result<Self, CodecError> {
        let samples = crate::codec::read_artifact(path, codec)?;
        Ok(Self::new(id, Direction::Write, samples))
    }

    pub fn id(&self) -> &PatternId {
        &self.id
    }

    pub fn resource_id(&self) -> &str {
        &self.id.resource_id
    }

    pub fn channel_id(&self) -> &str {
        &self.id.channel_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The samples as transported at `time_scale`.
    pub fn scaled(&self, time_scale: u32) -> Vec<u64> {
        scale_samples(&self.samples, time_scale)
    }

    /// Build a write pattern from per-signal levels.
    ///
    /// Every wave must name a to-device signal of the channel. The pattern is as long as the
    /// longest wave; missing cycles and unnamed signals hold their default level.
    pub fn from_waves(
        io_map: &IoMap,
        resource_id: &str,
        channel_id: &str,
        waves: &BTreeMap<String, Vec<u8>>,
    ) -> EngineResult<Self> {
        for name in waves.keys() {
            let Some(info) = io_map.get(name) else {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signal '{}' is not in the IO map",
                    name
                )));
            };
            if info.resource_id != resource_id || info.channel_id != channel_id {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signal '{}' belongs to {}/{}, not {}/{}",
                    name, info.resource_id, info.channel_id, resource_id, channel_id
                )));
            }
            if info.direction != SignalDirection::ToDevice {
                return Err(EngineError::ConfigurationMismatch(format!(
                    "signal '{}' is captured from the device and cannot be driven",
                    name
                )));
            }
        }

        let len = waves.values().map(Vec::len).max().unwrap_or(0);
        let mut samples = vec![0u64; len];
        for (name, info) in io_map.signals_on(resource_id, channel_id) {
            if info.direction != SignalDirection::ToDevice {
                continue;
            }
            let wave = waves.get(name).map(Vec::as_slice).unwrap_or(&[]);
            for (cycle, sample) in samples.iter_mut().enumerate() {
                let level = wave.get(cycle).copied().unwrap_or(info.default_level);
                if level != 0 {
                    *sample |= 1 << info.bit;
                }
            }
        }

        Ok(Self::write(resource_id, channel_id, samples))
    }

    /// Split the pattern back into per-signal levels for every signal of its channel.
    pub fn waves(&self, io_map: &IoMap) -> BTreeMap<String, Vec<u8>> {
        io_map
            .signals_on(self.resource_id(), self.channel_id())
            .map(|(name, info)| {
                let wave = self
                    .samples
                    .iter()
                    .map(|s| ((s >> info.bit) & 1) as u8)
                    .collect();
                (name.to_string(), wave)
            })
            .collect()
    }
}

/// Repeat every sample `time_scale` times.
pub fn scale_samples(samples: &[u64], time_scale: u32) -> Vec<u64> {
    let factor = time_scale as usize;
    let mut out = Vec::with_capacity(samples.len() * factor);
    for &s in samples {
        out.extend(std::iter::repeat(s).take(factor));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use patternbench_config::SignalDescriptor;

    fn io_map() -> IoMap {
        let sig = |name: &str, bit, direction, default_level| SignalDescriptor {
            name: name.to_string(),
            bit,
            direction,
            default_level,
            resource: "fpga".to_string(),
            channel: "se_io".to_string(),
        };
        IoMap::from_descriptors(&[
            sig("S_CLK", 0, SignalDirection::ToDevice, 0),
            sig("S_DIN", 1, SignalDirection::ToDevice, 0),
            sig("S_RSTN", 3, SignalDirection::ToDevice, 1),
            sig("S_DOUT", 2, SignalDirection::FromDevice, 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_scale_samples() {
        assert_eq!(
            scale_samples(&[0, 1, 0, 1], 3),
            vec![0, 0, 0, 1, 1, 1, 0, 0, 0, 1, 1, 1]
        );
        assert_eq!(scale_samples(&[5, 6], 1), vec![5, 6]);
    }

    #[test]
    fn test_from_waves_pads_with_defaults() {
        let map = io_map();
        let waves = BTreeMap::from([
            ("S_CLK".to_string(), vec![0, 1, 0, 1]),
            ("S_DIN".to_string(), vec![1, 1]),
        ]);
        let pattern = Pattern::from_waves(&map, "fpga", "se_io", &waves).unwrap();
        assert_eq!(pattern.samples(), &[0b1010, 0b1011, 0b1000, 0b1001]);
        assert_eq!(pattern.direction(), Direction::Write);

        let back = pattern.waves(&map);
        assert_eq!(back["S_CLK"], vec![0, 1, 0, 1]);
        assert_eq!(back["S_DIN"], vec![1, 1, 0, 0]);
        assert_eq!(back["S_DOUT"], vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_from_waves_rejects_captured_signal() {
        let waves = BTreeMap::from([("S_DOUT".to_string(), vec![1])]);
        let err = Pattern::from_waves(&io_map(), "fpga", "se_io", &waves).unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationMismatch(_)));
    }

    #[test]
    fn test_from_waves_rejects_foreign_channel() {
        let waves = BTreeMap::from([("S_CLK".to_string(), vec![1])]);
        let err = Pattern::from_waves(&io_map(), "fpga", "other", &waves).unwrap_err();
        assert!(err.to_string().contains("belongs to fpga/se_io"));
    }
}
