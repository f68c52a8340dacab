// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::str::FromStr;

/// Behavioural model of the device under test inside a simulated bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DutModel {
    #[default]
    Echo,
    /// Four-bit carry adder: output is low nibble plus high nibble.
    NibbleAdder,
}

impl DutModel {
    pub fn apply(self, sample: u64) -> u64 {
        match self {
            DutModel::Echo => sample,
            DutModel::NibbleAdder => (sample & 0xf) + ((sample >> 4) & 0xf),
        }
    }
}

impl FromStr for DutModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo" | "loopback" => Ok(DutModel::Echo),
            "nibble_adder" | "cadder" => Ok(DutModel::NibbleAdder),
            other => Err(format!("unknown DUT model '{}'", other)),
        }
    }
}
