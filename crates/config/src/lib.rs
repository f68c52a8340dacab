// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod legacy;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub use legacy::{parse_iospec, parse_register_map, LegacyParseError, RegisterMapEntry};

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    #[serde(alias = "fifo", alias = "glue")]
    FifoBacked,
    #[serde(alias = "register", alias = "apg")]
    RegisterMapped,
}

fn default_trigger_register() -> String {
    "Run_Pattern".to_string()
}

fn default_transfer_size_register() -> String {
    "{channel}_Transfer_Size".to_string()
}

fn default_direction_register() -> String {
    "{channel}_Data_Dir".to_string()
}

fn default_level_register() -> String {
    "{channel}_Data_Default".to_string()
}

fn default_write_fifo() -> String {
    "{channel}_fifo_from_pc".to_string()
}

fn default_read_fifo() -> String {
    "{channel}_fifo_to_pc".to_string()
}

fn default_store_register() -> String {
    "Write_to_Mem".to_string()
}

fn default_recall_register() -> String {
    "Read_from_Mem".to_string()
}

/// Register and FIFO names of a FIFO-backed bitstream. `{channel}` expands to the channel id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FifoRegisterNames {
    #[serde(default = "default_trigger_register")]
    pub trigger: String,
    #[serde(default = "default_transfer_size_register")]
    pub transfer_size: String,
    #[serde(default = "default_direction_register")]
    pub direction: String,
    #[serde(default = "default_level_register")]
    pub default_level: String,
    #[serde(default = "default_write_fifo")]
    pub write_fifo: String,
    #[serde(default = "default_read_fifo")]
    pub read_fifo: String,
    /// Strobe that moves the loaded write FIFO into on-device pattern memory.
    #[serde(default = "default_store_register")]
    pub store: String,
    /// Strobe that streams the last memory-mode capture into the read FIFO.
    #[serde(default = "default_recall_register")]
    pub recall: String,
}

impl Default for FifoRegisterNames {
    fn default() -> Self {
        Self {
            trigger: default_trigger_register(),
            transfer_size: default_transfer_size_register(),
            direction: default_direction_register(),
            default_level: default_level_register(),
            write_fifo: default_write_fifo(),
            read_fifo: default_read_fifo(),
            store: default_store_register(),
            recall: default_recall_register(),
        }
    }
}

fn default_push_register() -> String {
    "write_channel".to_string()
}

fn default_pop_register() -> String {
    "read_channel".to_string()
}

fn default_sample_count_register() -> String {
    "n_samples".to_string()
}

fn default_run_register() -> String {
    "run".to_string()
}

fn default_status_register() -> String {
    "status".to_string()
}

fn default_clear_register() -> String {
    "clear".to_string()
}

/// Control surface of a register-mapped arbitrary pattern generator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApgRegisterNames {
    #[serde(default = "default_push_register")]
    pub push: String,
    #[serde(default = "default_pop_register")]
    pub pop: String,
    #[serde(default = "default_sample_count_register")]
    pub sample_count: String,
    #[serde(default = "default_run_register")]
    pub run: String,
    #[serde(default = "default_status_register")]
    pub status: String,
    #[serde(default = "default_clear_register")]
    pub clear: String,
}

impl Default for ApgRegisterNames {
    fn default() -> Self {
        Self {
            push: default_push_register(),
            pop: default_pop_register(),
            sample_count: default_sample_count_register(),
            run: default_run_register(),
            status: default_status_register(),
            clear: default_clear_register(),
        }
    }
}

fn default_sample_period_ns() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FamilyDescriptor {
    pub id: String,
    pub kind: FamilyKind,
    /// Leading samples of every raw capture that precede the first valid sample.
    pub pipeline_offset: u32,
    #[serde(default = "default_sample_period_ns")]
    pub sample_period_ns: u64,
    /// Whether one channel may mix to-device and from-device bits.
    #[serde(default)]
    pub per_bit_direction: bool,
    #[serde(default)]
    pub fifo_registers: FifoRegisterNames,
    #[serde(default)]
    pub apg_registers: ApgRegisterNames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Simulated FIFO bitstream whose device under test is a configurable model.
    #[serde(alias = "sim_fifo")]
    Loopback,
    /// Simulated register file, optionally with a pattern generator block.
    #[serde(alias = "virtual_caribou", alias = "twin")]
    Virtual,
    /// Control daemon reached over TCP.
    #[serde(alias = "peary")]
    Link,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResourceDescriptor {
    pub id: String,
    pub family: String,
    pub backend: BackendKind,
    /// Logical channel served by a register-mapped resource.
    #[serde(default)]
    pub channel: Option<String>,
    /// Extra top-level registers for a virtual register file.
    #[serde(default)]
    pub registers: Vec<String>,
    /// Legacy `mem_map.txt` describing the register file.
    #[serde(default)]
    pub register_map: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl ResourceDescriptor {
    /// Register-mapped resources serve one channel; it defaults to the resource id.
    pub fn channel_id(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.id)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    /// Driven by the generator into the device under test.
    #[serde(alias = "drive", alias = "output")]
    ToDevice,
    /// Produced by the device under test and captured.
    #[serde(alias = "capture", alias = "input")]
    FromDevice,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SignalDescriptor {
    pub name: String,
    pub bit: u8,
    pub direction: SignalDirection,
    #[serde(default)]
    pub default_level: u8,
    pub resource: String,
    pub channel: String,
}

/// Import of a legacy iospec text file into the signal list.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IoSpecImport {
    pub path: String,
    pub resource: String,
    pub channel: String,
}

fn default_poll_attempts() -> u32 {
    10_000
}

fn default_poll_interval_us() -> u64 {
    100
}

/// Bound on the register-mapped engine's busy wait.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdlePollConfig {
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_us")]
    pub interval_us: u64,
}

impl Default for IdlePollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            interval_us: default_poll_interval_us(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BenchManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub idle_poll: IdlePollConfig,
    pub families: Vec<FamilyDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub signals: Vec<SignalDescriptor>,
    #[serde(default)]
    pub io_specs: Vec<IoSpecImport>,
}

impl BenchManifest {
    /// Load a manifest, resolving `io_specs` and `register_map` paths relative to its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bench manifest at {:?}", path))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_in(&content, base)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_in(yaml, Path::new("."))
    }

    fn from_yaml_in(yaml: &str, base: &Path) -> Result<Self> {
        let mut manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Bench Manifest YAML")?;

        for import in std::mem::take(&mut manifest.io_specs) {
            let spec_path = base.join(&import.path);
            let text = std::fs::read_to_string(&spec_path)
                .with_context(|| format!("Failed to read iospec {:?}", spec_path))?;
            let signals = parse_iospec(&text, &import.resource, &import.channel)
                .with_context(|| format!("Failed to parse iospec {:?}", spec_path))?;
            tracing::debug!(
                "Imported {} signals from {:?} into {}/{}",
                signals.len(),
                spec_path,
                import.resource,
                import.channel
            );
            manifest.signals.extend(signals);
        }

        for resource in &mut manifest.resources {
            if let Some(map) = &resource.register_map {
                resource.register_map = Some(base.join(map).to_string_lossy().into_owned());
            }
        }

        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SUPPORTED_SCHEMA_VERSION
            );
        }

        if self.name.trim().is_empty() {
            anyhow::bail!("Bench 'name' cannot be empty");
        }

        if self.idle_poll.max_attempts == 0 {
            anyhow::bail!("Limit 'idle_poll.max_attempts' must be greater than zero");
        }

        let mut family_ids = HashSet::new();
        for family in &self.families {
            if !family_ids.insert(family.id.as_str()) {
                anyhow::bail!("Duplicate family id '{}'", family.id);
            }
        }

        let mut resource_ids = HashSet::new();
        for resource in &self.resources {
            if !resource_ids.insert(resource.id.as_str()) {
                anyhow::bail!("Duplicate resource id '{}'", resource.id);
            }
            if !family_ids.contains(resource.family.as_str()) {
                anyhow::bail!(
                    "Resource '{}' references unknown family '{}'",
                    resource.id,
                    resource.family
                );
            }
            if resource.backend == BackendKind::Link
                && (resource.config_str("host").is_none() || resource.config_u64("port").is_none())
            {
                anyhow::bail!(
                    "Link resource '{}' requires 'host' and 'port' in 'config'",
                    resource.id
                );
            }
        }

        let mut signal_names = HashSet::new();
        for signal in &self.signals {
            if !signal_names.insert(signal.name.as_str()) {
                anyhow::bail!("Duplicate signal '{}'", signal.name);
            }
            if signal.bit >= 64 {
                anyhow::bail!(
                    "Signal '{}' uses bit {}, samples are 64 bits wide",
                    signal.name,
                    signal.bit
                );
            }
            if signal.default_level > 1 {
                anyhow::bail!(
                    "Signal '{}' has default_level {}, expected 0 or 1",
                    signal.name,
                    signal.default_level
                );
            }
        }

        Ok(())
    }

    pub fn family(&self, id: &str) -> Option<&FamilyDescriptor> {
        self.families.iter().find(|f| f.id == id)
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn family_of(&self, resource_id: &str) -> Option<&FamilyDescriptor> {
        self.resource(resource_id)
            .and_then(|r| self.family(&r.family))
    }
}

/// Parse an integer that may carry a `0x` prefix.
pub fn parse_u64(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).with_context(|| format!("Invalid hex value '{}'", s))
    } else {
        trimmed
            .parse::<u64>()
            .with_context(|| format!("Invalid value '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENCH: &str = r#"
schema_version: "1.0"
name: "glue-bench"
families:
  - id: glue
    kind: fifo_backed
    pipeline_offset: 3
    per_bit_direction: true
  - id: caribou
    kind: apg
    pipeline_offset: 2
    sample_period_ns: 10
resources:
  - id: PXI1Slot5
    family: glue
    backend: loopback
  - id: car
    family: caribou
    backend: virtual
    channel: apg
signals:
  - { name: mclk, bit: 0, direction: to_device, resource: PXI1Slot5, channel: se_io }
  - { name: dout, bit: 1, direction: capture, resource: PXI1Slot5, channel: se_io }
"#;

    #[test]
    fn test_valid_bench() {
        let bench = BenchManifest::from_yaml(BENCH).unwrap();
        assert_eq!(bench.families.len(), 2);
        assert_eq!(bench.families[1].kind, FamilyKind::RegisterMapped);
        assert_eq!(bench.families[0].sample_period_ns, 100);
        assert_eq!(bench.families[0].fifo_registers.trigger, "Run_Pattern");
        assert_eq!(bench.families[0].fifo_registers.store, "Write_to_Mem");
        assert_eq!(bench.families[0].fifo_registers.recall, "Read_from_Mem");
        assert_eq!(bench.signals[1].direction, SignalDirection::FromDevice);
        assert_eq!(bench.idle_poll, IdlePollConfig::default());
        assert_eq!(bench.resource("car").unwrap().channel_id(), "apg");
        assert_eq!(bench.family_of("car").unwrap().pipeline_offset, 2);
    }

    #[test]
    fn test_unknown_family_reference() {
        let yaml = BENCH.replace("family: caribou", "family: nope");
        let err = BenchManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown family 'nope'"));
    }

    #[test]
    fn test_invalid_version() {
        let yaml = BENCH.replace("\"1.0\"", "\"2.0\"");
        let err = BenchManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_bit_out_of_range() {
        let yaml = BENCH.replace("bit: 1,", "bit: 64,");
        let err = BenchManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("64 bits wide"));
    }

    #[test]
    fn test_link_requires_host_and_port() {
        let yaml = BENCH.replace("backend: virtual", "backend: link");
        let err = BenchManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("'host' and 'port'"));
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0x400000000").unwrap(), 0x4_0000_0000);
        assert_eq!(parse_u64(" 42 ").unwrap(), 42);
        assert!(parse_u64("0xZZ").is_err());
    }
}
