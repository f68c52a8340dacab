// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use patternbench_config::{BenchManifest, FamilyKind, SignalDirection};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut dir = std::env::temp_dir();
    dir.push("patternbench-config-tests");
    dir.push(format!("{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

#[test]
fn test_minimal_manifest_defaults() {
    let yaml = r#"
name: "minimal"
families:
  - id: glue
    kind: glue
    pipeline_offset: 3
resources:
  - id: PXI1Slot5
    family: glue
    backend: sim_fifo
"#;
    let bench = BenchManifest::from_yaml(yaml).unwrap();
    assert_eq!(bench.schema_version, "1.0");
    assert_eq!(bench.families[0].kind, FamilyKind::FifoBacked);
    assert!(!bench.families[0].per_bit_direction);
    assert_eq!(
        bench.families[0].fifo_registers.write_fifo,
        "{channel}_fifo_from_pc"
    );
    assert_eq!(bench.families[0].apg_registers.push, "write_channel");
    assert!(bench.signals.is_empty());
}

#[test]
fn test_unknown_fields_rejected() {
    let yaml = r#"
name: "typo"
families:
  - id: glue
    kind: fifo_backed
    pipeline_ofset: 3
resources: []
"#;
    assert!(BenchManifest::from_yaml(yaml).is_err());
}

#[test]
fn test_io_spec_import_resolves_relative_to_manifest() {
    let dir = temp_dir("iospec");
    std::fs::write(
        dir.join("glue.iospec"),
        "// name,dir,bit\nS_CLK,O,0\nS_DIN,O,1\nS_DOUT,I,2\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("mem_map.txt"),
        "status,0x400000000,0,32,1,0\nrun,0x400000000,4,32,1,1\n",
    )
    .unwrap();
    let manifest_path = dir.join("bench.yaml");
    std::fs::write(
        &manifest_path,
        r#"
schema_version: "1.0"
name: "imported"
families:
  - id: glue
    kind: fifo_backed
    pipeline_offset: 3
    per_bit_direction: true
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
    register_map: mem_map.txt
signals:
  - { name: rstn, bit: 7, direction: to_device, default_level: 1, resource: PXI1Slot5, channel: se_io }
io_specs:
  - { path: glue.iospec, resource: PXI1Slot5, channel: se_io }
"#,
    )
    .unwrap();

    let bench = BenchManifest::from_file(&manifest_path).unwrap();
    assert_eq!(bench.signals.len(), 4);
    assert!(bench.io_specs.is_empty());
    let dout = bench.signals.iter().find(|s| s.name == "S_DOUT").unwrap();
    assert_eq!(dout.direction, SignalDirection::FromDevice);
    assert_eq!(dout.bit, 2);

    let map_path = bench.resource("car").unwrap().register_map.clone().unwrap();
    assert!(PathBuf::from(&map_path).exists());
}

#[test]
fn test_duplicate_signal_rejected() {
    let yaml = r#"
name: "dup"
families:
  - id: glue
    kind: fifo_backed
    pipeline_offset: 3
resources:
  - id: r
    family: glue
    backend: loopback
signals:
  - { name: a, bit: 0, direction: to_device, resource: r, channel: c }
  - { name: a, bit: 1, direction: to_device, resource: r, channel: c }
"#;
    let err = BenchManifest::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("Duplicate signal 'a'"));
}
