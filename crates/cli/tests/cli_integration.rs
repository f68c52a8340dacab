// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use patternbench_core::device::Device;
use patternbench_core::link::LinkDevice;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

const BENCH: &str = r#"
schema_version: "1.0"
name: "cli-bench"
families:
  - id: glue
    kind: fifo_backed
    pipeline_offset: 3
  - id: caribou-apg
    kind: register_mapped
    pipeline_offset: 2
resources:
  - id: PXI1Slot5
    family: glue
    backend: loopback
  - id: PXI1Slot7
    family: glue
    backend: loopback
  - id: car
    family: caribou-apg
    backend: virtual
    channel: apg
    registers: [divider_cycles]
    config: { dut: nibble_adder }
signals:
  - { name: mclk, bit: 0, direction: to_device, resource: PXI1Slot5, channel: se_io }
  - { name: din, bit: 1, direction: to_device, resource: PXI1Slot5, channel: se_io }
  - { name: aux, bit: 0, direction: to_device, resource: PXI1Slot7, channel: se_io }
"#;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write temp file");
    path
}

fn patternbench() -> Command {
    Command::new(env!("CARGO_BIN_EXE_patternbench"))
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_cli_help() {
    let output = patternbench()
        .arg("--help")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("PatternBench"));
}

#[test]
fn test_validate_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let good = write(dir.path(), "bench.yaml", BENCH);
    let bad = write(
        dir.path(),
        "bad.yaml",
        &BENCH.replace("family: caribou-apg", "family: missing"),
    );

    let status = patternbench()
        .args(["validate", "--bench", path_str(&good)])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let status = patternbench()
        .args(["validate", "--bench", path_str(&bad)])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_run_fifo_persists_captures_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(dir.path(), "bench.yaml", BENCH);
    let pattern = write(dir.path(), "scan.glue", "0, 1, 2, 3, 2, 1");
    let out_dir = dir.path().join("captures");
    let report = dir.path().join("report.json");

    let status = patternbench()
        .args([
            "run",
            "--bench",
            path_str(&bench),
            "--pattern",
            &format!("PXI1Slot5:se_io={}", path_str(&pattern)),
            "--tag",
            "scan",
            "--output-dir",
            path_str(&out_dir),
            "--report",
            path_str(&report),
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let artifact = out_dir.join("scan_PXI1Slot5_se_io.glue");
    assert_eq!(std::fs::read_to_string(artifact).unwrap(), "0, 1, 2, 3, 2, 1");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["status"], "pass");
    assert_eq!(json["inputs"][0]["samples"], 6);
    assert_eq!(json["inputs"][0]["sha256"].as_str().unwrap().len(), 64);
    assert_eq!(json["captures"][0]["data"], serde_json::json!([0, 1, 2, 3, 2, 1]));
}

#[test]
fn test_run_register_mapped_with_time_scale() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(dir.path(), "bench.yaml", BENCH);
    // time scale 2 doubles each sample; the nibble adder maps 0x21 -> 3, 0xff -> 30
    let pattern = write(dir.path(), "adder.glue", "33, 255");
    let report = dir.path().join("report.json");

    let status = patternbench()
        .args([
            "run",
            "--bench",
            path_str(&bench),
            "--pattern",
            &format!("car:apg={}", path_str(&pattern)),
            "--time-scale",
            "2",
            "--descale",
            "--report",
            path_str(&report),
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["captures"][0]["data"], serde_json::json!([3, 30]));
    assert_eq!(json["captures"][0]["time_scale"], 2);
    assert_eq!(json["captures"][0]["descaled"], true);
}

#[test]
fn test_run_cross_device_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(dir.path(), "bench.yaml", BENCH);
    let a = write(dir.path(), "a.glue", "1, 2");
    let b = write(dir.path(), "b.glue", "3, 4");
    let report = dir.path().join("report.json");

    let status = patternbench()
        .args([
            "run",
            "--bench",
            path_str(&bench),
            "--pattern",
            &format!("PXI1Slot5:se_io={}", path_str(&a)),
            "--pattern",
            &format!("PXI1Slot7:se_io={}", path_str(&b)),
            "--report",
            path_str(&report),
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["status"], "config_error");
    assert!(json["message"].as_str().unwrap().contains("PXI1Slot7"));
}

#[test]
fn test_run_transport_failure_is_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(
        dir.path(),
        "bench.yaml",
        &BENCH.replacen(
            "backend: loopback",
            "backend: loopback\n    config: { initial_capacity: 2, max_capacity: 4 }",
            1,
        ),
    );
    let pattern = write(dir.path(), "long.glue", "1, 2, 3, 4, 5, 6, 7, 8, 9, 10");
    let report = dir.path().join("report.json");

    let status = patternbench()
        .args([
            "run",
            "--bench",
            path_str(&bench),
            "--pattern",
            &format!("PXI1Slot5:se_io={}", path_str(&pattern)),
            "--report",
            path_str(&report),
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["status"], "runtime_error");
    assert!(json["message"].as_str().unwrap().contains("load"));
    assert_eq!(json["bench_sha256"].as_str().unwrap().len(), 64);
    assert!(json["captures"].as_array().unwrap().is_empty());
}

#[test]
fn test_run_missing_pattern_file() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(dir.path(), "bench.yaml", BENCH);
    let status = patternbench()
        .args([
            "run",
            "--bench",
            path_str(&bench),
            "--pattern",
            "PXI1Slot5:se_io=/nonexistent/scan.glue",
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_serve_virtual_device_once() {
    let dir = tempfile::tempdir().unwrap();
    let bench = write(dir.path(), "bench.yaml", BENCH);
    let port = free_port();

    let mut child = patternbench()
        .args([
            "serve",
            "--bench",
            path_str(&bench),
            "--resource",
            "car",
            "--port",
            &port.to_string(),
            "--once",
        ])
        .spawn()
        .unwrap();

    let addr = format!("127.0.0.1:{}", port);
    let deadline = Instant::now() + Duration::from_secs(10);
    let link = loop {
        match LinkDevice::connect("car", &addr, "Caribou") {
            Ok(link) => break link,
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = child.kill();
                panic!("could not connect to served device: {}", e);
            }
        }
    };

    link.set_register("divider_cycles", 12).unwrap();
    assert_eq!(link.get_register("divider_cycles").unwrap(), 12);
    drop(link);

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}
