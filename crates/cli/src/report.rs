// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use patternbench_core::CaptureResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pass,
    ConfigError,
    RuntimeError,
}

#[derive(Debug, Serialize)]
pub struct InputRecord {
    pub resource: String,
    pub channel: String,
    pub path: PathBuf,
    pub sha256: String,
    pub samples: usize,
}

#[derive(Debug, Serialize)]
pub struct CaptureRecord {
    pub resource: String,
    pub channel: String,
    pub samples: usize,
    pub sample_period_ns: u128,
    pub time_scale: u32,
    pub descaled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    pub data: Vec<u64>,
}

impl CaptureRecord {
    pub fn new(capture: &CaptureResult, artifact: Option<PathBuf>) -> Self {
        Self {
            resource: capture.origin.resource_id.clone(),
            channel: capture.origin.channel_id.clone(),
            samples: capture.data.len(),
            sample_period_ns: capture.sample_period.as_nanos(),
            time_scale: capture.time_scale,
            descaled: capture.descaled,
            artifact,
            data: capture.data.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub report_schema_version: String,
    pub bench: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bench_sha256: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub inputs: Vec<InputRecord>,
    pub captures: Vec<CaptureRecord>,
}

impl RunReport {
    pub fn new(bench: &Path) -> Self {
        let bench_sha256 = match sha256_file(bench) {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::warn!("Bench digest unavailable: {:#}", e);
                None
            }
        };
        Self {
            report_schema_version: REPORT_SCHEMA_VERSION.to_string(),
            bench: bench.to_path_buf(),
            bench_sha256,
            status: RunStatus::Pass,
            message: None,
            inputs: Vec::new(),
            captures: Vec::new(),
        }
    }

    pub fn fail(&mut self, status: RunStatus, message: impl Into<String>) {
        self.status = status;
        self.message = Some(message.into());
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create report dir {:?}", parent))?;
            }
        }
        let f = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report {:?}", path))?;
        serde_json::to_writer_pretty(f, self)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        Ok(())
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.glue");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(sha256_file(&dir.path().join("missing.glue")).is_err());
    }

    #[test]
    fn test_unreadable_bench_omits_digest() {
        let report = RunReport::new(Path::new("/nonexistent/bench.yaml"));
        assert!(report.bench_sha256.is_none());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("bench_sha256").is_none());
        assert_eq!(json["status"], "pass");
    }
}
