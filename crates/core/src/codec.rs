// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::pattern::PatternId;
use patternbench_config::parse_u64;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Sample {index} is not an integer: '{token}'")]
    BadSample { index: usize, token: String },
    #[error("Artifact I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Converts sample vectors to and from a persisted text form.
pub trait WaveformCodec {
    fn extension(&self) -> &str;
    fn decode(&self, text: &str) -> Result<Vec<u64>, CodecError>;
    fn encode(&self, samples: &[u64]) -> String;
}

/// Comma-separated unsigned integers (decimal or `0x` hex), one pattern per file.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlueTextCodec;

impl WaveformCodec for GlueTextCodec {
    fn extension(&self) -> &str {
        "glue"
    }

    fn decode(&self, text: &str) -> Result<Vec<u64>, CodecError> {
        text.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .enumerate()
            .map(|(index, token)| {
                parse_u64(token).map_err(|_| CodecError::BadSample {
                    index,
                    token: token.to_string(),
                })
            })
            .collect()
    }

    fn encode(&self, samples: &[u64]) -> String {
        samples
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `<tag>_<resource_id>_<channel_id>.<ext>`
pub fn artifact_name(tag: &str, id: &PatternId, extension: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        tag, id.resource_id, id.channel_id, extension
    )
}

pub fn read_artifact<P: AsRef<Path>>(
    path: P,
    codec: &dyn WaveformCodec,
) -> Result<Vec<u64>, CodecError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    codec.decode(&text)
}

pub fn write_artifact(
    path: &Path,
    samples: &[u64],
    codec: &dyn WaveformCodec,
) -> Result<(), CodecError> {
    std::fs::write(path, codec.encode(samples)).map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })
}
