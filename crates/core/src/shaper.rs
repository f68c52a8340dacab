// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Alignment of raw captures to their input pattern.
//!
//! Every raw capture starts with `pipeline_offset` samples emitted between trigger and the first
//! valid output. The shaper drops them and optionally undoes time scaling by decimation.

use crate::codec::{artifact_name, write_artifact, CodecError, WaveformCodec};
use crate::pattern::{Direction, Pattern, PatternId};
use crate::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub data: Vec<u64>,
    /// Period of one sample in `data`.
    pub sample_period: Duration,
    pub origin: PatternId,
    pub time_scale: u32,
    /// Whether `data` has been decimated back to the unscaled length.
    pub descaled: bool,
}

impl CaptureResult {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_pattern(self) -> Pattern {
        Pattern::new(self.origin, Direction::Read, self.data)
    }

    /// Write the capture as `<tag>_<resource>_<channel>.<ext>` inside `dir`.
    pub fn persist(
        &self,
        tag: &str,
        dir: &Path,
        codec: &dyn WaveformCodec,
    ) -> Result<PathBuf, CodecError> {
        let path = dir.join(artifact_name(tag, &self.origin, codec.extension()));
        write_artifact(&path, &self.data, codec)?;
        tracing::debug!("Persisted {} samples to {:?}", self.data.len(), path);
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSpec {
    /// Transported length, after time scaling.
    pub requested_len: usize,
    pub pipeline_offset: u32,
    pub time_scale: u32,
    pub descale: bool,
}

pub fn shape(
    raw: Vec<u64>,
    spec: ShapeSpec,
    origin: PatternId,
    base_period: Duration,
) -> EngineResult<CaptureResult> {
    let offset = spec.pipeline_offset as usize;
    let expected = spec.requested_len + offset;
    if raw.len() != expected {
        return Err(EngineError::CaptureLengthMismatch {
            expected,
            actual: raw.len(),
        });
    }

    let mut data = raw;
    data.drain(..offset);

    let scale = spec.time_scale.max(1);
    let (data, sample_period) = if spec.descale && scale > 1 {
        if spec.requested_len % scale as usize != 0 {
            return Err(EngineError::UndecimatableCapture {
                len: spec.requested_len,
                time_scale: scale,
            });
        }
        let decimated = data.into_iter().step_by(scale as usize).collect();
        (decimated, base_period * scale)
    } else {
        (data, base_period)
    };

    Ok(CaptureResult {
        data,
        sample_period,
        origin,
        time_scale: spec.time_scale,
        descaled: spec.descale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn origin() -> PatternId {
        PatternId::new("PXI1Slot5", "se_io")
    }

    fn spec(requested_len: usize, pipeline_offset: u32, time_scale: u32, descale: bool) -> ShapeSpec {
        ShapeSpec {
            requested_len,
            pipeline_offset,
            time_scale,
            descale,
        }
    }

    #[test]
    fn test_trims_offset() {
        let raw = vec![0, 0, 0, 5, 6, 7];
        let result = shape(raw, spec(3, 3, 1, false), origin(), Duration::from_nanos(100)).unwrap();
        assert_eq!(result.data, vec![5, 6, 7]);
        assert_eq!(result.sample_period, Duration::from_nanos(100));
    }

    #[test]
    fn test_length_mismatch() {
        let err = shape(vec![0; 5], spec(3, 3, 1, false), origin(), Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CaptureLengthMismatch {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_descale() {
        let raw = vec![9, 9, 0, 0, 0, 1, 1, 1, 0, 0, 0, 1, 1, 1];
        let result =
            shape(raw, spec(12, 2, 3, true), origin(), Duration::from_nanos(10)).unwrap();
        assert_eq!(result.data, vec![0, 1, 0, 1]);
        assert_eq!(result.sample_period, Duration::from_nanos(30));
        assert!(result.descaled);
    }

    #[test]
    fn test_descale_requires_exact_multiple() {
        let err = shape(vec![0; 7], spec(7, 0, 2, true), origin(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::UndecimatableCapture { len: 7, time_scale: 2 }));
    }

    #[test]
    fn test_into_pattern_is_read() {
        let result = shape(vec![1, 2], spec(2, 0, 1, false), origin(), Duration::ZERO).unwrap();
        let pattern = result.into_pattern();
        assert_eq!(pattern.direction(), Direction::Read);
        assert_eq!(pattern.samples(), &[1, 2]);
    }

    #[test]
    fn test_persist() {
        use crate::codec::GlueTextCodec;
        let dir = tempfile::tempdir().unwrap();
        let result = shape(vec![0, 3, 4], spec(2, 1, 1, false), origin(), Duration::ZERO).unwrap();
        let path = result.persist("run1", dir.path(), &GlueTextCodec).unwrap();
        assert_eq!(path.file_name().unwrap(), "run1_PXI1Slot5_se_io.glue");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "3, 4");
    }

    proptest! {
        #[test]
        fn prop_trim_keeps_tail(
            samples in proptest::collection::vec(any::<u64>(), 0..64),
            offset in 0u32..8,
        ) {
            let mut raw = vec![0u64; offset as usize];
            raw.extend_from_slice(&samples);
            let result = shape(raw, spec(samples.len(), offset, 1, false), origin(), Duration::ZERO).unwrap();
            prop_assert_eq!(result.data, samples);
        }

        #[test]
        fn prop_descale_inverts_scale(
            samples in proptest::collection::vec(any::<u64>(), 1..32),
            scale in 1u32..6,
            offset in 0u32..4,
        ) {
            let scaled = crate::pattern::scale_samples(&samples, scale);
            let mut raw = vec![0u64; offset as usize];
            raw.extend_from_slice(&scaled);
            let result = shape(raw, spec(scaled.len(), offset, scale, true), origin(), Duration::ZERO).unwrap();
            prop_assert_eq!(result.data, samples);
        }
    }
}
