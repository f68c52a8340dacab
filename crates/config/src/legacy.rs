// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Parsers for the line-oriented text formats that predate the YAML bench manifest.
//!
//! - iospec: `{signal},{I|O},{bit}` per line, `//` comments.
//! - register map: `{name},{ip_base},{register_offset},{width},{readable},{writeable}` per line.

use crate::{parse_u64, SignalDescriptor, SignalDirection};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct LegacyParseError {
    pub line: usize,
    pub message: String,
}

impl LegacyParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with("//"))
}

/// Parse an iospec into signal descriptors for one resource channel.
///
/// `O` marks a generator output (driven into the device under test), `I` a captured input.
pub fn parse_iospec(
    text: &str,
    resource: &str,
    channel: &str,
) -> Result<Vec<SignalDescriptor>, LegacyParseError> {
    let mut signals = Vec::new();
    for (line, content) in content_lines(text) {
        let tokens: Vec<&str> = content.split(',').map(str::trim).collect();
        if tokens.len() < 3 {
            return Err(LegacyParseError::new(
                line,
                format!("expected 'signal,I|O,bit', got '{}'", content),
            ));
        }

        let direction = match tokens[1].to_ascii_uppercase().as_str() {
            d if d.contains('O') => SignalDirection::ToDevice,
            d if d.contains('I') => SignalDirection::FromDevice,
            other => {
                return Err(LegacyParseError::new(
                    line,
                    format!("unknown direction '{}' for signal '{}'", other, tokens[0]),
                ))
            }
        };

        let bit = tokens[2].parse::<u8>().map_err(|e| {
            LegacyParseError::new(line, format!("invalid bit '{}': {}", tokens[2], e))
        })?;

        signals.push(SignalDescriptor {
            name: tokens[0].to_string(),
            bit,
            direction,
            default_level: 0,
            resource: resource.to_string(),
            channel: channel.to_string(),
        });
    }
    Ok(signals)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMapEntry {
    pub name: String,
    pub ip_base: u64,
    pub register_offset: u64,
    pub readable: bool,
    pub writeable: bool,
}

impl RegisterMapEntry {
    pub fn address(&self) -> u64 {
        self.ip_base + self.register_offset
    }
}

fn parse_flag(line: usize, field: &str, name: &str, token: &str) -> Result<bool, LegacyParseError> {
    match token.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(LegacyParseError::new(
            line,
            format!("{} for '{}' should be 0/1, got '{}'", field, name, other),
        )),
    }
}

/// Parse a register map. Duplicate register names are rejected.
pub fn parse_register_map(text: &str) -> Result<Vec<RegisterMapEntry>, LegacyParseError> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (line, content) in content_lines(text) {
        let tokens: Vec<&str> = content.split(',').map(str::trim).collect();
        if tokens.len() < 6 {
            return Err(LegacyParseError::new(
                line,
                format!("expected 6 fields, got {} in '{}'", tokens.len(), content),
            ));
        }

        let name = tokens[0];
        if !seen.insert(name.to_string()) {
            return Err(LegacyParseError::new(
                line,
                format!("duplicate register '{}'", name),
            ));
        }

        let ip_base = parse_u64(tokens[1]).map_err(|e| {
            LegacyParseError::new(line, format!("IP base for '{}': {:#}", name, e))
        })?;
        let register_offset = parse_u64(tokens[2]).map_err(|e| {
            LegacyParseError::new(line, format!("register offset for '{}': {:#}", name, e))
        })?;

        entries.push(RegisterMapEntry {
            name: name.to_string(),
            ip_base,
            register_offset,
            readable: parse_flag(line, "readable", name, tokens[4])?,
            writeable: parse_flag(line, "writeable", name, tokens[5])?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iospec_directions_and_comments() {
        let text = "// glue io\nmclk,O,0\n\ndata_out,I,5\nrst , o , 2\n";
        let signals = parse_iospec(text, "PXI1Slot5", "se_io").unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].direction, SignalDirection::ToDevice);
        assert_eq!(signals[1].direction, SignalDirection::FromDevice);
        assert_eq!(signals[1].bit, 5);
        assert_eq!(signals[2].name, "rst");
        assert_eq!(signals[2].channel, "se_io");
    }

    #[test]
    fn test_iospec_bad_direction_reports_line() {
        let err = parse_iospec("a,O,0\nb,X,1\n", "r", "c").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unknown direction"));
    }

    #[test]
    fn test_register_map() {
        let text = "status,0x400000000,0x8,32,1,0\nclear,0x400000000,12,32,0,1\n";
        let map = parse_register_map(text).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].address(), 0x4_0000_0008);
        assert!(map[0].readable && !map[0].writeable);
        assert!(!map[1].readable && map[1].writeable);
    }

    #[test]
    fn test_register_map_duplicate() {
        let err = parse_register_map("a,0,0,32,1,1\na,0,4,32,1,1\n").unwrap_err();
        assert!(err.message.contains("duplicate"));
    }
}
