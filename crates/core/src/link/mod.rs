// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Control-daemon wire protocol.
//!
//! Every message is `length: u32` (big-endian, header plus payload), then a header of
//! `sequence: u16` and `status: u16`, then an ASCII payload `command arg...`.

pub mod client;
pub mod server;

pub use client::LinkDevice;
pub use server::LinkServer;

use crate::device::{DeviceError, DeviceResult};
use std::io::{Read, Write};

pub const PROTOCOL_VERSION: &str = "1";
pub const STATUS_OK: u16 = 0;
pub const STATUS_UNKNOWN_COMMAND: u16 = 1;
pub const STATUS_BAD_ARGUMENTS: u16 = 2;
pub const STATUS_DEVICE_ERROR: u16 = 3;

const HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 1 << 20;

/// Sequence numbers wrap back to zero after 65534.
pub fn next_sequence(seq: u16) -> u16 {
    if seq >= 65534 {
        0
    } else {
        seq + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u16,
    pub status: u16,
    pub payload: String,
}

impl Frame {
    pub fn request(sequence: u16, command: &str, args: &[&str]) -> Self {
        let mut payload = command.to_string();
        for arg in args {
            payload.push(' ');
            payload.push_str(arg);
        }
        Self {
            sequence,
            status: STATUS_OK,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = HEADER_LEN + self.payload.len();
        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.status.to_be_bytes());
        buf.extend_from_slice(self.payload.as_bytes());
        buf
    }
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> DeviceResult<()> {
    writer.write_all(&frame.encode())?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before the length prefix.
pub fn read_frame<R: Read>(reader: &mut R) -> DeviceResult<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
            ) =>
        {
            return Ok(None)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len < HEADER_LEN {
        return Err(DeviceError::Link(format!("frame length {} is too small", len)));
    }
    if len > MAX_FRAME_LEN {
        return Err(DeviceError::Link(format!("frame length {} is too large", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    let sequence = u16::from_be_bytes([body[0], body[1]]);
    let status = u16::from_be_bytes([body[2], body[3]]);
    let payload = String::from_utf8(body.split_off(HEADER_LEN))
        .map_err(|_| DeviceError::Link("payload is not valid UTF-8".to_string()))?;

    Ok(Some(Frame {
        sequence,
        status,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = Frame::request(7, "device.get_memory", &["0", "status"]);
        let bytes = frame.encode();
        let payload = b"device.get_memory 0 status";
        assert_eq!(&bytes[..4], &((4 + payload.len()) as u32).to_be_bytes());
        assert_eq!(&bytes[4..8], &[0, 7, 0, 0]);
        assert_eq!(&bytes[8..], payload);

        let decoded = read_frame(&mut bytes.as_slice()).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_short_length_rejected() {
        let bytes = [0u8, 0, 0, 2, 0, 0];
        assert!(matches!(
            read_frame(&mut bytes.as_slice()),
            Err(DeviceError::Link(_))
        ));
    }

    #[test]
    fn test_clean_eof() {
        let mut empty: &[u8] = &[];
        assert_eq!(read_frame(&mut empty).unwrap(), None);
    }

    #[test]
    fn test_sequence_wraps() {
        assert_eq!(next_sequence(1), 2);
        assert_eq!(next_sequence(65533), 65534);
        assert_eq!(next_sequence(65534), 0);
    }
}
