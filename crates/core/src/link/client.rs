// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{next_sequence, read_frame, write_frame, Frame, PROTOCOL_VERSION, STATUS_OK};
use crate::device::{Device, DeviceError, DeviceResult};
use std::net::TcpStream;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    sequence: u16,
}

impl Connection {
    fn request(&mut self, command: &str, args: &[&str]) -> DeviceResult<String> {
        self.sequence = next_sequence(self.sequence);
        let frame = Frame::request(self.sequence, command, args);
        write_frame(&mut self.stream, &frame)?;

        let reply = read_frame(&mut self.stream)?
            .ok_or_else(|| DeviceError::Link("connection closed by peer".to_string()))?;
        if reply.status != STATUS_OK {
            return Err(DeviceError::Link(format!(
                "command '{}' failed with code {}: {}",
                command, reply.status, reply.payload
            )));
        }
        if reply.sequence != self.sequence {
            return Err(DeviceError::Link(format!(
                "sequence mismatch: sent {}, got {}",
                self.sequence, reply.sequence
            )));
        }
        Ok(reply.payload)
    }
}

/// Register access to a board through its control daemon.
#[derive(Debug)]
pub struct LinkDevice {
    resource_id: String,
    index: u32,
    connection: Mutex<Connection>,
}

impl LinkDevice {
    /// Connect, check the protocol version and attach to the first device of `device_type`,
    /// adding one when none exists.
    pub fn connect(resource_id: &str, addr: &str, device_type: &str) -> DeviceResult<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| DeviceError::Link(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;

        let mut connection = Connection {
            stream,
            sequence: 0,
        };
        let version = connection.request("protocol_version", &[])?;
        if version != PROTOCOL_VERSION {
            return Err(DeviceError::Link(format!(
                "unsupported protocol version '{}'",
                version
            )));
        }

        let index = ensure_device(&mut connection, device_type)?;
        tracing::info!(
            "Connected '{}' to {} device #{} at {}",
            resource_id,
            device_type,
            index,
            addr
        );

        Ok(Self {
            resource_id: resource_id.to_string(),
            index,
            connection: Mutex::new(connection),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn keep_alive(&self) -> DeviceResult<()> {
        self.request("", &[]).map(|_| ())
    }

    fn request(&self, command: &str, args: &[&str]) -> DeviceResult<String> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request(command, args)
    }
}

fn ensure_device(connection: &mut Connection, device_type: &str) -> DeviceResult<u32> {
    let listing = connection.request("list_devices", &[])?;
    let mut indices = listing
        .split_whitespace()
        .map(|t| {
            t.parse::<u32>()
                .map_err(|_| DeviceError::Link(format!("bad device index '{}'", t)))
        })
        .collect::<DeviceResult<Vec<_>>>()?;
    indices.sort_unstable();

    for index in indices {
        let name = connection.request("device.name", &[index.to_string().as_str()])?;
        if name.strip_suffix("Device").unwrap_or(&name) == device_type {
            return Ok(index);
        }
    }

    let reply = connection.request("add_device", &[device_type])?;
    reply
        .trim()
        .parse::<u32>()
        .map_err(|_| DeviceError::Link(format!("bad device index '{}'", reply)))
}

impl Device for LinkDevice {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn get_register(&self, name: &str) -> DeviceResult<u64> {
        let index = self.index.to_string();
        let reply = self.request("device.get_memory", &[index.as_str(), name])?;
        patternbench_config::parse_u64(&reply)
            .map_err(|e| DeviceError::Link(format!("reading '{}': {:#}", name, e)))
    }

    fn set_register(&self, name: &str, value: u64) -> DeviceResult<()> {
        let index = self.index.to_string();
        let value = value.to_string();
        self.request("device.set_memory", &[index.as_str(), name, value.as_str()])
            .map(|_| ())
    }
}
