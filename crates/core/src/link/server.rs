// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{
    read_frame, write_frame, Frame, PROTOCOL_VERSION, STATUS_BAD_ARGUMENTS, STATUS_DEVICE_ERROR,
    STATUS_OK, STATUS_UNKNOWN_COMMAND,
};
use crate::device::{Device, DeviceResult};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

/// A device exported under a control-daemon type name such as `Caribou`.
#[derive(Debug, Clone)]
pub struct ServedDevice {
    pub device_type: String,
    pub device: Arc<dyn Device>,
}

/// Serves `Device`s over the control-daemon protocol.
#[derive(Debug)]
pub struct LinkServer {
    listener: TcpListener,
    devices: Arc<Vec<ServedDevice>>,
}

impl LinkServer {
    pub fn bind(addr: &str, devices: Vec<ServedDevice>) -> DeviceResult<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            devices: Arc::new(devices),
        })
    }

    pub fn local_addr(&self) -> DeviceResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept a single client and serve it until it disconnects.
    pub fn serve_one(&self) -> DeviceResult<()> {
        let (stream, addr) = self.listener.accept()?;
        tracing::info!("Control link client connected from {}", addr);
        handle_client(stream, &self.devices)
    }

    pub fn serve(&self) -> DeviceResult<()> {
        tracing::info!("Control link listening on {}", self.local_addr()?);
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let devices = Arc::clone(&self.devices);
                    std::thread::spawn(move || {
                        if let Err(e) = handle_client(stream, &devices) {
                            tracing::error!("Control link client error: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!("Control link connection failed: {}", e),
            }
        }
        Ok(())
    }
}

fn handle_client(mut stream: TcpStream, devices: &[ServedDevice]) -> DeviceResult<()> {
    stream.set_nodelay(true)?;
    while let Some(request) = read_frame(&mut stream)? {
        let (status, payload) = dispatch(devices, &request.payload);
        let reply = Frame {
            sequence: request.sequence,
            status,
            payload,
        };
        write_frame(&mut stream, &reply)?;
    }
    tracing::info!("Control link client disconnected");
    Ok(())
}

fn select<'a>(devices: &'a [ServedDevice], index: Option<&str>) -> Result<&'a ServedDevice, (u16, String)> {
    let index =
        index.ok_or_else(|| (STATUS_BAD_ARGUMENTS, "missing device index".to_string()))?;
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| devices.get(i))
        .ok_or_else(|| (STATUS_BAD_ARGUMENTS, format!("no device with index '{}'", index)))
}

/// Execute one request payload, returning the reply status and payload.
pub fn dispatch(devices: &[ServedDevice], payload: &str) -> (u16, String) {
    let mut tokens = payload.split_whitespace();
    let Some(command) = tokens.next() else {
        return (STATUS_OK, String::new());
    };
    let args: Vec<&str> = tokens.collect();

    let result = match command {
        "protocol_version" => Ok(PROTOCOL_VERSION.to_string()),
        "list_devices" => Ok((0..devices.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" ")),
        "add_device" => match args.first() {
            Some(device_type) => devices
                .iter()
                .position(|d| d.device_type == *device_type)
                .map(|i| i.to_string())
                .ok_or_else(|| {
                    (
                        STATUS_DEVICE_ERROR,
                        format!("no device of type '{}' is available", device_type),
                    )
                }),
            None => Err((STATUS_BAD_ARGUMENTS, "add_device needs a type".to_string())),
        },
        "device.name" => {
            select(devices, args.first().copied()).map(|d| format!("{}Device", d.device_type))
        }
        "device.get_memory" | "device.get_register" => {
            select(devices, args.first().copied()).and_then(|d| match args.get(1) {
                Some(name) => d
                    .device
                    .get_register(name)
                    .map(|v| v.to_string())
                    .map_err(|e| (STATUS_DEVICE_ERROR, e.to_string())),
                None => Err((STATUS_BAD_ARGUMENTS, format!("{} needs a name", command))),
            })
        }
        "device.set_memory" | "device.set_register" => {
            select(devices, args.first().copied()).and_then(|d| match (args.get(1), args.get(2)) {
                (Some(name), Some(value)) => patternbench_config::parse_u64(value)
                    .map_err(|e| (STATUS_BAD_ARGUMENTS, format!("{:#}", e)))
                    .and_then(|value| {
                        d.device
                            .set_register(name, value)
                            .map(|()| String::new())
                            .map_err(|e| (STATUS_DEVICE_ERROR, e.to_string()))
                    }),
                _ => Err((
                    STATUS_BAD_ARGUMENTS,
                    format!("{} needs a name and a value", command),
                )),
            })
        }
        other => {
            tracing::warn!("Control link: unknown command '{}'", other);
            Err((STATUS_UNKNOWN_COMMAND, format!("unknown command '{}'", other)))
        }
    };

    match result {
        Ok(payload) => (STATUS_OK, payload),
        Err(reply) => reply,
    }
}
