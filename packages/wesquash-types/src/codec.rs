//! Fixed-layout datagrams for the primary (UDP) transport.
//!
//! All multi-byte fields are little-endian.
//!
//! ```text
//! Sensor (46 B)        0x01 | device u8 | euler f32×3 | gyro f32×3 | accel f32×3 | ts f64
//! Heartbeat (9 B)      0x02 | ts f64            (sender clock)
//! HeartbeatResp (9 B)  0x03 | ts f64            (echoed)
//! Command (10 B)       0x04 | command u8 | ts f64
//! ```
//!
//! Decoding is strict: the length must match the declared type exactly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::orientation::{OrientationSource, RawSample};
use crate::quat::Vec3;

pub const PACKET_SENSOR: u8 = 0x01;
pub const PACKET_HEARTBEAT: u8 = 0x02;
pub const PACKET_HEARTBEAT_RESPONSE: u8 = 0x03;
pub const PACKET_COMMAND: u8 = 0x04;

pub const DEVICE_PHONE: u8 = 0x01;
pub const COMMAND_CALIBRATE: u8 = 0x01;

pub const SENSOR_PACKET_LEN: usize = 46;
pub const HEARTBEAT_PACKET_LEN: usize = 9;
pub const COMMAND_PACKET_LEN: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
    #[error("packet type {kind:#04x}: expected {expected} bytes, got {actual}")]
    BadLength { kind: u8, expected: usize, actual: usize },
    #[error("unknown device type {0:#04x}")]
    UnknownDevice(u8),
    #[error("unknown command id {0:#04x}")]
    UnknownCommand(u8),
    #[error("sample source cannot be carried by the sensor datagram")]
    UnsupportedSource,
}

/// Commands carried by packet type 0x04.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Calibrate,
}

impl Command {
    fn id(self) -> u8 {
        match self {
            Command::Calibrate => COMMAND_CALIBRATE,
        }
    }

    fn from_id(id: u8) -> Result<Self, CodecError> {
        match id {
            COMMAND_CALIBRATE => Ok(Command::Calibrate),
            other => Err(CodecError::UnknownCommand(other)),
        }
    }
}

/// Sensor datagram payload. Carries Euler angles only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPacket {
    pub device_type: u8,
    /// alpha, beta, gamma (rad)
    pub euler: [f32; 3],
    /// deg/s
    pub gyro: Vec3,
    /// m/s²
    pub accel: Vec3,
    pub timestamp_ms: f64,
}

impl SensorPacket {
    pub fn to_sample(&self) -> RawSample {
        RawSample::from_euler(self.euler[0], self.euler[1], self.euler[2], self.gyro, self.accel, self.timestamp_ms)
    }
}

impl TryFrom<&RawSample> for SensorPacket {
    type Error = CodecError;

    fn try_from(sample: &RawSample) -> Result<Self, Self::Error> {
        match sample.source {
            OrientationSource::Euler { alpha, beta, gamma } => Ok(Self {
                device_type: DEVICE_PHONE,
                euler: [alpha, beta, gamma],
                gyro: sample.gyro,
                accel: sample.accel,
                timestamp_ms: sample.timestamp_ms,
            }),
            OrientationSource::Quaternion { .. } => Err(CodecError::UnsupportedSource),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    Sensor(SensorPacket),
    Heartbeat { timestamp_ms: f64 },
    HeartbeatResponse { timestamp_ms: f64 },
    Command { command: Command, timestamp_ms: f64 },
}

impl Packet {
    pub fn kind(&self) -> u8 {
        match self {
            Packet::Sensor(_) => PACKET_SENSOR,
            Packet::Heartbeat { .. } => PACKET_HEARTBEAT,
            Packet::HeartbeatResponse { .. } => PACKET_HEARTBEAT_RESPONSE,
            Packet::Command { .. } => PACKET_COMMAND,
        }
    }

    pub fn encoded_len(&self) -> usize {
        expected_len(self.kind()).unwrap_or(0)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind());
        match self {
            Packet::Sensor(s) => {
                buf.put_u8(s.device_type);
                for v in s.euler {
                    buf.put_f32_le(v);
                }
                for v in [s.gyro.x, s.gyro.y, s.gyro.z, s.accel.x, s.accel.y, s.accel.z] {
                    buf.put_f32_le(v);
                }
                buf.put_f64_le(s.timestamp_ms);
            }
            Packet::Heartbeat { timestamp_ms } | Packet::HeartbeatResponse { timestamp_ms } => {
                buf.put_f64_le(*timestamp_ms);
            }
            Packet::Command { command, timestamp_ms } => {
                buf.put_u8(command.id());
                buf.put_f64_le(*timestamp_ms);
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let kind = *data.first().ok_or(CodecError::Empty)?;
        let expected = expected_len(kind).ok_or(CodecError::UnknownType(kind))?;
        if data.len() != expected {
            return Err(CodecError::BadLength { kind, expected, actual: data.len() });
        }

        let mut buf = &data[1..];
        match kind {
            PACKET_SENSOR => {
                let device_type = buf.get_u8();
                if device_type != DEVICE_PHONE {
                    return Err(CodecError::UnknownDevice(device_type));
                }
                let euler = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
                let gyro = Vec3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le());
                let accel = Vec3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le());
                let timestamp_ms = buf.get_f64_le();
                Ok(Packet::Sensor(SensorPacket { device_type, euler, gyro, accel, timestamp_ms }))
            }
            PACKET_HEARTBEAT => Ok(Packet::Heartbeat { timestamp_ms: buf.get_f64_le() }),
            PACKET_HEARTBEAT_RESPONSE => Ok(Packet::HeartbeatResponse { timestamp_ms: buf.get_f64_le() }),
            PACKET_COMMAND => {
                let command = Command::from_id(buf.get_u8())?;
                Ok(Packet::Command { command, timestamp_ms: buf.get_f64_le() })
            }
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

fn expected_len(kind: u8) -> Option<usize> {
    match kind {
        PACKET_SENSOR => Some(SENSOR_PACKET_LEN),
        PACKET_HEARTBEAT | PACKET_HEARTBEAT_RESPONSE => Some(HEARTBEAT_PACKET_LEN),
        PACKET_COMMAND => Some(COMMAND_PACKET_LEN),
        _ => None,
    }
}
