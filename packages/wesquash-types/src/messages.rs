//! JSON messages for the WebSocket fallback transport.
//!
//! Every message is an object tagged by `"type"`. Unknown tags, missing fields and
//! non-object payloads are decode errors at this boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orientation::{OrientationSource, RawSample};
use crate::quat::Vec3;

pub const DEVICE_PHONE: &str = "phone";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotObject,
}

/// Sensor reading as sent over the fallback transport.
///
/// When all of `qx, qy, qz, qw` are present the raw quaternion takes precedence
/// over the Euler triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMessage {
    pub device: String,
    pub ra: f32,
    pub rb: f32,
    pub rg: f32,
    pub ga: f32,
    pub gb: f32,
    pub gg: f32,
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qz: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qw: Option<f32>,
}

impl SensorMessage {
    pub fn to_sample(&self) -> RawSample {
        let source = match (self.qx, self.qy, self.qz, self.qw) {
            (Some(x), Some(y), Some(z), Some(w)) => OrientationSource::Quaternion { x, y, z, w },
            _ => OrientationSource::Euler { alpha: self.ra, beta: self.rb, gamma: self.rg },
        };
        RawSample {
            source,
            gyro: Vec3::new(self.ga, self.gb, self.gg),
            accel: Vec3::new(self.ax, self.ay, self.az),
            timestamp_ms: self.ts as f64,
        }
    }

    pub fn from_sample(sample: &RawSample) -> Self {
        let (ra, rb, rg, quat) = match sample.source {
            OrientationSource::Euler { alpha, beta, gamma } => (alpha, beta, gamma, None),
            OrientationSource::Quaternion { x, y, z, w } => (0.0, 0.0, 0.0, Some((x, y, z, w))),
        };
        Self {
            device: DEVICE_PHONE.to_string(),
            ra,
            rb,
            rg,
            ga: sample.gyro.x,
            gb: sample.gyro.y,
            gg: sample.gyro.z,
            ax: sample.accel.x,
            ay: sample.accel.y,
            az: sample.accel.z,
            ts: sample.timestamp_ms as i64,
            qx: quat.map(|q| q.0),
            qy: quat.map(|q| q.1),
            qz: quat.map(|q| q.2),
            qw: quat.map(|q| q.3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsMessage {
    Welcome { message: String },
    Sensor(SensorMessage),
    Calibrate { device: String, ts: i64 },
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}

impl WsMessage {
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(MessageError::NotObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Ping/pong envelopes are transport keep-alive, not application data.
    pub fn is_control(&self) -> bool {
        matches!(self, WsMessage::Ping { .. } | WsMessage::Pong { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_wire_shape() {
        let text = r#"{"type":"sensor","device":"phone","ra":1.2345,"rb":0.5678,"rg":-0.1234,
            "ga":1.0,"gb":2.0,"gg":3.0,"ax":0.1,"ay":9.8,"az":0.0,"ts":1000}"#;
        let WsMessage::Sensor(s) = WsMessage::from_json(text).unwrap() else {
            panic!("expected sensor");
        };
        assert_eq!(s.device, "phone");
        assert!((s.ra - 1.2345).abs() < 1e-6);
        assert_eq!(s.ts, 1000);
        let sample = s.to_sample();
        assert!(matches!(sample.source, OrientationSource::Euler { .. }));
        assert_eq!(sample.timestamp_ms, 1000.0);
    }

    #[test]
    fn test_quaternion_fields_take_precedence() {
        let text = r#"{"type":"sensor","device":"phone","ra":1.0,"rb":1.0,"rg":1.0,
            "ga":0,"gb":0,"gg":0,"ax":0,"ay":0,"az":0,"ts":5,
            "qx":0.0,"qy":0.0,"qz":0.0,"qw":1.0}"#;
        let WsMessage::Sensor(s) = WsMessage::from_json(text).unwrap() else {
            panic!("expected sensor");
        };
        assert_eq!(
            s.to_sample().source,
            OrientationSource::Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
        );
    }

    #[test]
    fn test_partial_quaternion_falls_back_to_euler() {
        let text = r#"{"type":"sensor","device":"phone","ra":1.0,"rb":0.0,"rg":0.0,
            "ga":0,"gb":0,"gg":0,"ax":0,"ay":0,"az":0,"ts":5,"qw":1.0}"#;
        let WsMessage::Sensor(s) = WsMessage::from_json(text).unwrap() else {
            panic!("expected sensor");
        };
        assert!(matches!(s.to_sample().source, OrientationSource::Euler { .. }));
    }

    #[test]
    fn test_control_messages() {
        let ping = WsMessage::from_json(r#"{"type":"ping","timestamp":123}"#).unwrap();
        assert_eq!(ping, WsMessage::Ping { timestamp: 123 });
        assert!(ping.is_control());
        assert_eq!(WsMessage::Pong { timestamp: 123 }.to_json(), r#"{"type":"pong","timestamp":123}"#);

        let cal = WsMessage::Calibrate { device: DEVICE_PHONE.into(), ts: 9 };
        assert!(!cal.is_control());
        assert_eq!(cal.to_json(), r#"{"type":"calibrate","device":"phone","ts":9}"#);
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(WsMessage::from_json("not json").is_err());
        assert!(matches!(WsMessage::from_json(r#"["ping", 5]"#), Err(MessageError::NotObject)));
        assert!(WsMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(WsMessage::from_json(r#"{"type":"ping"}"#).is_err());
        assert!(WsMessage::from_json(r#"{"type":"sensor","device":"phone","ra":1.0}"#).is_err());
    }
}
