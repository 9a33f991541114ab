//! Wire protocol types for the `/events` and `/stt` HUD channels, and the
//! hello handshake shared by `/esp32/audio` and `/stt` (spec §6, design
//! notes §9 "Dynamic JSON shapes").
//!
//! Incoming `/events` messages are parsed tolerantly: each is first decoded
//! as a loosely-typed [`serde_json::Value`], tagged by its `type` field, then
//! individual fields are pulled out independently so a single malformed
//! field never rejects the whole message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `audio` block common to both hello variants.
#[derive(Debug, Clone, Copy)]
pub struct AudioHello {
    pub sample_rate_hz: u32,
    pub frame_ms: u32,
    pub channels: u16,
}

/// A parsed front-mic or phone-mic hello (spec §6).
#[derive(Debug, Clone)]
pub struct Hello {
    pub device_id: Option<String>,
    pub role: Option<String>,
    pub audio: AudioHello,
}

/// Parses a hello JSON payload, falling back to `query` for `deviceId`/`role`
/// when absent from the body, and to the given defaults for the audio
/// block. `audio.format` values other than `pcm_s16le` are tolerated (the
/// caller logs, this function doesn't reject).
pub fn parse_hello(
    text: &str,
    query: &std::collections::HashMap<String, String>,
    default_sample_rate_hz: u32,
    default_frame_ms: u32,
    default_channels: u16,
) -> Result<Hello, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    let device_id = value
        .get("deviceId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| query.get("deviceId").cloned());
    let role = value
        .get("role")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| query.get("role").cloned());

    let audio = value.get("audio");
    let format = audio.and_then(|a| a.get("format")).and_then(Value::as_str);
    if let Some(format) = format {
        if format != "pcm_s16le" {
            log::warn!("[Ingress] Unrecognized audio format '{}', proceeding anyway", format);
        }
    }
    let sample_rate_hz = audio
        .and_then(|a| a.get("sampleRateHz"))
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default_sample_rate_hz);
    let frame_ms = audio
        .and_then(|a| a.get("frameMs"))
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default_frame_ms);
    let channels = audio
        .and_then(|a| a.get("channels"))
        .and_then(Value::as_u64)
        .map(|v| v as u16)
        .unwrap_or(default_channels);

    if channels != 1 {
        log::debug!("[Ingress] Hello reports {} channels", channels);
    }

    Ok(Hello {
        device_id,
        role,
        audio: AudioHello {
            sample_rate_hz,
            frame_ms,
            channels,
        },
    })
}

/// Tolerant `config.update` body (individual fields parsed independently —
/// see [`crate::config::ConfigUpdate`], which this just re-exposes at the
/// wire layer).
pub use crate::config::ConfigUpdate;

/// Recognized `/events` ingress message, tagged by its `type` field (spec
/// §6 table, design notes §9).
#[derive(Debug, Clone)]
pub enum EventsIngress {
    Hello,
    HeadPose { yaw: f32, pitch: f32, roll: f32 },
    TorsoPose { yaw: f32 },
    CalibratePoseZero,
    ConfigUpdate(ConfigUpdate),
    AudioSource(String),
    StatusRequest,
    /// Recognized type but nothing this server acts on, or an unrecognized
    /// type entirely — both are silently ignored per the tolerant-parsing
    /// design note.
    Ignored,
}

/// Parses one `/events` text message into a tagged variant. Never fails:
/// anything that doesn't parse as JSON, or whose `type` is unrecognized, or
/// whose fields are the wrong shape, becomes [`EventsIngress::Ignored`].
pub fn parse_events_ingress(text: &str) -> EventsIngress {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return EventsIngress::Ignored,
    };
    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    match msg_type {
        "hello" => EventsIngress::Hello,
        "head_pose" => {
            let yaw = value.get("yaw").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let pitch = value.get("pitch").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let roll = value.get("roll").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            EventsIngress::HeadPose { yaw, pitch, roll }
        }
        "torso_pose" => {
            let yaw = value
                .get("yawDeg")
                .or_else(|| value.get("yaw"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32;
            EventsIngress::TorsoPose { yaw }
        }
        "calibrate.pose_zero" => EventsIngress::CalibratePoseZero,
        "config.update" => match serde_json::from_value::<ConfigUpdate>(value) {
            Ok(update) => EventsIngress::ConfigUpdate(update),
            Err(_) => EventsIngress::Ignored,
        },
        "audio.source" => {
            let source = value.get("source").and_then(Value::as_str).unwrap_or("auto");
            EventsIngress::AudioSource(source.to_string())
        }
        "status.request" => EventsIngress::StatusRequest,
        _ => EventsIngress::Ignored,
    }
}

/// `calibrate.pose_zero` reply (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "calibrate.pose_zero")]
pub struct CalibratePoseZeroReply {
    pub ok: bool,
    pub head0_yaw_deg: Option<f32>,
    pub torso0_yaw_deg: Option<f32>,
}

/// STT egress messages (spec §6 "STT egress").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttEgress {
    Partial { text: String, delta_words: Vec<String> },
    Final { text: String },
    Status { stt: Value },
    Error { message: String },
}

/// Alarm classes tracked by the Alarm Loop (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmClass {
    Fire,
    CarHorn,
    Siren,
}

impl AlarmClass {
    pub fn event_type(self) -> &'static str {
        match self {
            AlarmClass::Fire => "alarm.fire",
            AlarmClass::CarHorn => "alarm.car_horn",
            AlarmClass::Siren => "alarm.siren",
        }
    }
}

/// `alarm.<name>` start/end state (spec §6 "HUD egress").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Started,
    Ended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_front_mic_hello_with_audio_block() {
        let text = r#"{"v":1,"type":"hello","deviceId":"d1","role":"left",
                        "audio":{"format":"pcm_s16le","sampleRateHz":16000,"channels":1,"frameMs":20}}"#;
        let hello = parse_hello(text, &Default::default(), 16_000, 20, 1).unwrap();
        assert_eq!(hello.device_id.as_deref(), Some("d1"));
        assert_eq!(hello.role.as_deref(), Some("left"));
        assert_eq!(hello.audio.sample_rate_hz, 16_000);
    }

    #[test]
    fn falls_back_to_query_params_when_fields_absent() {
        let mut query = std::collections::HashMap::new();
        query.insert("deviceId".to_string(), "d2".to_string());
        query.insert("role".to_string(), "right".to_string());
        let hello = parse_hello("{}", &query, 16_000, 20, 1).unwrap();
        assert_eq!(hello.device_id.as_deref(), Some("d2"));
        assert_eq!(hello.role.as_deref(), Some("right"));
    }

    #[test]
    fn invalid_hello_json_is_an_error() {
        assert!(parse_hello("not json", &Default::default(), 16_000, 20, 1).is_err());
    }

    #[test]
    fn unrecognized_events_type_is_ignored_not_an_error() {
        let msg = parse_events_ingress(r#"{"type":"something_unknown"}"#);
        matches!(msg, EventsIngress::Ignored);
    }

    #[test]
    fn malformed_head_pose_falls_back_to_zero_fields() {
        let msg = parse_events_ingress(r#"{"type":"head_pose","yaw":"not a number"}"#);
        match msg {
            EventsIngress::HeadPose { yaw, pitch, roll } => {
                assert_eq!(yaw, 0.0);
                assert_eq!(pitch, 0.0);
                assert_eq!(roll, 0.0);
            }
            _ => panic!("expected HeadPose variant"),
        }
    }

    #[test]
    fn config_update_with_one_bad_field_still_parses_the_rest() {
        let msg = parse_events_ingress(
            r#"{"type":"config.update","esp32GainLeft":0.5,"keywords":["FIRE", "  help  me "]}"#,
        );
        match msg {
            EventsIngress::ConfigUpdate(update) => {
                assert_eq!(update.esp32_gain_left, Some(0.5));
                assert_eq!(update.keywords.unwrap(), vec!["FIRE".to_string(), "  help  me ".to_string()]);
            }
            _ => panic!("expected ConfigUpdate variant"),
        }
    }
}
