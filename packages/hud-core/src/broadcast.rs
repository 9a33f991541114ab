//! Broadcast fan-out (spec §4.5) and the status snapshot (spec §6).
//!
//! Fan-out itself is just two `tokio::sync::broadcast` channels — slow
//! clients are dropped via their own receiver lagging, not by any queuing
//! here. The `WsConnectionManager` registry (already generic,
//! `api::conn_manager`) is reused only to report connection counts in the
//! status snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::geometry;
use crate::protocol_constants::{EVENTS_CHANNEL_CAPACITY, STT_CHANNEL_CAPACITY};
use crate::state::{MicRole, SharedAudioState};

/// Owns the two fan-out channels HUD clients subscribe to.
pub struct BroadcastHub {
    pub events_tx: broadcast::Sender<String>,
    pub stt_tx: broadcast::Sender<String>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        let (stt_tx, _) = broadcast::channel(STT_CHANNEL_CAPACITY);
        Self { events_tx, stt_tx }
    }

    /// Serializes `payload` once and sends it to every `/events` subscriber.
    /// Per spec §4.5, a send failure (no receivers) is not an error — it
    /// just means there's nothing listening right now.
    pub fn publish_event<T: Serialize>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => {
                tracing::debug!(bytes = text.len(), "events_broadcast");
                let _ = self.events_tx.send(text);
            }
            Err(e) => log::warn!("[Broadcast] Failed to serialize event: {}", e),
        }
    }

    pub fn publish_stt<T: Serialize>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => {
                tracing::debug!(bytes = text.len(), "stt_broadcast");
                let _ = self.stt_tx.send(text);
            }
            Err(e) => log::warn!("[Broadcast] Failed to serialize STT message: {}", e),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One role's stats in the status snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMicStatus {
    pub connected: bool,
    pub device_id: Option<String>,
    pub sample_rate_hz: u32,
    pub frame_ms: u32,
    pub last_rms: f32,
    pub age_ms: u64,
    pub frames_received: u64,
    pub dropped_frames: u64,
    pub bad_frame_sizes: u64,
    pub stt_queue_depth: usize,
    pub analysis_queue_depth: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneMicStatus {
    pub connected: bool,
    pub channels: u16,
    pub last_rms: f32,
    pub last_rms_left: f32,
    pub last_rms_right: f32,
    pub age_ms: u64,
    pub dropped_frames: u64,
    pub bad_frame_sizes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub events_clients: usize,
    pub stt_clients: usize,
    pub esp32_left: FrontMicStatus,
    pub esp32_right: FrontMicStatus,
    pub phone: PhoneMicStatus,
    pub stt_audio_source: crate::config::SttAudioSource,
    pub haptics_left_connected: bool,
    pub haptics_right_connected: bool,
    pub direction: crate::config::DirectionConfig,
    pub radar: crate::config::RadarConfig,
    pub alarm: crate::config::AlarmConfig,
    pub array_geometry: geometry::ArrayGeometry,
    pub head_pose: Option<PoseStatus>,
    pub torso_pose: Option<PoseStatus>,
    pub pose_zero: PoseZeroStatus,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseStatus {
    pub yaw_deg: f32,
    pub age_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseZeroStatus {
    pub head0_yaw_deg: Option<f32>,
    pub torso0_yaw_deg: Option<f32>,
}

fn empty_front_status() -> FrontMicStatus {
    FrontMicStatus {
        connected: false,
        device_id: None,
        sample_rate_hz: 0,
        frame_ms: 0,
        last_rms: 0.0,
        age_ms: 0,
        frames_received: 0,
        dropped_frames: 0,
        bad_frame_sizes: 0,
        stt_queue_depth: 0,
        analysis_queue_depth: 0,
    }
}

/// Assembles the status snapshot broadcast at 1 Hz or on `status.request`
/// (spec §6 "Status snapshot").
pub fn build_status_snapshot(
    audio: &SharedAudioState,
    config: &Config,
    events_clients: usize,
    stt_clients: usize,
    haptics_left_connected: bool,
    haptics_right_connected: bool,
) -> StatusSnapshot {
    let now = std::time::Instant::now();

    let front_status = |role: MicRole| -> FrontMicStatus {
        match audio.front.get(&role) {
            Some(s) => FrontMicStatus {
                connected: true,
                device_id: Some(s.device_id.clone()),
                sample_rate_hz: s.sample_rate_hz,
                frame_ms: s.frame_ms,
                last_rms: s.last_rms,
                age_ms: now.saturating_duration_since(s.last_seen).as_millis() as u64,
                frames_received: s.frames_received,
                dropped_frames: s.dropped_frames,
                bad_frame_sizes: s.bad_frame_sizes,
                stt_queue_depth: s.stt_q.len(),
                analysis_queue_depth: s.analysis_q.len(),
            },
            None => empty_front_status(),
        }
    };

    let phone = match audio.phone.values().next() {
        Some(s) => PhoneMicStatus {
            connected: true,
            channels: s.channels,
            last_rms: s.last_rms,
            last_rms_left: s.last_rms_left,
            last_rms_right: s.last_rms_right,
            age_ms: now.saturating_duration_since(s.last_seen).as_millis() as u64,
            dropped_frames: s.dropped_frames,
            bad_frame_sizes: s.bad_frame_sizes,
        },
        None => PhoneMicStatus {
            connected: false,
            channels: 0,
            last_rms: 0.0,
            last_rms_left: 0.0,
            last_rms_right: 0.0,
            age_ms: 0,
            dropped_frames: 0,
            bad_frame_sizes: 0,
        },
    };

    StatusSnapshot {
        message_type: "status",
        events_clients,
        stt_clients,
        esp32_left: front_status(MicRole::Left),
        esp32_right: front_status(MicRole::Right),
        phone,
        stt_audio_source: config.stt_audio_source,
        haptics_left_connected,
        haptics_right_connected,
        direction: config.direction.clone(),
        radar: config.radar.clone(),
        alarm: config.alarm.clone(),
        array_geometry: geometry::mic_positions_mm(&config.array),
        head_pose: audio.head_pose.map(|p| PoseStatus {
            yaw_deg: p.yaw_deg,
            age_ms: now.saturating_duration_since(p.last_seen).as_millis() as u64,
        }),
        torso_pose: audio.torso_pose.map(|p| PoseStatus {
            yaw_deg: p.yaw_deg,
            age_ms: now.saturating_duration_since(p.last_seen).as_millis() as u64,
        }),
        pose_zero: PoseZeroStatus {
            head0_yaw_deg: audio.pose_zero.head0_yaw_deg,
            torso0_yaw_deg: audio.pose_zero.torso0_yaw_deg,
        },
    }
}

/// Arbitrary connector status payload, used by the STT muxer's `{type:
/// "status", stt: …}` egress (spec §6 "STT egress").
pub fn stt_status_value(connected: bool, source: &str) -> Value {
    serde_json::json!({ "connected": connected, "source": source })
}

/// Shared reference to application config, swapped in place by
/// `config.update` (spec §6).
pub type SharedConfig = Arc<RwLock<Config>>;
