//! Direction Loop (spec §4.3) and its embedded Radar Track Loop trigger
//! (spec §4.4, §4.3 step 7).
//!
//! One task, ticking every 50 ms. It owns the `RadarEngine` outright (no
//! other task touches it, so it needs no lock of its own — design notes
//! §9), reads `SharedAudioState` through the coarse lock only for the short
//! span needed to gather RMS levels / ring snapshots and to publish the
//! new payload, and never holds that lock across the FFT or the broadcast
//! send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastHub;
use crate::config::Config;
use crate::dsp::fusion::{self, FusionParams};
use crate::dsp::radar::RadarEngine;
use crate::protocol_constants::{DIRECTION_TICK_MS, RADAR_UPDATE_EVERY_MS};
use crate::state::{DirectionPayload, SharedAudioState};

fn fusion_params(config: &Config) -> FusionParams {
    FusionParams {
        noise_floor: config.direction.noise_floor,
        gain_quad: config.direction.gain_quad,
        gain_lr: config.direction.gain_lr,
        gain_mono: config.direction.gain_mono,
        back_balance_gain_deg: config.direction.back_balance_gain_deg,
        back_balance_exp: config.direction.back_balance_exp,
        hybrid_front_back_gain: config.direction.hybrid_front_back_gain,
    }
}

/// Runs the direction loop until `cancel` fires. `sample_rate_hz` is the
/// sample rate assumed for the radar FFT's frequency axis (spec's mics all
/// run at 16 kHz in practice).
pub async fn run(
    audio: Arc<RwLock<SharedAudioState>>,
    config: Arc<RwLock<Config>>,
    hub: Arc<BroadcastHub>,
    sample_rate_hz: u32,
    cancel: CancellationToken,
) {
    log::info!("[Direction] Loop started ({}ms tick)", DIRECTION_TICK_MS);

    let mut radar = RadarEngine::new();
    let mut smoothed_torso_direction_deg: Option<f32> = None;
    let mut ticks_since_radar_update = 0u64;
    let radar_every_ticks = (RADAR_UPDATE_EVERY_MS / DIRECTION_TICK_MS).max(1);

    let mut ticker = tokio::time::interval(Duration::from_millis(DIRECTION_TICK_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[Direction] Loop stopping");
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let snapshot_config = config.read().clone();
                let params = fusion_params(&snapshot_config);

                let inputs = audio.read().fusion_inputs(now);
                let fused = match fusion::fuse(inputs, &params) {
                    Some(f) => f,
                    None => {
                        ticks_since_radar_update += 1;
                        continue;
                    }
                };

                smoothed_torso_direction_deg = Some(match smoothed_torso_direction_deg {
                    None => fused.raw_direction_deg,
                    Some(prev) => crate::dsp::lerp_angle(prev, fused.raw_direction_deg, 0.25),
                });
                let torso_direction_deg = smoothed_torso_direction_deg.unwrap();

                let delta_yaw_deg = audio.read().delta_yaw_deg(now);
                let direction_deg = crate::dsp::wrap_deg(torso_direction_deg - delta_yaw_deg);
                let (radar_x, radar_y, glow_edge) = fusion::map_ui(direction_deg, fused.intensity);

                ticks_since_radar_update += 1;
                if ticks_since_radar_update >= radar_every_ticks {
                    ticks_since_radar_update = 0;
                    let channels = audio.read().radar_channels(now);
                    radar.update(&channels, sample_rate_hz, &snapshot_config.radar, &params, now);
                }
                let radar_dots = radar.emit(now, delta_yaw_deg, &snapshot_config.radar);

                let payload = DirectionPayload {
                    source: fused.source,
                    direction_deg,
                    raw_direction_deg: fused.raw_direction_deg,
                    torso_direction_deg,
                    delta_yaw_deg,
                    intensity: fused.intensity,
                    radar_dots,
                    radar_x,
                    radar_y,
                    glow_edge,
                    glow_strength: fused.intensity,
                };

                audio.write().latest_direction = Some(payload.clone());
                hub.publish_event(&DirectionUiMessage::from(payload));
            }
        }
    }
}

/// `direction.ui` egress wrapper (spec §4.3 step 6: `{type:"direction.ui",
/// ...payload}`).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectionUiMessage {
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(flatten)]
    payload: DirectionPayload,
}

impl From<DirectionPayload> for DirectionUiMessage {
    fn from(payload: DirectionPayload) -> Self {
        Self {
            message_type: "direction.ui",
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::mic::{FrontMicState, MicRole};

    #[tokio::test(start_paused = true)]
    async fn publishes_direction_ui_at_the_expected_rate() {
        let audio = Arc::new(RwLock::new(SharedAudioState::new()));
        {
            let mut state = audio.write();
            let mut front = FrontMicState::new("d1".into(), MicRole::Left, 16_000, 1, 20, Instant::now());
            front.last_rms = 0.2;
            state.register_front(MicRole::Left, front);
        }
        let config = Arc::new(RwLock::new(Config::default()));
        let hub = Arc::new(BroadcastHub::new());
        let mut rx = hub.events_tx.subscribe();
        let cancel = CancellationToken::new();

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(run(Arc::clone(&audio), config, Arc::clone(&hub), 16_000, loop_cancel));

        tokio::time::advance(Duration::from_millis(60)).await;
        let message = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("expected a direction.ui message")
            .unwrap();
        assert!(message.contains("\"type\":\"direction.ui\""));
        assert!(message.contains("\"source\":\"front\""));

        cancel.cancel();
        let _ = handle.await;
    }
}
