//! `/events` WebSocket handler (spec §6): the HUD control channel. Ingress
//! is tolerant JSON (see [`crate::protocol::parse_events_ingress`]); egress
//! is the `direction.ui`/`alarm.*`/`alert.keyword` broadcast fan-out plus a
//! per-connection 1 Hz status snapshot.
//!
//! Modeled on the teacher's `/ws` handler shape: `on_upgrade`, split
//! sender/receiver, a `ConnectionGuard` for force-close, and a single
//! `tokio::select!` loop multiplexing client messages, the broadcast
//! subscription, and a heartbeat/status ticker.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::api::AppState;
use crate::broadcast::build_status_snapshot;
use crate::protocol::{parse_events_ingress, CalibratePoseZeroReply, EventsIngress};
use crate::protocol_constants::MAX_WS_MESSAGE_BYTES;
use crate::state::{HeadPose, TorsoPose};

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle(socket, state))
}

async fn handle(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_guard = state.events_ws.register();
    let cancel = conn_guard.cancel_token().clone();
    let mut broadcast_rx = state.hub.events_tx.subscribe();

    log::info!("[Events] Connection established: {}", conn_guard.id());

    let mut status_ticker = tokio::time::interval(Duration::from_secs(1));
    status_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[Events] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_ingress(&state, &mut sender, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            Ok(text) = broadcast_rx.recv() => {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = status_ticker.tick() => {
                let (events_clients, stt_clients) = state.connected_counts();
                let snapshot = {
                    let audio = state.audio.read();
                    let config = state.config.read();
                    build_status_snapshot(
                        &audio,
                        &config,
                        events_clients,
                        stt_clients,
                        state.haptics_left.is_connected(),
                        state.haptics_right.is_connected(),
                    )
                };
                match serde_json::to_string(&snapshot) {
                    Ok(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[Events] Failed to serialize status snapshot: {}", e),
                }
            }
        }
    }

    log::info!("[Events] Connection closed: {}", conn_guard.id());
}

/// Dispatches one parsed ingress message. Returns `false` if the connection
/// should close (send failure on a direct reply).
async fn handle_ingress(
    state: &AppState,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    text: &str,
) -> bool {
    match parse_events_ingress(text) {
        EventsIngress::Hello => {
            log::debug!("[Events] Hello received");
        }
        EventsIngress::HeadPose { yaw, pitch, roll } => {
            state.audio.write().head_pose = Some(HeadPose::new(yaw, pitch, roll, Instant::now()));
        }
        EventsIngress::TorsoPose { yaw } => {
            state.audio.write().torso_pose = Some(TorsoPose::new(yaw, Instant::now()));
        }
        EventsIngress::CalibratePoseZero => {
            let (head0_yaw_deg, torso0_yaw_deg) = state.audio.write().calibrate_pose_zero(Instant::now());
            let reply = CalibratePoseZeroReply { ok: true, head0_yaw_deg, torso0_yaw_deg };
            if let Ok(json) = serde_json::to_string(&reply) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    return false;
                }
            }
        }
        EventsIngress::ConfigUpdate(update) => {
            state.config.write().apply_update(&update);
        }
        EventsIngress::AudioSource(source) => {
            if let Some(parsed) = parse_audio_source(&source) {
                state.config.write().stt_audio_source = parsed;
            } else {
                log::debug!("[Events] Unrecognized audio.source value '{}'", source);
            }
        }
        EventsIngress::StatusRequest => {
            let (events_clients, stt_clients) = state.connected_counts();
            let snapshot = {
                let audio = state.audio.read();
                let config = state.config.read();
                build_status_snapshot(
                    &audio,
                    &config,
                    events_clients,
                    stt_clients,
                    state.haptics_left.is_connected(),
                    state.haptics_right.is_connected(),
                )
            };
            if let Ok(json) = serde_json::to_string(&snapshot) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    return false;
                }
            }
        }
        EventsIngress::Ignored => {}
    }
    true
}

/// Maps the `audio.source` wire values (`auto`, `android`, `android_mic`,
/// `esp32`) onto `SttAudioSource` (spec §6 table).
fn parse_audio_source(source: &str) -> Option<crate::config::SttAudioSource> {
    use crate::config::SttAudioSource;
    match source {
        "auto" => Some(SttAudioSource::Auto),
        "android" | "android_mic" => Some(SttAudioSource::AndroidMic),
        "esp32" => Some(SttAudioSource::Esp32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_audio_source_accepts_android_alias() {
        assert!(matches!(parse_audio_source("android"), Some(crate::config::SttAudioSource::AndroidMic)));
        assert!(matches!(parse_audio_source("android_mic"), Some(crate::config::SttAudioSource::AndroidMic)));
        assert!(parse_audio_source("bogus").is_none());
    }
}
