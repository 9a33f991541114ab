//! `/esp32/audio` WebSocket handler (spec §4.2, §6): front-mic ingress.
//! Text hello, then raw little-endian PCM16 binary frames. Any other path
//! closes immediately with 1008 "Unknown path" via [`unknown_path`].

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::StreamExt;

use crate::api::AppState;
use crate::ingress::{apply_gain, f32_to_i16, pcm16le_to_f32, rms, RateLimiter};
use crate::protocol::parse_hello;
use crate::protocol_constants::{DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE_HZ, MAX_WS_MESSAGE_BYTES};
use crate::state::{mic::MicRole, FrontMicState};

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle(socket, state, query))
}

/// Fallback for any path other than `/events`, `/stt`, `/esp32/audio`
/// (spec §6: "Any other path: close with 1008 'Unknown path'"). A plain HTTP
/// request without upgrade headers never reaches `on_upgrade`; axum answers
/// it with its own 400 rejection, which is fine since there is no
/// WebSocket to close in that case.
pub async fn unknown_path(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Unknown path".into(),
            })))
            .await;
    })
}

async fn handle(socket: WebSocket, state: AppState, query: HashMap<String, String>) {
    let (mut sender, mut receiver) = socket.split();
    let conn_guard = state.esp32_ws.register();
    let cancel = conn_guard.cancel_token().clone();

    let Some(Ok(Message::Text(hello_text))) = receiver.next().await else {
        log::debug!("[ESP32] Connection closed before hello");
        let _ = sender
            .send(Message::Close(Some(CloseFrame { code: 1003, reason: "Expected JSON hello".into() })))
            .await;
        return;
    };

    let hello = match parse_hello(&hello_text, &query, DEFAULT_SAMPLE_RATE_HZ, DEFAULT_FRAME_MS, 1) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("[ESP32] Malformed hello: {}", e);
            let _ = sender
                .send(Message::Close(Some(CloseFrame { code: 1003, reason: "Invalid hello".into() })))
                .await;
            return;
        }
    };

    let Some(role) = hello.role.as_deref().and_then(MicRole::from_str) else {
        log::warn!("[ESP32] Hello missing a recognized role");
        let _ = sender
            .send(Message::Close(Some(CloseFrame { code: 1008, reason: "Missing role".into() })))
            .await;
        return;
    };
    let device_id = hello.device_id.unwrap_or_else(|| format!("unknown-{}", conn_guard.id()));

    log::info!("[ESP32] {} ({}) registered, {}Hz", device_id, role.as_str(), hello.audio.sample_rate_hz);
    let front_state = FrontMicState::new(
        device_id.clone(),
        role,
        hello.audio.sample_rate_hz,
        hello.audio.channels,
        hello.audio.frame_ms,
        Instant::now(),
    );
    let expected_bytes = front_state.bytes_per_frame;
    state.audio.write().register_front(role, front_state);

    let mut rate_limiter = RateLimiter::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        process_frame(&state, role, &device_id, &bytes, expected_bytes, &mut rate_limiter);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.audio.write().remove_front(role, &device_id);
    log::info!("[ESP32] {} ({}) disconnected", device_id, role.as_str());
}

fn process_frame(
    state: &AppState,
    role: MicRole,
    device_id: &str,
    bytes: &[u8],
    expected_bytes: usize,
    rate_limiter: &mut RateLimiter,
) {
    let mut audio = state.audio.write();
    let Some(front) = audio.front.get_mut(&role) else { return };
    if front.device_id != device_id {
        return;
    }

    front.last_seen = Instant::now();
    front.frames_received += 1;

    if bytes.len() != expected_bytes {
        front.bad_frame_sizes += 1;
        if rate_limiter.should_log() {
            log::warn!(
                "[ESP32] {} ({}) unexpected frame size {} (expected {})",
                device_id,
                role.as_str(),
                bytes.len(),
                expected_bytes
            );
        }
    }

    let mut samples = pcm16le_to_f32(bytes);
    let gain = {
        let config = state.config.read();
        match role {
            MicRole::Left => config.esp32_gain_left,
            MicRole::Right => config.esp32_gain_right,
        }
    };
    apply_gain(&mut samples, gain);
    front.last_rms = rms(&samples);

    match role {
        MicRole::Left => audio.ring_fl.append(&samples),
        MicRole::Right => audio.ring_fr.append(&samples),
    }

    let Some(front) = audio.front.get_mut(&role) else { return };
    front.push_frame(f32_to_i16(&samples));
}
