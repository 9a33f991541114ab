//! `/stt` WebSocket handler (spec §4.2, §6): the phone mic's one connection
//! doubles as ingress (hello + binary PCM frames) and the HUD transcript
//! egress channel (`partial`/`final`/`status`/`error`).

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use futures::{SinkExt, StreamExt};

use crate::api::AppState;
use crate::ingress::{apply_gain, deinterleave_stereo, downmix_mono, f32_to_i16, pcm16le_to_f32, rms, RateLimiter};
use crate::protocol::parse_hello;
use crate::protocol_constants::{DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE_HZ, MAX_WS_MESSAGE_BYTES};
use crate::state::PhoneMicState;

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle(socket, state, query))
}

async fn handle(socket: WebSocket, state: AppState, query: HashMap<String, String>) {
    let (mut sender, mut receiver) = socket.split();
    let conn_guard = state.stt_ws.register();
    let cancel = conn_guard.cancel_token().clone();
    let conn_id = conn_guard.id().to_string();
    let mut broadcast_rx = state.hub.stt_tx.subscribe();

    log::info!("[STT] Connection established: {}", conn_id);

    let mut device_id: Option<String> = None;
    let mut rate_limiter = RateLimiter::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_hello(&text, &query, DEFAULT_SAMPLE_RATE_HZ, DEFAULT_FRAME_MS, 2) {
                            Ok(hello) => {
                                let id = hello.device_id.unwrap_or_else(|| format!("phone-{}", conn_id));
                                log::info!("[STT] Phone mic {} registered, {}ch @ {}Hz", id, hello.audio.channels, hello.audio.sample_rate_hz);
                                let phone_state = PhoneMicState::new(
                                    id.clone(),
                                    hello.audio.sample_rate_hz,
                                    hello.audio.channels,
                                    hello.audio.frame_ms,
                                    Instant::now(),
                                );
                                device_id = Some(id.clone());
                                state.audio.write().register_phone(conn_id.clone(), phone_state);
                            }
                            Err(e) => log::debug!("[STT] Non-hello text message or malformed hello: {}", e),
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(id) = &device_id {
                            process_frame(&state, &conn_id, id, &bytes, &mut rate_limiter);
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
        }
    }

    if let Some(id) = &device_id {
        state.audio.write().remove_phone(&conn_id, id);
    }
    log::info!("[STT] Connection closed: {}", conn_id);
    let _ = sender
        .send(Message::Close(Some(CloseFrame { code: 1000, reason: "".into() })))
        .await;
}

fn process_frame(state: &AppState, conn_id: &str, device_id: &str, bytes: &[u8], rate_limiter: &mut RateLimiter) {
    let mut audio = state.audio.write();
    let Some(phone) = audio.phone.get_mut(conn_id) else { return };
    if phone.device_id != device_id {
        return;
    }

    phone.last_seen = Instant::now();

    let mono_bytes = phone.sample_rate_hz as usize * phone.frame_ms as usize / 1000 * 2;
    let stereo_bytes = mono_bytes * 2;
    if bytes.len() == stereo_bytes && phone.channels != 2 {
        phone.set_channels(2);
    } else if bytes.len() == mono_bytes && phone.channels != 1 {
        phone.set_channels(1);
    } else if bytes.len() != phone.bytes_per_frame {
        phone.bad_frame_sizes += 1;
        if rate_limiter.should_log() {
            log::warn!("[STT] {} unexpected frame size {} (expected {})", device_id, bytes.len(), phone.bytes_per_frame);
        }
        // Best-effort: still decode and fold into RMS/rings under the
        // current channel assumption rather than discarding the frame.
    }

    let gain = 1.0;
    let mut samples = pcm16le_to_f32(bytes);
    apply_gain(&mut samples, gain);

    let mono = if phone.channels == 2 {
        let (left, right) = deinterleave_stereo(&samples);
        phone.last_rms_left = rms(&left);
        phone.last_rms_right = rms(&right);
        audio.ring_bl.append(&left);
        audio.ring_br.append(&right);
        downmix_mono(&left, &right)
    } else {
        audio.ring_bl.append(&samples);
        audio.ring_br.append(&samples);
        samples.clone()
    };

    let Some(phone) = audio.phone.get_mut(conn_id) else { return };
    phone.last_rms = rms(&mono);
    phone.push_frame(f32_to_i16(&mono));
}
