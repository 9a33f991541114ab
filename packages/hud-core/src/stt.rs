//! STT Muxer (spec §4.6) and the external streaming STT connector.
//!
//! The connector is behind a trait so the muxer's source-selection and
//! keyword-scanning logic is unit-testable without a live network call.
//! `ElevenLabsStt` is grounded in `elevenlabs_stt.py`'s `_build_uri` /
//! `_run_once` shape: a TLS WebSocket, an API-key header, JSON envelopes in,
//! tagged JSON messages out, and a 1 s reconnect delay on any error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastHub;
use crate::config::{Config, ElevenLabsConfig, SttAudioSource};
use crate::protocol::SttEgress;
use crate::state::{MicRole, SharedAudioState};

/// One chunk of mono PCM16 audio handed to the active STT connector.
pub type SttChunk = Vec<i16>;

/// Inbound message from an STT connector, already classified.
#[derive(Debug, Clone)]
pub enum SttConnectorEvent {
    Partial(String),
    Final(String),
    Error(String),
}

/// Abstraction over the external streaming STT service (spec §4.6, §6
/// "External outbound" (a)). One production implementation
/// ([`ElevenLabsStt`]) plus whatever stub a test wants to supply.
#[async_trait]
pub trait SttConnector: Send + Sync {
    /// Runs the connector until `cancel` fires, reading chunks from `audio`
    /// and reporting transcription events on `events`. Implementations own
    /// their own reconnect loop and never return early on a transient
    /// error.
    async fn run(
        &self,
        audio: mpsc::Receiver<SttChunk>,
        events: mpsc::Sender<SttConnectorEvent>,
        cancel: CancellationToken,
    );
}

/// ElevenLabs realtime scribe connector (grounded on
/// `original_source/server/hudserver/elevenlabs_stt.py`).
pub struct ElevenLabsStt {
    config: ElevenLabsConfig,
}

impl ElevenLabsStt {
    pub fn new(config: ElevenLabsConfig) -> Self {
        Self { config }
    }

    fn build_uri(&self) -> String {
        let mut uri = format!(
            "wss://{}/v1/speech-to-text/stream?model_id={}&audio_format={}",
            self.config.host, self.config.model_id, self.config.audio_format
        );
        if let Some(lang) = &self.config.language_code {
            uri.push_str(&format!("&language_code={}", lang));
        }
        uri
    }
}

#[async_trait]
impl SttConnector for ElevenLabsStt {
    async fn run(
        &self,
        mut audio: mpsc::Receiver<SttChunk>,
        events: mpsc::Sender<SttConnectorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if self.config.api_key.is_none() {
                log::warn!("[STT] No API key configured, STT connector idling");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                }
            }

            let uri = self.build_uri();
            let request = match tokio_tungstenite::tungstenite::http::Request::builder()
                .uri(&uri)
                .header("xi-api-key", self.config.api_key.clone().unwrap_or_default())
                .header("Host", self.config.host.clone())
                .body(())
            {
                Ok(req) => req,
                Err(e) => {
                    log::warn!("[STT] Failed to build connect request: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            let connect = tokio::time::timeout(
                Duration::from_secs(crate::protocol_constants::STT_CONNECT_TIMEOUT_SECS),
                tokio_tungstenite::connect_async(request),
            )
            .await;

            let stream = match connect {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(e)) => {
                    log::warn!("[STT] Connect failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
                Err(_) => {
                    log::warn!("[STT] Connect timed out");
                    continue;
                }
            };

            log::info!("[STT] Connected to ElevenLabs streaming endpoint");
            let (mut write, mut read) = stream.split();
            let sample_rate = crate::protocol_constants::DEFAULT_SAMPLE_RATE_HZ;

            let send_loop = async {
                while let Some(chunk) = audio.recv().await {
                    let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
                    let audio_base_64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    let envelope = serde_json::json!({
                        "message_type": "input_audio_chunk",
                        "audio_base_64": audio_base_64,
                        "commit": false,
                        "sample_rate": sample_rate,
                    });
                    if write.send(WsMessage::Text(envelope.to_string())).await.is_err() {
                        break;
                    }
                }
            };

            let recv_loop = async {
                while let Some(Ok(msg)) = read.next().await {
                    if let WsMessage::Text(text) = msg {
                        dispatch_elevenlabs_message(&text, &events).await;
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = send_loop => {}
                _ = recv_loop => {}
            }

            log::warn!("[STT] Connection lost, reconnecting in 1s");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}

async fn dispatch_elevenlabs_message(text: &str, events: &mpsc::Sender<SttConnectorEvent>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    let message_type = value.get("message_type").and_then(|v| v.as_str()).unwrap_or("");
    let text_field = value.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let event = match message_type {
        "partial_transcript" | "partial" => Some(SttConnectorEvent::Partial(text_field)),
        "final_transcript" | "final" => Some(SttConnectorEvent::Final(text_field)),
        "error" => Some(SttConnectorEvent::Error(text_field)),
        _ => None,
    };
    if let Some(event) = event {
        let _ = events.send(event).await;
    }
}

/// Computes the delta words between the previous and current word lists,
/// per spec §6: emit up to 8 trailing words only when `current` is a prefix
/// extension of `previous`; otherwise emit no delta (a full revision).
pub fn delta_words(previous: &[String], current: &[String]) -> Vec<String> {
    if current.len() > previous.len() && current[..previous.len()] == previous[..] {
        current[previous.len()..].iter().take(8).cloned().collect()
    } else {
        Vec::new()
    }
}

/// Tracks per-keyword cooldowns for `alert.keyword` scanning (spec §4.6).
struct KeywordCooldowns {
    last_fired: std::collections::HashMap<String, Instant>,
}

impl KeywordCooldowns {
    fn new() -> Self {
        Self { last_fired: std::collections::HashMap::new() }
    }

    fn scan(&mut self, text: &str, keywords: &[String], cooldown_s: f32, now: Instant) -> Vec<String> {
        let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let mut fired = Vec::new();
        for keyword in keywords {
            if !normalized.contains(keyword.as_str()) {
                continue;
            }
            let ready = match self.last_fired.get(keyword) {
                Some(last) => now.saturating_duration_since(*last).as_secs_f32() >= cooldown_s,
                None => true,
            };
            if ready {
                self.last_fired.insert(keyword.clone(), now);
                fired.push(keyword.clone());
            }
        }
        fired
    }
}

/// Whether a front ESP32 role has sent audio within the freshness window.
pub(crate) fn esp32_role_fresh(audio: &SharedAudioState, role: MicRole, now: Instant) -> bool {
    audio
        .front
        .get(&role)
        .is_some_and(|s| now.saturating_duration_since(s.last_seen) < Duration::from_millis(1000))
}

/// Decides whether the ESP32 front mics or the phone mic feed the STT
/// muxer / alarm loop for this tick (spec §4.6: "Auto prefers ESP32 when
/// either role has fresh audio, else phone mic"). Shared by [`SourceSelector`]
/// and the alarm loop's own window selection so the two never drift.
pub(crate) fn select_use_esp32(audio: &SharedAudioState, source: SttAudioSource, now: Instant) -> bool {
    match source {
        SttAudioSource::Esp32 => true,
        SttAudioSource::AndroidMic => false,
        SttAudioSource::Auto => esp32_role_fresh(audio, MicRole::Left, now) || esp32_role_fresh(audio, MicRole::Right, now),
    }
}

/// Picks which connection's queue currently feeds the STT connector and
/// alarm loop (spec §4.6, design notes §9 "Generator-like audio-source
/// selection"). Re-evaluated every call; never caches a source across
/// frames except for the ESP32 left/right stickiness rule.
pub struct SourceSelector {
    sticky_role: Option<MicRole>,
}

impl SourceSelector {
    pub fn new() -> Self {
        Self { sticky_role: None }
    }

    /// Pops up to one frame from the currently selected source, applying
    /// the `auto` / `android_mic` / `esp32` selection rule and, within
    /// `esp32`, the left/right stickiness rule (flip only when the other
    /// side's RMS exceeds the current by >= 1.5x).
    pub fn pop_frame(&mut self, audio: &mut SharedAudioState, source: SttAudioSource) -> Option<Vec<i16>> {
        let now = Instant::now();
        let use_esp32 = select_use_esp32(audio, source, now);

        if use_esp32 {
            let left_rms = audio.front.get(&MicRole::Left).map(|s| s.last_rms).unwrap_or(0.0);
            let right_rms = audio.front.get(&MicRole::Right).map(|s| s.last_rms).unwrap_or(0.0);

            let role = match self.sticky_role {
                None => {
                    if right_rms > left_rms {
                        MicRole::Right
                    } else {
                        MicRole::Left
                    }
                }
                Some(MicRole::Left) if right_rms >= left_rms * 1.5 => MicRole::Right,
                Some(MicRole::Right) if left_rms >= right_rms * 1.5 => MicRole::Left,
                Some(current) => current,
            };
            self.sticky_role = Some(role);
            audio.front.get_mut(&role).and_then(|s| s.stt_q.pop_front())
        } else {
            self.sticky_role = None;
            audio.phone.values_mut().next().and_then(|s| s.stt_q.pop_front())
        }
    }
}

impl Default for SourceSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the STT muxer until `cancel` fires: pulls frames from the selected
/// source, feeds them to `connector`, maps its events to `/stt` broadcasts,
/// and scans final transcripts for configured keywords.
pub async fn run(
    audio: Arc<RwLock<SharedAudioState>>,
    config: Arc<RwLock<Config>>,
    hub: Arc<BroadcastHub>,
    connector: Arc<dyn SttConnector>,
    cancel: CancellationToken,
) {
    log::info!("[STT] Muxer started");

    let (audio_tx, audio_rx) = mpsc::channel::<SttChunk>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<SttConnectorEvent>(64);

    let connector_cancel = cancel.clone();
    let connector_handle = tokio::spawn(async move {
        connector.run(audio_rx, event_tx, connector_cancel).await;
    });

    let mut cooldowns = KeywordCooldowns::new();
    let mut previous_words: Vec<String> = Vec::new();

    let feed_cancel = cancel.clone();
    let feed_audio = Arc::clone(&audio);
    let feed_config = Arc::clone(&config);
    let feed_handle = tokio::spawn(async move {
        let mut selector = SourceSelector::new();
        loop {
            if feed_cancel.is_cancelled() {
                break;
            }
            let source = feed_config.read().stt_audio_source;
            let popped = selector.pop_frame(&mut feed_audio.write(), source);
            match popped {
                Some(chunk) => {
                    if audio_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                None => {
                    tokio::select! {
                        _ = feed_cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[STT] Muxer stopping");
                break;
            }
            Some(event) = event_rx.recv() => {
                match event {
                    SttConnectorEvent::Partial(text) => {
                        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
                        let delta = delta_words(&previous_words, &words);
                        previous_words = words;
                        hub.publish_stt(&SttEgress::Partial { text, delta_words: delta });
                    }
                    SttConnectorEvent::Final(text) => {
                        previous_words.clear();
                        let cfg = config.read();
                        let fired = cooldowns.scan(&text, &cfg.keywords, cfg.keyword_cooldown_s, Instant::now());
                        drop(cfg);
                        for keyword in fired {
                            hub.publish_event(&serde_json::json!({
                                "type": "alert.keyword",
                                "keyword": keyword,
                                "text": text,
                            }));
                        }
                        hub.publish_stt(&SttEgress::Final { text });
                    }
                    SttConnectorEvent::Error(message) => {
                        hub.publish_stt(&SttEgress::Error { message });
                    }
                }
            }
        }
    }

    feed_handle.abort();
    connector_handle.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PhoneMicState;

    #[test]
    fn delta_words_emits_only_the_suffix_extension() {
        let previous = vec!["hello".to_string(), "there".to_string()];
        let current = vec!["hello".to_string(), "there".to_string(), "friend".to_string()];
        assert_eq!(delta_words(&previous, &current), vec!["friend".to_string()]);
    }

    #[test]
    fn delta_words_is_empty_on_revision() {
        let previous = vec!["hello".to_string(), "there".to_string()];
        let current = vec!["hello".to_string(), "world".to_string()];
        assert!(delta_words(&previous, &current).is_empty());
    }

    #[test]
    fn delta_words_caps_at_eight() {
        let previous: Vec<String> = Vec::new();
        let current: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(delta_words(&previous, &current).len(), 8);
    }

    #[test]
    fn keyword_cooldown_suppresses_repeat_within_window() {
        let mut cooldowns = KeywordCooldowns::new();
        let keywords = vec!["fire".to_string()];
        let now = Instant::now();
        let fired = cooldowns.scan("there is a FIRE here", &keywords, 20.0, now);
        assert_eq!(fired, vec!["fire".to_string()]);
        let fired_again = cooldowns.scan("fire fire fire", &keywords, 20.0, now + Duration::from_secs(1));
        assert!(fired_again.is_empty());
        let fired_later = cooldowns.scan("fire", &keywords, 20.0, now + Duration::from_secs(21));
        assert_eq!(fired_later, vec!["fire".to_string()]);
    }

    #[test]
    fn auto_falls_back_to_phone_when_neither_source_is_fresh() {
        let audio = SharedAudioState::new();
        let now = Instant::now();
        assert!(!select_use_esp32(&audio, SttAudioSource::Auto, now));
    }

    #[test]
    fn auto_prefers_esp32_when_a_role_is_fresh_even_with_stale_phone() {
        let mut audio = SharedAudioState::new();
        let now = Instant::now();
        audio.register_front(MicRole::Left, crate::state::FrontMicState::new("d1".into(), MicRole::Left, 16_000, 1, 20, now));
        assert!(select_use_esp32(&audio, SttAudioSource::Auto, now));
    }

    #[test]
    fn auto_prefers_phone_when_esp32_is_stale_but_phone_is_fresh() {
        let mut audio = SharedAudioState::new();
        let now = Instant::now();
        audio.register_phone("conn1".into(), PhoneMicState::new("p1".into(), 16_000, 1, 20, now));
        assert!(!select_use_esp32(&audio, SttAudioSource::Auto, now));
    }
}
