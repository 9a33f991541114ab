//! Alarm Loop (spec §4.7).
//!
//! Every 200 ms, classifies a 1 s rolling window of the currently active
//! audio source against three classes (fire, car_horn, siren) and runs a
//! hold-timer state machine per class so a momentary classifier miss
//! doesn't flap the HUD overlay. The classifier itself sits behind a trait:
//! [`HeuristicClassifier`] implements the band-power-ratio heuristic from
//! `original_source/server/hudserver/audio_features.py`; [`YamnetClassifier`]
//! is the trait boundary for the real model process, which this repo does
//! not vendor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastHub;
use crate::config::{AlarmConfig, Config, SttAudioSource};
use crate::protocol::{AlarmClass, AlarmState};
use crate::state::{DirectionPayload, MicRole, SharedAudioState};

const WINDOW_SECONDS: f32 = 1.0;
const POLL_INTERVAL_MS: u64 = 200;
const FIRE_BAND_HZ: (f32, f32) = (2_500.0, 6_000.0);
const HORN_BAND_HZ: (f32, f32) = (300.0, 500.0);

/// Per-class confidence scores for one classification pass (spec §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmScores {
    pub fire: f32,
    pub car_horn: f32,
    pub siren: f32,
}

/// Abstraction over the thing that turns a rolling audio window into
/// per-class confidences. Behind a trait so the hold-timer state machine is
/// testable without a classifier backend.
#[async_trait]
pub trait AlarmClassifier: Send + Sync {
    async fn classify(&mut self, window: &[f32], sample_rate_hz: u32, config: &AlarmConfig) -> AlarmScores;
}

/// Fallback classifier applying `audio_features.py`'s `band_power_ratio`:
/// fraction of spectral power inside a class's characteristic band.
#[derive(Default)]
pub struct HeuristicClassifier {
    planner: RealFftPlanner<f32>,
}

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self { planner: RealFftPlanner::new() }
    }

    /// `band_power_ratio`: band power over total power, Hann-windowed.
    fn band_power_ratio(&mut self, samples: &[f32], sample_rate_hz: u32, band_hz: (f32, f32)) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let n = samples.len();
        let r2c = self.planner.plan_fft_forward(n);
        let hann: Vec<f32> = (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (n as f32 - 1.0).max(1.0)).cos())
            .collect();
        let mut windowed: Vec<f32> = samples.iter().zip(hann.iter()).map(|(s, w)| s * w).collect();
        let mut spectrum: Vec<Complex<f32>> = r2c.make_output_vec();
        if r2c.process(&mut windowed, &mut spectrum).is_err() {
            return 0.0;
        }

        let bin_hz = sample_rate_hz as f32 / n as f32;
        let total: f32 = spectrum.iter().map(|c| c.norm_sqr()).sum::<f32>() + 1e-12;
        let (lo, hi) = band_hz;
        let band: f32 = spectrum
            .iter()
            .enumerate()
            .filter(|(k, _)| {
                let freq = *k as f32 * bin_hz;
                freq >= lo && freq <= hi
            })
            .map(|(_, c)| c.norm_sqr())
            .sum();
        band / total
    }
}

#[async_trait]
impl AlarmClassifier for HeuristicClassifier {
    async fn classify(&mut self, window: &[f32], sample_rate_hz: u32, config: &AlarmConfig) -> AlarmScores {
        let fire_ratio = self.band_power_ratio(window, sample_rate_hz, FIRE_BAND_HZ);
        let horn_ratio = self.band_power_ratio(window, sample_rate_hz, HORN_BAND_HZ);
        AlarmScores {
            fire: if fire_ratio >= config.fire_ratio_threshold { fire_ratio } else { 0.0 },
            car_horn: if horn_ratio >= config.horn_ratio_threshold { horn_ratio } else { 0.0 },
            siren: 0.0,
        }
    }
}

/// Stub for the external YAMNet-shaped model process (spec §4.7, design
/// notes §9: "the contract is real, the model weights are not vendored").
/// Always reports unavailable so callers fall back to the heuristic.
pub struct YamnetClassifier;

#[async_trait]
impl AlarmClassifier for YamnetClassifier {
    async fn classify(&mut self, _window: &[f32], _sample_rate_hz: u32, _config: &AlarmConfig) -> AlarmScores {
        AlarmScores::default()
    }
}

/// Tracks one class's hold timer: active while `now - last_positive < hold`.
#[derive(Debug, Clone, Copy, Default)]
struct HoldTimer {
    last_positive: Option<Instant>,
    active: bool,
}

impl HoldTimer {
    fn update(&mut self, positive: bool, hold: Duration, now: Instant) -> Option<AlarmState> {
        if positive {
            self.last_positive = Some(now);
        }
        let still_active = self
            .last_positive
            .is_some_and(|last| now.saturating_duration_since(last) < hold);

        if still_active && !self.active {
            self.active = true;
            Some(AlarmState::Started)
        } else if !still_active && self.active {
            self.active = false;
            Some(AlarmState::Ended)
        } else {
            None
        }
    }
}

fn active_window(audio: &SharedAudioState, source: SttAudioSource, sample_rate_hz: u32) -> Vec<f32> {
    let window_len = (sample_rate_hz as f32 * WINDOW_SECONDS) as usize;
    let use_esp32 = crate::stt::select_use_esp32(audio, source, Instant::now());

    let samples_from = |queue: &std::collections::VecDeque<Vec<i16>>| -> Vec<f32> {
        queue
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .take(window_len)
            .rev()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect()
    };

    if use_esp32 {
        let left_rms = audio.front.get(&MicRole::Left).map(|s| s.last_rms).unwrap_or(0.0);
        let right_rms = audio.front.get(&MicRole::Right).map(|s| s.last_rms).unwrap_or(0.0);
        let role = if right_rms > left_rms { MicRole::Right } else { MicRole::Left };
        audio.front.get(&role).map(|s| samples_from(&s.analysis_q)).unwrap_or_default()
    } else {
        audio.phone.values().next().map(|s| samples_from(&s.analysis_q)).unwrap_or_default()
    }
}

/// Runs the alarm loop until `cancel` fires.
pub async fn run(
    audio: Arc<RwLock<SharedAudioState>>,
    config: Arc<RwLock<Config>>,
    hub: Arc<BroadcastHub>,
    mut classifier: Box<dyn AlarmClassifier>,
    sample_rate_hz: u32,
    cancel: CancellationToken,
) {
    log::info!("[Alarm] Loop started ({}ms poll)", POLL_INTERVAL_MS);

    let mut fire_timer = HoldTimer::default();
    let mut horn_timer = HoldTimer::default();
    let mut siren_timer = HoldTimer::default();

    let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[Alarm] Loop stopping");
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let (alarm_cfg, source) = {
                    let cfg = config.read();
                    (cfg.alarm.clone(), cfg.stt_audio_source)
                };

                let window = active_window(&audio.read(), source, sample_rate_hz);
                let rms = crate::ingress::rms(&window);

                let scores = if rms >= alarm_cfg.alarm_rms_threshold {
                    classifier.classify(&window, sample_rate_hz, &alarm_cfg).await
                } else {
                    AlarmScores::default()
                };

                let transitions = [
                    (AlarmClass::Fire, fire_timer.update(scores.fire > 0.0, Duration::from_secs_f32(alarm_cfg.fire_hold_s), now), scores.fire),
                    (AlarmClass::CarHorn, horn_timer.update(scores.car_horn > 0.0, Duration::from_secs_f32(alarm_cfg.car_horn_hold_s), now), scores.car_horn),
                    (AlarmClass::Siren, siren_timer.update(scores.siren > 0.0, Duration::from_secs_f32(alarm_cfg.siren_hold_s), now), scores.siren),
                ];

                for (class, transition, confidence) in transitions {
                    if let Some(state) = transition {
                        let direction = audio.read().latest_direction.clone();
                        log::info!("[Alarm] {:?} {:?} (confidence={:.2})", class, state, confidence);
                        hub.publish_event(&AlarmEventMessage {
                            message_type: class.event_type(),
                            state,
                            confidence,
                            direction,
                        });
                    }
                }
            }
        }
    }
}

/// `alarm.<name>` egress wrapper (spec §4.7: the last direction payload is
/// spread into the top-level message, same shape as `direction.ui`, so a
/// client can read `msg.source`/`msg.directionDeg` off either message type).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct AlarmEventMessage {
    #[serde(rename = "type")]
    message_type: &'static str,
    state: AlarmState,
    confidence: f32,
    #[serde(flatten)]
    direction: Option<DirectionPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_timer_starts_on_first_positive_and_ends_after_hold() {
        let mut timer = HoldTimer::default();
        let t0 = Instant::now();
        assert_eq!(timer.update(true, Duration::from_secs(2), t0), Some(AlarmState::Started));
        assert_eq!(timer.update(false, Duration::from_secs(2), t0 + Duration::from_secs(1)), None);
        assert_eq!(timer.update(false, Duration::from_secs(2), t0 + Duration::from_secs(3)), Some(AlarmState::Ended));
    }

    #[test]
    fn hold_timer_extends_while_still_positive() {
        let mut timer = HoldTimer::default();
        let t0 = Instant::now();
        timer.update(true, Duration::from_secs(2), t0);
        assert_eq!(timer.update(true, Duration::from_secs(2), t0 + Duration::from_secs(5)), None);
        assert!(timer.active);
    }

    #[test]
    fn alarm_event_flattens_direction_fields_to_top_level() {
        use crate::dsp::fusion::{FusionSource, GlowEdge};

        let direction = DirectionPayload {
            source: FusionSource::Front,
            direction_deg: 12.0,
            raw_direction_deg: 12.0,
            torso_direction_deg: 12.0,
            delta_yaw_deg: 0.0,
            intensity: 0.5,
            radar_dots: Vec::new(),
            radar_x: 0.0,
            radar_y: 0.5,
            glow_edge: GlowEdge::Top,
            glow_strength: 0.5,
        };
        let msg = AlarmEventMessage {
            message_type: "alarm.fire",
            state: AlarmState::Started,
            confidence: 0.9,
            direction: Some(direction),
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "alarm.fire");
        assert_eq!(value["directionDeg"], 12.0);
        assert_eq!(value["source"], "front");
        assert!(value.get("direction").is_none());
    }

    #[tokio::test]
    async fn heuristic_classifier_flags_fire_band_energy() {
        let sample_rate_hz = 16_000u32;
        let n = 1600;
        let freq = 4_000.0f32;
        let window: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate_hz as f32).sin())
            .collect();
        let mut classifier = HeuristicClassifier::new();
        let config = AlarmConfig { fire_ratio_threshold: 0.3, ..Default::default() };
        let scores = classifier.classify(&window, sample_rate_hz, &config).await;
        assert!(scores.fire > 0.0, "expected fire score to exceed threshold, got {}", scores.fire);
    }
}
