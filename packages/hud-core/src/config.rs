//! Application configuration.
//!
//! `Config` carries every tuning knob named in the environment variable list
//! (array geometry, direction-fusion gains, radar thresholds, alarm
//! thresholds, keyword list, haptics/STT connection settings). It is wrapped
//! in a `parking_lot::RwLock` by callers so a `config.update` HUD message can
//! mutate gains and thresholds in place without restarting any loop.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{DEFAULT_BIND_HOST, DEFAULT_BIND_PORT};

/// STT audio source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttAudioSource {
    /// Prefer ESP32 front mics when fresh, else the phone mic.
    Auto,
    /// Always use the phone mic.
    AndroidMic,
    /// Always use the ESP32 front mics.
    Esp32,
}

impl Default for SttAudioSource {
    fn default() -> Self {
        Self::Auto
    }
}

/// Array geometry, in millimeters, used to derive per-mic XY for the status
/// snapshot (see `geometry::mic_positions_mm`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayGeometryConfig {
    pub back_width_mm: f32,
    pub front_width_mm: f32,
    pub side_len_mm: f32,
}

impl Default for ArrayGeometryConfig {
    fn default() -> Self {
        Self {
            back_width_mm: 150.0,
            front_width_mm: 130.0,
            side_len_mm: 180.0,
        }
    }
}

/// Direction-fusion tuning knobs (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionConfig {
    pub noise_floor: f32,
    pub gain_quad: f32,
    pub gain_lr: f32,
    pub gain_mono: f32,
    pub back_balance_gain_deg: f32,
    pub back_balance_exp: f32,
    pub hybrid_front_back_gain: f32,
    /// Reported in the status snapshot but, per Design Notes, not consumed
    /// by the fusion math in this implementation (see DESIGN.md).
    pub quad_front_weight: f32,
    /// See `quad_front_weight`.
    pub quad_back_weight: f32,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            noise_floor: 0.02,
            gain_quad: 4.0,
            gain_lr: 4.0,
            gain_mono: 4.0,
            back_balance_gain_deg: 150.0,
            back_balance_exp: 0.8,
            hybrid_front_back_gain: 1.0,
            quad_front_weight: 1.0,
            quad_back_weight: 1.0,
        }
    }
}

/// Radar track loop tuning knobs (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarConfig {
    pub window_s: f32,
    pub max_dots: usize,
    pub min_freq_hz: f32,
    pub max_freq_hz: f32,
    pub baseline_alpha: f32,
    pub baseline_peak_cap: f32,
    pub outlier_ratio_thresh: f32,
    pub track_freq_tol_hz: f32,
    pub track_alpha_freq: f32,
    pub track_alpha_intensity: f32,
    pub track_alpha_dir: f32,
    pub track_decay_tau_s: f32,
    pub track_min_intensity: f32,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            window_s: 0.5,
            max_dots: 3,
            min_freq_hz: 200.0,
            max_freq_hz: 4_000.0,
            baseline_alpha: 0.03,
            baseline_peak_cap: 2.0,
            outlier_ratio_thresh: 0.7,
            track_freq_tol_hz: 250.0,
            track_alpha_freq: 0.25,
            track_alpha_intensity: 0.15,
            track_alpha_dir: 0.15,
            track_decay_tau_s: 1.2,
            track_min_intensity: 0.15,
        }
    }
}

/// Alarm classifier thresholds and hold timers (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    pub fire_ratio_threshold: f32,
    pub horn_ratio_threshold: f32,
    pub yamnet_fire_threshold: f32,
    pub yamnet_horn_threshold: f32,
    pub yamnet_min_rms: f32,
    pub alarm_rms_threshold: f32,
    pub fire_hold_s: f32,
    pub car_horn_hold_s: f32,
    pub siren_hold_s: f32,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            fire_ratio_threshold: 0.55,
            horn_ratio_threshold: 0.6,
            yamnet_fire_threshold: 0.6,
            yamnet_horn_threshold: 0.6,
            yamnet_min_rms: 0.01,
            alarm_rms_threshold: 0.01,
            fire_hold_s: 10.0,
            car_horn_hold_s: 2.0,
            siren_hold_s: 3.0,
        }
    }
}

/// External haptics connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HapticsConfig {
    pub enabled: bool,
    pub left_url: Option<String>,
    pub right_url: Option<String>,
    /// One of `csv`, `tuple`, `json`.
    pub encoding: String,
}

impl Default for HapticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            left_url: None,
            right_url: None,
            encoding: "json".to_string(),
        }
    }
}

/// ElevenLabs streaming STT connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevenLabsConfig {
    pub api_key: Option<String>,
    pub host: String,
    pub model_id: String,
    pub language_code: Option<String>,
    pub audio_format: String,
    pub commit_strategy: String,
    pub vad_silence_threshold_secs: f32,
    pub include_timestamps: bool,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            host: "api.elevenlabs.io".to_string(),
            model_id: "scribe_v1_experimental".to_string(),
            language_code: None,
            audio_format: "pcm_16000".to_string(),
            commit_strategy: "vad".to_string(),
            vad_silence_threshold_secs: 1.2,
            include_timestamps: false,
        }
    }
}

/// Top-level application configuration.
///
/// Built from defaults, layered with an optional YAML file, environment
/// variables, then CLI flags (highest precedence) in `apps/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind the WebSocket listener to.
    pub bind_host: String,
    /// Port to bind the WebSocket listener to.
    pub bind_port: u16,

    /// STT audio source selection.
    pub stt_audio_source: SttAudioSource,

    pub esp32_gain_left: f32,
    pub esp32_gain_right: f32,

    pub direction: DirectionConfig,
    pub radar: RadarConfig,
    pub alarm: AlarmConfig,
    pub haptics: HapticsConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub array: ArrayGeometryConfig,

    pub keyword_cooldown_s: f32,
    pub keywords: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            stt_audio_source: SttAudioSource::default(),
            esp32_gain_left: 1.0,
            esp32_gain_right: 0.25,
            direction: DirectionConfig::default(),
            radar: RadarConfig::default(),
            alarm: AlarmConfig::default(),
            haptics: HapticsConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            array: ArrayGeometryConfig::default(),
            keyword_cooldown_s: 20.0,
            keywords: Vec::new(),
        }
    }
}

impl Config {
    /// Applies a `config.update` HUD message, clamping and normalizing
    /// fields per spec §6. Unknown fields are ignored by the caller's
    /// tolerant JSON parsing (see `api::ws_events`); this only validates
    /// the fields it actually receives.
    pub fn apply_update(&mut self, update: &ConfigUpdate) {
        if let Some(v) = update.alarm_rms_threshold {
            self.alarm.alarm_rms_threshold = v.max(0.0);
        }
        if let Some(v) = update.fire_ratio_threshold {
            self.alarm.fire_ratio_threshold = v.max(0.0);
        }
        if let Some(v) = update.horn_ratio_threshold {
            self.alarm.horn_ratio_threshold = v.max(0.0);
        }
        if let Some(v) = update.keyword_cooldown_s {
            self.keyword_cooldown_s = v.max(0.0);
        }
        if let Some(keywords) = &update.keywords {
            self.keywords = keywords
                .iter()
                .take(50)
                .map(|k| k.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
                .collect();
        }
        if let Some(v) = update.esp32_gain_left {
            self.esp32_gain_left = v.max(0.0);
        }
        if let Some(v) = update.esp32_gain_right {
            self.esp32_gain_right = v.max(0.0);
        }
        if let Some(v) = update.yamnet_fire_threshold {
            self.alarm.yamnet_fire_threshold = v.max(0.0);
        }
        if let Some(v) = update.yamnet_horn_threshold {
            self.alarm.yamnet_horn_threshold = v.max(0.0);
        }
        if let Some(v) = update.yamnet_min_rms {
            self.alarm.yamnet_min_rms = v.max(0.0);
        }
    }
}

/// Tolerant, partially-populated `config.update` payload (spec §9: parse
/// each field independently so one bad field doesn't reject the others).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub alarm_rms_threshold: Option<f32>,
    pub fire_ratio_threshold: Option<f32>,
    pub horn_ratio_threshold: Option<f32>,
    pub keyword_cooldown_s: Option<f32>,
    pub keywords: Option<Vec<String>>,
    pub esp32_gain_left: Option<f32>,
    pub esp32_gain_right: Option<f32>,
    pub yamnet_fire_threshold: Option<f32>,
    pub yamnet_horn_threshold: Option<f32>,
    pub yamnet_min_rms: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.bind_port, DEFAULT_BIND_PORT);
        assert_eq!(config.esp32_gain_right, 0.25);
    }

    #[test]
    fn apply_update_clamps_gains_and_lowercases_keywords() {
        let mut config = Config::default();
        let update = ConfigUpdate {
            esp32_gain_left: Some(-3.0),
            keywords: Some(vec!["  Help   Me  ".to_string(), "FIRE".to_string()]),
            ..Default::default()
        };
        config.apply_update(&update);
        assert_eq!(config.esp32_gain_left, 0.0);
        assert_eq!(config.keywords, vec!["help me", "fire"]);
    }

    #[test]
    fn apply_update_ignores_absent_fields() {
        let mut config = Config::default();
        let original_threshold = config.alarm.fire_ratio_threshold;
        config.apply_update(&ConfigUpdate::default());
        assert_eq!(config.alarm.fire_ratio_threshold, original_threshold);
    }
}
